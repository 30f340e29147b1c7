use anyhow::{Context, Result};
use jobrunner::cli::commands::{RunCommand, ValidateCommand};
use jobrunner::cli::output::*;
use jobrunner::cli::{Cli, Command};
use jobrunner::core::config::JobConfig;
use jobrunner::core::TaskResult;
use jobrunner::execution::JobRunner;
use tokio_util::sync::CancellationToken;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_job(cmd).await?,
        Command::Validate(cmd) => validate_job(cmd)?,
    }

    Ok(())
}

async fn run_job(cmd: &RunCommand) -> Result<()> {
    let config = JobConfig::from_file(&cmd.file).context("Failed to load job config")?;

    println!("{} Loaded job: {}", INFO, style(&config.name).bold());
    for (key, value) in &cmd.env {
        println!(
            "{} Environment override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let cancellation = CancellationToken::new();
    let job = config.to_job_context(&cmd.env, cancellation.clone());

    // Ctrl-C cancels the whole job; running steps are told through their tokens
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C, cancelling job");
            cancellation.cancel();
        }
    });

    let runner = JobRunner::with_shell(config.default_shell().map(str::to_string));
    runner
        .add_event_handler(|event| println!("{}", format_execution_event(&event)))
        .await;

    println!();
    let report = runner.run(&config.steps, &job).await;

    println!("\n{}", format_job_report(&report));
    if cmd.json {
        println!("\n{}", serde_json::to_string_pretty(&report)?);
    }

    match report.result() {
        TaskResult::Succeeded | TaskResult::SucceededWithIssues | TaskResult::Skipped => Ok(()),
        TaskResult::Cancelled => std::process::exit(130),
        TaskResult::Failed => std::process::exit(1),
    }
}

fn validate_job(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating job...", INFO);

    match JobConfig::from_file(&cmd.file) {
        Ok(mut config) => {
            println!("{} Job configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Steps: {}", style(config.steps.len()).cyan());
            println!("  Environment: {}", style(config.environment().len()).cyan());

            if cmd.json {
                config.prepare_for_serialization();
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}
