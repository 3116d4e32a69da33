// ABOUTME: The run subcommand
// ABOUTME: Starts the sandbox stack, streams agent progress and cancels on Ctrl-C

use std::sync::Arc;

use colored::*;
use tracing::warn;

use codebox_cli::{load_config, start_service, ConsoleObserver, StartMode, EXIT_FAILURE};

pub async fn run(name: &str, prompt: &str, quiet: bool) -> anyhow::Result<i32> {
    let config = load_config()?;
    let service = start_service(config, StartMode::Full).await?;
    let observer = Arc::new(ConsoleObserver::new(quiet));

    if !quiet {
        eprintln!("{} {}", "Running agent on".cyan(), name.bold());
    }

    let run = service.run_task(name, prompt, observer);
    tokio::pin!(run);

    let result = tokio::select! {
        outcome = &mut run => outcome,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{}", "Cancelling task...".yellow());
            if let Err(e) = service.cancel_task(name).await {
                warn!("Cancel failed: {}", e);
            }
            run.await
        }
    };
    let outcome = result?;

    Ok(if outcome.success { 0 } else { EXIT_FAILURE })
}
