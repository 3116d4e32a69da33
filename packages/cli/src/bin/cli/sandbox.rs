// ABOUTME: Sandbox maintenance subcommands
// ABOUTME: Health status, crash recovery, credential push and teardown

use std::path::Path;

use anyhow::Context;
use colored::*;
use inquire::Confirm;

use codebox_cli::{load_config, start_service, FeatureUnavailable, StartMode, EXIT_FAILURE};
use codebox_core::ProjectStatus;
use codebox_sandbox::ContainerState;

use super::store;

fn state_label(state: ContainerState) -> ColoredString {
    match state {
        ContainerState::Running => state.as_str().green(),
        ContainerState::Stopped => state.as_str().yellow(),
        ContainerState::NotFound => state.as_str().red(),
    }
}

pub async fn status() -> anyhow::Result<i32> {
    let config = load_config()?;
    let service = start_service(config, StartMode::Maintenance).await?;
    let health = service
        .health_check()
        .await
        .map_err(|e| FeatureUnavailable(e.to_string()))?;

    let projects = service.list_projects(None).await?;
    let running = projects
        .iter()
        .filter(|p| p.status == ProjectStatus::Running)
        .count();

    println!("{}", "Codebox status".blue().bold());
    println!();
    println!("{:<12} {}", "Sandbox:".bold(), state_label(health.sandbox));
    println!("{:<12} {}", "Proxy:".bold(), state_label(health.proxy));
    println!("{:<12} {}", "Projects:".bold(), projects.len());
    println!("{:<12} {}", "Running:".bold(), running);

    if health.is_healthy() {
        Ok(0)
    } else {
        println!();
        println!("{}", "Sandbox is not fully up; 'codebox run' will start it".dimmed());
        Ok(EXIT_FAILURE)
    }
}

pub async fn recover() -> anyhow::Result<i32> {
    let reset = store().await?.reset_stuck_projects().await?;
    if reset == 0 {
        println!("{}", "No stuck projects".green());
    } else {
        println!("{} {} project(s) to error", "Reset".yellow(), reset);
    }
    Ok(0)
}

pub async fn push_credentials(file: &Path) -> anyhow::Result<i32> {
    let json = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let config = load_config()?;
    let service = start_service(config, StartMode::Maintenance).await?;
    service.push_credentials(&json).await?;

    println!("{}", "Credentials updated in sandbox".green());
    Ok(0)
}

pub async fn teardown(yes: bool) -> anyhow::Result<i32> {
    if !yes {
        let confirmed = Confirm::new("Remove the sandbox and proxy containers?")
            .with_default(false)
            .with_help_message("Project workspaces on the host are not touched")
            .prompt()?;
        if !confirmed {
            println!("{}", "Cancelled".yellow());
            return Ok(0);
        }
    }

    let config = load_config()?;
    let service = start_service(config, StartMode::Maintenance).await?;
    service.destroy_sandbox().await?;

    println!("{}", "Sandbox removed".green());
    Ok(0)
}
