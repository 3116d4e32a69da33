// ABOUTME: Project subcommands and task history
// ABOUTME: Work against the database only, so they run while Docker is down

use anyhow::{anyhow, bail};
use clap::Subcommand;
use colored::*;
use inquire::Confirm;

use codebox_cli::format::{
    format_cost, format_date, format_duration_ms, project_table, status_label, task_table,
};

use super::{current_user, store};

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Create a project and its workspace directory
    Create {
        /// Project name (letters, digits, '-' and '_')
        name: String,
        /// Owner; defaults to $CODEBOX_USER or $USER
        #[arg(short, long)]
        user: Option<String>,
    },
    /// List projects
    List {
        /// Only projects owned by this user
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Show project details
    Show {
        /// Project name
        name: String,
    },
    /// Delete a project (its files and task history are kept)
    Delete {
        /// Project name
        name: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

pub async fn handle_project_command(command: ProjectCommands) -> anyhow::Result<i32> {
    match command {
        ProjectCommands::Create { name, user } => create(&name, user).await,
        ProjectCommands::List { user } => list(user.as_deref()).await,
        ProjectCommands::Show { name } => show(&name).await,
        ProjectCommands::Delete { name, yes } => delete(&name, yes).await,
    }
}

async fn create(name: &str, user: Option<String>) -> anyhow::Result<i32> {
    let store = store().await?;
    let user = user.unwrap_or_else(current_user);
    let project = store.create_project(name, &user).await?;

    println!("{} {}", "Created project".green(), project.name.bold());
    let dir = store.project_dir(&project.name);
    println!("  {}", dir.display().to_string().dimmed());
    let mounted = store.translator().to_mount_path(&dir);
    if mounted != dir {
        println!("  {} {}", "mounted from".dimmed(), mounted.display().to_string().dimmed());
    }
    Ok(0)
}

async fn list(user: Option<&str>) -> anyhow::Result<i32> {
    let projects = store().await?.list_projects(user).await?;

    if projects.is_empty() {
        println!("{}", "No projects found".yellow());
        println!("{}", "Use 'codebox project create <name>' to create one".dimmed());
        return Ok(0);
    }

    println!("{}", project_table(&projects));
    println!("Total: {} projects", projects.len().to_string().cyan());
    Ok(0)
}

async fn show(name: &str) -> anyhow::Result<i32> {
    let project = store()
        .await?
        .get_project(name)
        .await?
        .ok_or_else(|| anyhow!("Project '{}' not found", name))?;

    println!("{}", format!("Project {}", project.name).blue().bold());
    println!();
    println!("{:<14} {}", "ID:".bold(), project.id);
    println!("{:<14} {}", "Owner:".bold(), project.user_id);
    println!("{:<14} {}", "Status:".bold(), status_label(project.status));
    println!("{:<14} {}", "Total cost:".bold(), format_cost(project.total_cost_usd));
    println!("{:<14} {}", "Created:".bold(), format_date(&project.created_at));
    println!("{:<14} {}", "Updated:".bold(), format_date(&project.updated_at));

    if let Some(prompt) = &project.last_task_prompt {
        println!();
        println!("{}", "Last task".bold());
        println!("{:<14} {}", "Prompt:".bold(), prompt);
        if let Some(ms) = project.last_task_duration_ms {
            println!("{:<14} {}", "Duration:".bold(), format_duration_ms(ms));
        }
        if let Some(turns) = project.last_task_turns {
            println!("{:<14} {}", "Turns:".bold(), turns);
        }
        if let Some(cost) = project.last_task_cost_usd {
            println!("{:<14} {}", "Cost:".bold(), format_cost(cost));
        }
        if let Some(result) = &project.last_task_result {
            println!();
            println!("{}", result);
        }
    }
    Ok(0)
}

async fn delete(name: &str, yes: bool) -> anyhow::Result<i32> {
    let store = store().await?;
    if store.get_project(name).await?.is_none() {
        bail!("Project '{}' not found", name);
    }

    if !yes {
        let confirmed = Confirm::new(&format!("Delete project '{}'?", name))
            .with_default(false)
            .with_help_message("Workspace files and task history are kept")
            .prompt()?;
        if !confirmed {
            println!("{}", "Cancelled".yellow());
            return Ok(0);
        }
    }

    store.soft_delete(name).await?;
    println!("{} {}", "Deleted project".green(), name.bold());
    Ok(0)
}

pub async fn history(name: &str) -> anyhow::Result<i32> {
    let store = store().await?;
    let project = store
        .get_project(name)
        .await?
        .ok_or_else(|| anyhow!("Project '{}' not found", name))?;
    let tasks = store.list_tasks(&project.id).await?;

    if tasks.is_empty() {
        println!("{}", format!("No tasks have run on '{}' yet", name).yellow());
        return Ok(0);
    }

    println!("{}", task_table(&tasks));
    println!(
        "Total: {} tasks, {}",
        tasks.len().to_string().cyan(),
        format_cost(project.total_cost_usd).cyan()
    );
    Ok(0)
}
