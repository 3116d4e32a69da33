// ABOUTME: Entry point of the codebox binary
// ABOUTME: Parses the command line and dispatches to the project, task and sandbox commands

use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;

mod cli;

use cli::projects::ProjectCommands;
use codebox_cli::{exit_code, init_logging, EXIT_UNAVAILABLE};

#[derive(Parser)]
#[command(name = "codebox")]
#[command(about = "Codebox - run coding agents on project workspaces inside a Docker sandbox")]
#[command(version)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show sandbox, proxy and task health
    Status,
    /// Reset projects left running by a process that died mid-task
    Recover,
    /// Manage projects
    #[command(subcommand)]
    Project(ProjectCommands),
    /// Show the task history of a project
    History {
        /// Project name
        name: String,
    },
    /// Run the coding agent on a project and wait for it to finish
    Run {
        /// Project name
        name: String,
        /// Instructions for the agent
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
        /// Don't stream intermediate agent output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Copy an OAuth credentials file into the running sandbox
    PushCredentials {
        /// Path to the credentials JSON
        file: PathBuf,
    },
    /// Cancel running tasks and remove the sandbox and proxy containers
    Teardown {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match handle_command(cli.command).await {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(e) => {
            let code = exit_code(&e);
            if code == EXIT_UNAVAILABLE {
                eprintln!("{}", e.to_string().yellow().bold());
            } else {
                eprintln!("{} {:#}", "Error:".red().bold(), e);
            }
            process::exit(code);
        }
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Status => cli::sandbox::status().await,
        Commands::Recover => cli::sandbox::recover().await,
        Commands::Project(command) => cli::projects::handle_project_command(command).await,
        Commands::History { name } => cli::projects::history(&name).await,
        Commands::Run {
            name,
            prompt,
            quiet,
        } => cli::tasks::run(&name, &prompt.join(" "), quiet).await,
        Commands::PushCredentials { file } => cli::sandbox::push_credentials(&file).await,
        Commands::Teardown { yes } => cli::sandbox::teardown(yes).await,
    }
}
