// ABOUTME: TaskObserver that streams task progress and the final outcome to the terminal
// ABOUTME: Used by `codebox run` while it waits for the agent to finish

use codebox_core::Project;
use codebox_executor::{TaskObserver, TaskOutcome, TaskOutcomeKind};
use colored::Colorize;

use crate::format::{format_cost, format_duration_ms};

#[derive(Debug, Default)]
pub struct ConsoleObserver {
    quiet: bool,
}

impl ConsoleObserver {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

/// One-line summary printed under the agent's final text
pub fn outcome_summary(outcome: &TaskOutcome) -> String {
    let label = match outcome.kind {
        TaskOutcomeKind::Completed => "completed",
        TaskOutcomeKind::Failed => "failed",
        TaskOutcomeKind::TimedOut => "timed out",
        TaskOutcomeKind::Cancelled => "cancelled",
        TaskOutcomeKind::OomKilled => "out of memory",
    };
    let mut summary = format!(
        "{} in {} | {} turn(s) | {}",
        label,
        format_duration_ms(outcome.duration_ms),
        outcome.num_turns,
        format_cost(outcome.cost_usd)
    );
    if let Some(code) = outcome.exit_code.filter(|c| *c != 0) {
        summary.push_str(&format!(" | exit {}", code));
    }
    summary
}

impl TaskObserver for ConsoleObserver {
    fn on_progress(&self, text: &str) {
        if self.quiet {
            return;
        }
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            eprintln!("{} {}", "│".dimmed(), line.dimmed());
        }
    }

    fn on_complete(&self, outcome: &TaskOutcome, project: &Project) {
        println!("{}", outcome.text);
        println!();
        let summary = format!("[{}] {}", project.name, outcome_summary(outcome));
        if outcome.success {
            println!("{}", summary.green().bold());
        } else {
            println!("{}", summary.red().bold());
        }
    }

    fn on_error(&self, message: &str, project: &Project) {
        eprintln!("{} [{}] {}", "Error:".red().bold(), project.name, message);
    }
}
