// ABOUTME: Console formatting for projects, task history and health output
// ABOUTME: comfy-table layouts plus cost, duration and status rendering

use chrono::{DateTime, Local, Utc};
use codebox_core::{truncate, Project, ProjectStatus, Task};
use colored::{ColoredString, Colorize};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn project_table(projects: &[Project]) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Name", "Owner", "Status", "Last task", "Total cost", "Updated"]);

    for project in projects {
        table.add_row(vec![
            project.name.clone(),
            project.user_id.clone(),
            project.status.to_string(),
            project
                .last_task_prompt
                .as_deref()
                .map(|p| truncate(p, 40))
                .unwrap_or_else(|| "-".to_string()),
            format_cost(project.total_cost_usd),
            format_date(&project.updated_at),
        ]);
    }
    table
}

/// Task history, newest first as the store returns it
pub fn task_table(tasks: &[Task]) -> Table {
    let mut table = new_table();
    table.set_header(vec!["When", "Prompt", "Result", "Turns", "Duration", "Cost"]);

    for task in tasks {
        let result = if task.success { "ok" } else { "failed" };
        table.add_row(vec![
            format_date(&task.created_at),
            truncate(&task.prompt, 40),
            result.to_string(),
            task.num_turns.to_string(),
            format_duration_ms(task.duration_ms),
            format_cost(task.cost_usd),
        ]);
    }
    table
}

pub fn status_label(status: ProjectStatus) -> ColoredString {
    match status {
        ProjectStatus::Active => status.as_str().normal(),
        ProjectStatus::Running => status.as_str().cyan(),
        ProjectStatus::Completed => status.as_str().green(),
        ProjectStatus::Error => status.as_str().red(),
        ProjectStatus::Deleted => status.as_str().dimmed(),
    }
}

/// Dollar amount; sub-cent costs keep four decimals so they don't read as free
pub fn format_cost(usd: f64) -> String {
    if usd > 0.0 && usd < 0.01 {
        format!("${:.4}", usd)
    } else {
        format!("${:.2}", usd)
    }
}

pub fn format_duration_ms(ms: i64) -> String {
    let ms = ms.max(0);
    if ms < 1_000 {
        return format!("{}ms", ms);
    }
    let secs = ms / 1_000;
    if secs < 60 {
        return format!("{:.1}s", ms as f64 / 1_000.0);
    }
    let (hours, mins, secs) = (secs / 3_600, (secs % 3_600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {:02}m", hours, mins)
    } else {
        format!("{}m {:02}s", mins, secs)
    }
}

pub fn format_date(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}
