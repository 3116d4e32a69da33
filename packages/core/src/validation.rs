// ABOUTME: Input validation shared across Codebox packages
// ABOUTME: Project name rules and string helpers used before anything touches disk or Docker

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Allowed project names. The name doubles as a directory name inside the
/// sandbox, so it must stay shell- and path-safe.
pub const PROJECT_NAME_PATTERN: &str = r"^[a-z0-9][a-z0-9-]{0,30}[a-z0-9]$";

static PROJECT_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(PROJECT_NAME_PATTERN).unwrap_or_else(|e| panic!("invalid project name regex: {e}"))
});

/// Validation error for a single field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validates a project name against [`PROJECT_NAME_PATTERN`]
pub fn validate_project_name(name: &str) -> Result<(), ValidationError> {
    if PROJECT_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "name",
            format!(
                "Invalid project name '{}': use 2-32 lowercase letters, digits or hyphens, \
                 starting and ending with a letter or digit",
                name
            ),
        ))
    }
}

/// Truncates a string to at most `max_chars` characters, appending an ellipsis
/// when anything was cut.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
