// ABOUTME: Builds the agent CLI invocation for one task
// ABOUTME: Headless stream-json mode with the configured model and tool allow-list

use codebox_config::AgentConfig;

/// Arguments for a headless agent run.
///
/// `continue_session` resumes the project's previous conversation.
pub fn build_agent_command(agent: &AgentConfig, prompt: &str, continue_session: bool) -> Vec<String> {
    let mut command = vec![
        agent.cli_path.clone(),
        "-p".to_string(),
        prompt.to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
        "--model".to_string(),
        agent.model.clone(),
    ];

    if !agent.allowed_tools.is_empty() {
        command.push("--allowedTools".to_string());
        command.push(agent.allowed_tools.join(","));
    }

    if continue_session {
        command.push("--continue".to_string());
    }

    command
}
