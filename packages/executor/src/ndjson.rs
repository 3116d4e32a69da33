// ABOUTME: Parser for the agent's stream-json output (one JSON object per line)
// ABOUTME: Turns raw lines into system, assistant and result events and reassembles chunked stdout

use serde::{Deserialize, Serialize};

/// One meaningful event from the agent's output stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    System { subtype: String },
    /// Concatenated text blocks, followed by ` [tool, tool]` when tools were invoked
    Assistant { text: String },
    Result(ResultEvent),
}

/// Final summary the agent prints when a session ends
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEvent {
    pub subtype: String,
    pub is_error: bool,
    pub text: String,
    pub duration_ms: i64,
    pub num_turns: i64,
    pub cost_usd: f64,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawEvent {
    System {
        #[serde(default)]
        subtype: Option<String>,
    },
    Assistant {
        #[serde(default)]
        message: Option<RawMessage>,
    },
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: Option<bool>,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        duration_ms: Option<f64>,
        #[serde(default)]
        num_turns: Option<f64>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        /// Older CLI releases
        #[serde(default)]
        cost_usd: Option<f64>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        name: String,
    },
    #[serde(other)]
    Other,
}

/// Parses one line of agent output.
///
/// Blank lines, malformed JSON and unknown event types yield `None`.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<RawEvent>(line).ok()? {
        RawEvent::System { subtype } => Some(StreamEvent::System {
            subtype: subtype.unwrap_or_default(),
        }),
        RawEvent::Assistant { message } => {
            let blocks = message.map(|m| m.content).unwrap_or_default();
            Some(StreamEvent::Assistant {
                text: assistant_text(&blocks),
            })
        }
        RawEvent::Result {
            subtype,
            is_error,
            result,
            duration_ms,
            num_turns,
            total_cost_usd,
            cost_usd,
        } => Some(StreamEvent::Result(ResultEvent {
            subtype: subtype.unwrap_or_default(),
            is_error: is_error.unwrap_or(false),
            text: result.unwrap_or_default(),
            duration_ms: duration_ms.map(|v| v as i64).unwrap_or(0),
            num_turns: num_turns.map(|v| v as i64).unwrap_or(0),
            cost_usd: total_cost_usd.or(cost_usd).unwrap_or(0.0),
        })),
        RawEvent::Unknown => None,
    }
}

fn assistant_text(blocks: &[ContentBlock]) -> String {
    let mut text = String::new();
    let mut tools = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolUse { name } => tools.push(name.as_str()),
            ContentBlock::Other => {}
        }
    }

    if !tools.is_empty() {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(&format!("[{}]", tools.join(", ")));
    }
    text
}

/// Splits arbitrarily chunked output into complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every line it completed, without terminators
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Returns the unterminated tail, if any, at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
