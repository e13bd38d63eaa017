use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }

    /// Lenient mapping used when parsing provider responses; unrecognized
    /// roles are treated as assistant output.
    pub fn from_wire(role: &str) -> Role {
        match role {
            "system" => Role::System,
            "user" => Role::User,
            "tool" => Role::Tool,
            _ => Role::Assistant,
        }
    }
}

/// One piece of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    Image {
        url: String,
        #[serde(default)]
        is_local: bool,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: Value,
        arguments: Value,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>, is_local: bool) -> Self {
        Part::Image {
            url: url.into(),
            is_local,
        }
    }
}

/// True iff the part list carries nothing worth sending: every part is a
/// blank text or a blank-url image. Tool results are never empty.
pub fn is_empty_message(parts: &[Part]) -> bool {
    parts.iter().all(|part| match part {
        Part::Text { text } => text.trim().is_empty(),
        Part::Image { url, .. } => url.trim().is_empty(),
        Part::ToolResult { .. } => false,
    })
}

/// A single transcript entry. Never mutated in place: every edit produces a
/// new value, preserving the content-independent `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            parts,
        }
    }

    pub fn system(prompt: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(prompt)])
    }

    pub fn user(prompt: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(prompt)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::text(text)])
    }

    /// Replacement edit: same identity, new content.
    pub fn with_parts(&self, parts: Vec<Part>) -> Self {
        Self {
            id: self.id.clone(),
            role: self.role,
            parts,
        }
    }

    /// A message may be uploaded to a provider only if it carries text.
    pub fn is_valid_to_upload(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Text { .. }))
    }

    pub fn is_valid_to_show_actions(&self) -> bool {
        self.parts.iter().any(|p| match p {
            Part::Text { text } => !text.is_empty(),
            Part::Image { .. } => true,
            Part::ToolResult { .. } => false,
        })
    }

    /// Plain-text rendering: text parts verbatim, other parts blank.
    pub fn to_text(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                Part::Text { text } => text.as_str(),
                _ => "",
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// One-line summary used when building the title prompt.
    pub fn summary_text(&self) -> String {
        format!("{}: {}", self.role.as_str(), self.to_text())
    }

    /// Merge an incoming same-role message into this one. Text concatenates
    /// onto the first existing text part (created if absent); other part
    /// kinds are not supported for incremental merge and are dropped.
    fn merged_with(&self, incoming: &Message) -> Message {
        let mut parts = self.parts.clone();
        for part in &incoming.parts {
            match part {
                Part::Text { text } => {
                    if let Some(Part::Text { text: existing }) =
                        parts.iter_mut().find(|p| matches!(p, Part::Text { .. }))
                    {
                        existing.push_str(text);
                    } else {
                        parts.push(Part::text(text.clone()));
                    }
                }
                other => {
                    tracing::debug!(part = ?other, "delta part append not supported; dropped");
                }
            }
        }
        self.with_parts(parts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// One unit of provider response: a complete message for non-streaming
/// providers, a partial delta for streaming ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageChunk {
    pub id: String,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Option<Message>,
    pub message: Option<Message>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    /// The transcript was empty; the user message is always appended before
    /// generation starts, so this is a caller bug.
    EmptyTranscript,
    /// The chunk carried no choices.
    NoChoices,
    /// The consumed choice had neither a delta nor a message.
    MissingMessage,
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkError::EmptyTranscript => write!(f, "cannot fold a chunk into an empty transcript"),
            ChunkError::NoChoices => write!(f, "chunk carried no choices"),
            ChunkError::MissingMessage => write!(f, "chunk choice has neither delta nor message"),
        }
    }
}

impl std::error::Error for ChunkError {}

/// Fold a chunk into the message list.
///
/// Only `choices[0]` is consumed. If the incoming role differs from the last
/// message's role a new message is appended; otherwise the chunk merges into
/// the last message.
pub fn handle_message_chunk(
    messages: &[Message],
    chunk: &MessageChunk,
) -> Result<Vec<Message>, ChunkError> {
    let (last, _) = messages.split_last().ok_or(ChunkError::EmptyTranscript)?;
    let choice = chunk.choices.first().ok_or(ChunkError::NoChoices)?;
    let incoming = choice
        .delta
        .as_ref()
        .or(choice.message.as_ref())
        .ok_or(ChunkError::MissingMessage)?;

    let mut folded = messages.to_vec();
    if last.role != incoming.role {
        folded.push(incoming.clone());
    } else {
        let merged = last.merged_with(incoming);
        if let Some(slot) = folded.last_mut() {
            *slot = merged;
        }
    }
    Ok(folded)
}
