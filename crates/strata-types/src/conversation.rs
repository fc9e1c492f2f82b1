//! Conversation transcript entries and summarization requests.

use crate::memory::{ExtractedEntity, MemoryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Label used when rendering a transcript.
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
            Self::System => "System",
        }
    }
}

impl std::str::FromStr for ChatRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown chat role '{other}'")),
        }
    }
}

/// Append-only transcript row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationLogEntry {
    pub agent_id: String,
    pub session_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    pub role: ChatRole,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// One message handed to the summarizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Request to summarize a conversation into a session memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeRequest {
    pub agent_id: String,
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_channel")]
    pub channel: String,
    pub messages: Vec<ChatMessage>,
}

fn default_channel() -> String {
    "unknown".to_string()
}

/// Stored summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeResponse {
    pub memory_id: MemoryId,
    pub summary: String,
    pub entities: Vec<ExtractedEntity>,
}
