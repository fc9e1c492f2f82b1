//! Conversation summarization.

use crate::llm::{tail_chars, ChatCompletion, ChatTurn, LlmClient, LlmError};
use async_trait::async_trait;
use strata_types::collaborator::Summarizer;
use strata_types::config::ExtractionConfig;
use strata_types::conversation::{ChatMessage, ChatRole};
use tracing::warn;

/// Only the tail of the transcript is sent.
pub const MAX_TRANSCRIPT_CHARS: usize = 6000;

const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 500;

const SUMMARIZE_PROMPT: &str = "Summarize this conversation into 5-10 concise bullet points.
Focus on:
- Decisions made
- Tasks discussed or assigned
- Preferences expressed
- Important facts learned
- Action items or next steps

Be specific. Use names and details. Skip pleasantries and meta-conversation.
Return the summary as a plain text bulleted list.";

pub struct LlmSummarizer {
    client: LlmClient,
    model: String,
}

impl LlmSummarizer {
    /// Shares the extraction endpoint and model.
    pub fn new(config: &ExtractionConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: LlmClient::new(&config.base_url, config.api_key.as_deref())?,
            model: config.model.clone(),
        })
    }
}

/// `User: ...` / `Assistant: ...` / `System: ...` lines.
pub fn build_transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let prefix = match m.role {
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
                ChatRole::System => "System",
            };
            format!("{prefix}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, messages: &[ChatMessage]) -> Option<String> {
        if messages.is_empty() {
            return None;
        }
        let transcript = build_transcript(messages);
        let request = ChatCompletion {
            model: &self.model,
            messages: vec![
                ChatTurn {
                    role: "system",
                    content: SUMMARIZE_PROMPT,
                },
                ChatTurn {
                    role: "user",
                    content: tail_chars(&transcript, MAX_TRANSCRIPT_CHARS),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            response_format: None,
        };
        match self.client.chat(&request).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(model = %self.model, messages = messages.len(), error = %e, "Summarization failed");
                None
            }
        }
    }
}
