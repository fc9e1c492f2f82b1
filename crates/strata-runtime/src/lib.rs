//! LLM-backed collaborators for the Strata memory store.
//!
//! Every type here talks to an OpenAI-compatible HTTP API and implements one
//! of the collaborator traits from `strata_types::collaborator`. Failures are
//! logged and surface as `None` or an empty result; [`llm::LlmError`] never
//! crosses the trait boundary.

pub mod embedding;
pub mod extraction;
pub mod llm;
pub mod summarizer;

pub use embedding::OpenAiEmbedder;
pub use extraction::LlmExtractor;
pub use llm::{LlmClient, LlmError};
pub use summarizer::LlmSummarizer;
