//! Black-box collaborators consumed by the storage core.
//!
//! None of these return errors: failures are reported as `None` or as an
//! empty result, and it is the implementation's job to log them.

use crate::conversation::ChatMessage;
use crate::memory::ExtractionResult;
use async_trait::async_trait;

/// Turns text into a dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text. `None` means the text could not be embedded.
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;

    /// Embed many texts. The output has the same length and order as the input.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await);
        }
        out
    }

    /// Dimensionality of produced vectors.
    fn dimensions(&self) -> usize;
}

/// Pulls entities and relationships out of free text.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Types and relationship names in the result are already coerced to the
    /// fixed vocabularies and property values are strings.
    async fn extract(&self, text: &str) -> ExtractionResult;
}

/// Condenses a transcript into a short summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[ChatMessage]) -> Option<String>;
}
