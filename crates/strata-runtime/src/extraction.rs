//! Entity and relationship extraction through a JSON-mode chat completion.

use crate::llm::{truncate_chars, ChatCompletion, ChatTurn, LlmClient, LlmError, ResponseFormat};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use strata_types::collaborator::Extractor;
use strata_types::config::ExtractionConfig;
use strata_types::memory::{
    EntityType, ExtractedEntity, ExtractedRelationship, ExtractionResult, RelationshipType,
};
use tracing::{debug, warn};

/// Text shorter than this (trimmed, in chars) is not sent to the model.
pub const MIN_EXTRACT_CHARS: usize = 20;

/// Input is truncated to this many chars.
pub const MAX_EXTRACT_CHARS: usize = 4000;

const TEMPERATURE: f32 = 0.1;
const MAX_TOKENS: u32 = 1500;

const EXTRACTION_PROMPT: &str = r#"Extract entities and relationships from this memory text.

Return JSON with this exact structure:
{
  "entities": [
    {"name": "exact name as mentioned", "type": "Person|Project|Organization|Decision|Preference|Event|Tool|Location|Concept", "properties": {"key": "value"}}
  ],
  "relationships": [
    {"from_entity": "entity name", "to_entity": "entity name", "relationship": "WORKS_ON|DECIDED|PREFERS|KNOWS|USES|LOCATED_AT|BELONGS_TO|RELATED_TO|CREATED_BY|DEPENDS_ON", "properties": {"context": "brief context"}}
  ]
}

Rules:
- Only extract entities that are clearly stated
- Use the most specific entity type possible
- Use full person names when the text gives them
- For preferences, put the category in the key and the preference in the value
- Only include properties the text states explicitly
- If nothing is found, return {"entities": [], "relationships": []}"#;

/// Extractor backed by a chat model in JSON mode.
pub struct LlmExtractor {
    client: LlmClient,
    model: String,
}

impl LlmExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: LlmClient::new(&config.base_url, config.api_key.as_deref())?,
            model: config.model.clone(),
        })
    }

    async fn request(&self, text: &str) -> Result<ExtractionResult, LlmError> {
        let request = ChatCompletion {
            model: &self.model,
            messages: vec![
                ChatTurn {
                    role: "system",
                    content: EXTRACTION_PROMPT,
                },
                ChatTurn {
                    role: "user",
                    content: truncate_chars(text, MAX_EXTRACT_CHARS),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            response_format: Some(ResponseFormat::json_object()),
        };
        let content = self.client.chat(&request).await?;
        let parsed: Value =
            serde_json::from_str(&content).map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(validate_extraction(&parsed))
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, text: &str) -> ExtractionResult {
        if text.trim().chars().count() < MIN_EXTRACT_CHARS {
            return ExtractionResult::default();
        }
        match self.request(text).await {
            Ok(result) => {
                debug!(
                    entities = result.entities.len(),
                    relationships = result.relationships.len(),
                    "Extraction finished"
                );
                result
            }
            Err(e) => {
                warn!(model = %self.model, error = %e, "Extraction failed");
                ExtractionResult::default()
            }
        }
    }
}

/// Keep well-formed entries of a model response and coerce them onto the
/// fixed vocabularies. Malformed entries are dropped.
pub fn validate_extraction(data: &Value) -> ExtractionResult {
    let mut result = ExtractionResult::default();

    if let Some(entities) = data.get("entities").and_then(Value::as_array) {
        for e in entities {
            let (Some(name), Some(kind)) = (
                e.get("name").and_then(Value::as_str),
                e.get("type").and_then(Value::as_str),
            ) else {
                continue;
            };
            result.entities.push(ExtractedEntity {
                name: name.to_string(),
                entity_type: EntityType::coerce(kind),
                properties: stringify_properties(e.get("properties")),
            });
        }
    }

    if let Some(relationships) = data.get("relationships").and_then(Value::as_array) {
        for r in relationships {
            let (Some(from), Some(to), Some(rel)) = (
                r.get("from_entity").and_then(Value::as_str),
                r.get("to_entity").and_then(Value::as_str),
                r.get("relationship").and_then(Value::as_str),
            ) else {
                continue;
            };
            result.relationships.push(ExtractedRelationship {
                from_entity: from.to_string(),
                to_entity: to.to_string(),
                relationship: RelationshipType::coerce(rel),
                properties: stringify_properties(r.get("properties")),
            });
        }
    }

    result
}

fn stringify_properties(value: Option<&Value>) -> HashMap<String, String> {
    let Some(Value::Object(map)) = value else {
        return HashMap::new();
    };
    map.iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), s)
        })
        .collect()
}
