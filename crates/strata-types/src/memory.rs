//! Memory records, extracted entities and relationships, and write requests.

use crate::serde_compat::{double_option, string_map_lenient};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Content floor below which entity extraction is never requested.
pub const EXTRACTION_MIN_CHARS: usize = 20;

/// Unique, time-sortable identifier for a memory (UUIDv7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Create a new MemoryId ordered by creation time.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MemoryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Visibility scope of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    /// About a specific end-user.
    User,
    /// Private to the owning agent.
    Agent,
    /// Visible to everyone.
    Global,
    /// Tied to a project.
    Project,
    /// Tied to a single conversation session.
    Session,
}

impl MemoryScope {
    /// All scopes, in declaration order.
    pub const ALL: [MemoryScope; 5] = [
        MemoryScope::User,
        MemoryScope::Agent,
        MemoryScope::Global,
        MemoryScope::Project,
        MemoryScope::Session,
    ];

    /// Scopes searched when the caller does not name any.
    pub const SEARCH_DEFAULT: [MemoryScope; 3] =
        [MemoryScope::User, MemoryScope::Agent, MemoryScope::Global];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Global => "global",
            Self::Project => "project",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "global" => Ok(Self::Global),
            "project" => Ok(Self::Project),
            "session" => Ok(Self::Session),
            other => Err(format!("unknown memory scope '{other}'")),
        }
    }
}

/// Where a memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    /// Stored on purpose by an agent or user.
    #[default]
    Explicit,
    /// Derived from other memories.
    Derived,
    /// Observed from tool output or the environment.
    Observation,
    /// Produced by summarizing a conversation.
    ConversationSummary,
    /// Produced by the entity extraction pipeline.
    EntityExtraction,
    /// Daily digest notes.
    DailyDigest,
    /// Imported from legacy markdown files.
    Migration,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Derived => "derived",
            Self::Observation => "observation",
            Self::ConversationSummary => "conversation_summary",
            Self::EntityExtraction => "entity_extraction",
            Self::DailyDigest => "daily_digest",
            Self::Migration => "migration",
        }
    }
}

impl fmt::Display for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemorySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explicit" => Ok(Self::Explicit),
            "derived" => Ok(Self::Derived),
            "observation" => Ok(Self::Observation),
            "conversation_summary" => Ok(Self::ConversationSummary),
            "entity_extraction" => Ok(Self::EntityExtraction),
            "daily_digest" => Ok(Self::DailyDigest),
            "migration" => Ok(Self::Migration),
            other => Err(format!("unknown memory source '{other}'")),
        }
    }
}

/// Entity vocabulary. Unknown names coerce to [`EntityType::Concept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum EntityType {
    Person,
    Project,
    Organization,
    Decision,
    Preference,
    Event,
    Tool,
    Location,
    Concept,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "Person",
            Self::Project => "Project",
            Self::Organization => "Organization",
            Self::Decision => "Decision",
            Self::Preference => "Preference",
            Self::Event => "Event",
            Self::Tool => "Tool",
            Self::Location => "Location",
            Self::Concept => "Concept",
        }
    }

    /// Map an arbitrary type name onto the vocabulary.
    pub fn coerce(name: &str) -> Self {
        match name {
            "Person" => Self::Person,
            "Project" => Self::Project,
            "Organization" => Self::Organization,
            "Decision" => Self::Decision,
            "Preference" => Self::Preference,
            "Event" => Self::Event,
            "Tool" => Self::Tool,
            "Location" => Self::Location,
            _ => Self::Concept,
        }
    }
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        Self::coerce(&s)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship vocabulary. Unknown names coerce to [`RelationshipType::RelatedTo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    WorksOn,
    Decided,
    Prefers,
    Knows,
    Uses,
    LocatedAt,
    BelongsTo,
    MentionedIn,
    RelatedTo,
    CreatedBy,
    DependsOn,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorksOn => "WORKS_ON",
            Self::Decided => "DECIDED",
            Self::Prefers => "PREFERS",
            Self::Knows => "KNOWS",
            Self::Uses => "USES",
            Self::LocatedAt => "LOCATED_AT",
            Self::BelongsTo => "BELONGS_TO",
            Self::MentionedIn => "MENTIONED_IN",
            Self::RelatedTo => "RELATED_TO",
            Self::CreatedBy => "CREATED_BY",
            Self::DependsOn => "DEPENDS_ON",
        }
    }

    /// Map an arbitrary relationship name onto the vocabulary.
    pub fn coerce(name: &str) -> Self {
        match name {
            "WORKS_ON" => Self::WorksOn,
            "DECIDED" => Self::Decided,
            "PREFERS" => Self::Prefers,
            "KNOWS" => Self::Knows,
            "USES" => Self::Uses,
            "LOCATED_AT" => Self::LocatedAt,
            "BELONGS_TO" => Self::BelongsTo,
            "MENTIONED_IN" => Self::MentionedIn,
            "CREATED_BY" => Self::CreatedBy,
            "DEPENDS_ON" => Self::DependsOn,
            _ => Self::RelatedTo,
        }
    }
}

impl From<String> for RelationshipType {
    fn from(s: String) -> Self {
        Self::coerce(&s)
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured mention pulled out of memory content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default, deserialize_with = "string_map_lenient")]
    pub properties: HashMap<String, String>,
}

impl ExtractedEntity {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
            properties: HashMap::new(),
        }
    }
}

/// A directed edge between two extracted entities. Only ever lives in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub from_entity: String,
    pub to_entity: String,
    pub relationship: RelationshipType,
    #[serde(default, deserialize_with = "string_map_lenient")]
    pub properties: HashMap<String, String>,
}

/// Output of the extraction collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relationships: Vec<ExtractedRelationship>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

/// The canonical unit of recall. The SQLite row is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub agent_id: String,
    pub scope: MemoryScope,
    pub subject_id: Option<String>,
    pub content: String,
    pub tags: Vec<String>,
    pub entities: Vec<ExtractedEntity>,
    pub source: MemorySource,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Content fingerprint; absent means the vector layer never saw this record.
    pub embedding_hash: Option<String>,
}

/// Request to create a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMemoryRequest {
    pub agent_id: String,
    pub scope: MemoryScope,
    #[serde(default)]
    pub subject_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: Option<MemorySource>,
    #[serde(default)]
    pub created_by: Option<String>,
    /// `Some(false)` opts out of extraction.
    #[serde(default)]
    pub extract_entities: Option<bool>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreateMemoryRequest {
    /// Minimal request with defaults for every optional field.
    pub fn new(agent_id: impl Into<String>, scope: MemoryScope, content: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            scope,
            subject_id: None,
            content: content.into(),
            tags: Vec::new(),
            source: None,
            created_by: None,
            extract_entities: None,
            expires_at: None,
        }
    }
}

/// Partial update. Absent fields are left untouched; for the nullable fields
/// an explicit `null` clears the value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMemoryRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub scope: Option<MemoryScope>,
    #[serde(default, deserialize_with = "double_option")]
    pub subject_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub extract_entities: Option<bool>,
}

/// Field-level patch applied to the primary store. `updated_at` is always bumped.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub scope: Option<MemoryScope>,
    pub subject_id: Option<Option<String>>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub entities: Option<Vec<ExtractedEntity>>,
    pub embedding_hash: Option<Option<String>>,
}

impl MemoryPatch {
    /// Apply the patch to an in-memory record (used to compute the new row).
    pub fn apply_to(&self, memory: &mut Memory) {
        if let Some(ref content) = self.content {
            memory.content = content.clone();
        }
        if let Some(ref tags) = self.tags {
            memory.tags = normalize_tags(tags.clone());
        }
        if let Some(scope) = self.scope {
            memory.scope = scope;
        }
        if let Some(ref subject_id) = self.subject_id {
            memory.subject_id = subject_id.clone();
        }
        if let Some(expires_at) = self.expires_at {
            memory.expires_at = expires_at;
        }
        if let Some(ref entities) = self.entities {
            memory.entities = entities.clone();
        }
        if let Some(ref hash) = self.embedding_hash {
            memory.embedding_hash = hash.clone();
        }
    }
}

/// Ordering for list queries (by `created_at`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filters for listing memories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListMemoriesQuery {
    pub agent_id: Option<String>,
    pub scope: Option<MemoryScope>,
    pub subject_id: Option<String>,
    pub source: Option<MemorySource>,
    /// Comma-separated tags; a memory matches if it carries any of them.
    pub tags: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    #[serde(default)]
    pub order: SortOrder,
}

impl ListMemoriesQuery {
    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Default::default()
        }
    }
}

/// Trim, drop empties and de-duplicate tags while keeping first-seen order.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
