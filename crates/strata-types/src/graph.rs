//! Shapes returned by graph-layer queries.

use serde::{Deserialize, Serialize};

/// Direction of an edge relative to the entity being inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    Outgoing,
    Incoming,
}

/// One edge touching an entity, with the node on its far side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEdge {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub direction: EdgeDirection,
    /// Properties of the node at the other end.
    pub target: serde_json::Value,
}

/// An entity node and every edge touching it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDetail {
    pub entity: serde_json::Value,
    pub relationships: Vec<EntityEdge>,
}

/// An entity reachable from another within a bounded number of hops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub entity: serde_json::Value,
    pub relationship: String,
    pub distance: u32,
}

/// Node and edge totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: u64,
    pub relationship_count: u64,
}
