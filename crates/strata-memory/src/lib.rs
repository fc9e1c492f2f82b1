//! Layered storage for the Strata memory store.
//!
//! Three layers hold each memory:
//! - **Primary store** (SQLite + FTS5): the authoritative record, the
//!   conversation log and the sync queue
//! - **Vector layer** (Qdrant): semantic index, optional
//! - **Graph layer** (Apache AGE): entities and relationships, optional
//!
//! The [`StorageOrchestrator`] sequences writes across them, the
//! [`SyncQueueProcessor`] replays secondary-layer failures, and the
//! [`SearchEngine`] fans queries out and fuses the results.

pub mod cypher;
pub mod graph;
pub mod markdown;
pub mod migration;
pub mod orchestrator;
pub mod search;
pub mod sqlite;
pub mod sync_queue;
pub mod vector;

pub use graph::{AgeGraph, GraphStore};
pub use orchestrator::{content_hash, Layers, StorageOrchestrator};
pub use search::SearchEngine;
pub use sqlite::SqliteStore;
pub use sync_queue::SyncQueueProcessor;
pub use vector::{QdrantStore, VectorFilter, VectorStore};
