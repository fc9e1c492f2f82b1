//! Search: strategy selection, per-layer fan-out and score fusion.

pub mod engine;
pub mod ranker;
pub mod strategy;

pub use engine::SearchEngine;
pub use strategy::{extract_entity_from_query, select_strategy};
