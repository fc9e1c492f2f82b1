//! Core types and traits for the Strata multi-layer memory store.
//!
//! This crate defines the data model shared by the storage layers, the search
//! engine, the kernel and the HTTP surface. It contains no business logic.

pub mod collaborator;
pub mod config;
pub mod conversation;
pub mod error;
pub mod graph;
pub mod memory;
pub mod search;
pub mod serde_compat;
pub mod sync;
