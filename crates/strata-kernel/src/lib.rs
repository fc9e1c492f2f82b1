//! Core kernel for the Strata memory store.
//!
//! The kernel loads configuration, builds the storage layers and LLM
//! collaborators the tier allows, and runs the background sync loop.

pub mod background;
pub mod config;
pub mod error;
pub mod kernel;

pub use kernel::{KernelStats, MemoryKernel};
