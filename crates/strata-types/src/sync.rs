//! Sync queue items, per-layer sync status, and health reporting.

use crate::config::Tier;
use crate::memory::Memory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Attempts after which a queue item is abandoned.
pub const MAX_SYNC_ATTEMPTS: u32 = 5;

/// Secondary layer a queue item targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncLayer {
    Qdrant,
    Age,
}

impl SyncLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qdrant => "qdrant",
            Self::Age => "age",
        }
    }
}

impl fmt::Display for SyncLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncLayer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qdrant" => Ok(Self::Qdrant),
            "age" => Ok(Self::Age),
            other => Err(format!("unknown sync layer '{other}'")),
        }
    }
}

/// Operation to replay against a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Upsert,
    Delete,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsert" => Ok(Self::Upsert),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown sync operation '{other}'")),
        }
    }
}

/// A pending reconciliation. Unique per (memory_id, layer, operation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: i64,
    pub memory_id: String,
    pub layer: SyncLayer,
    pub operation: SyncOperation,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of propagating one write to one secondary layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerSyncStatus {
    Ok,
    Queued,
    Disabled,
}

/// Per-layer propagation result for a write. L1 is always `ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub sqlite: LayerSyncStatus,
    pub qdrant: LayerSyncStatus,
    pub age: LayerSyncStatus,
}

impl SyncStatus {
    pub fn new(qdrant: LayerSyncStatus, age: LayerSyncStatus) -> Self {
        Self {
            sqlite: LayerSyncStatus::Ok,
            qdrant,
            age,
        }
    }
}

/// A written memory with its propagation status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryWriteResult {
    #[serde(flatten)]
    pub memory: Memory,
    pub sync_status: SyncStatus,
}

/// Counts from one queue drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunStats {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Health of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerHealth {
    Ok,
    Error,
    Disabled,
}

/// System health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub sqlite: LayerHealth,
    pub qdrant: LayerHealth,
    pub age: LayerHealth,
    pub tier: Tier,
    pub uptime_secs: u64,
    /// Diagnostic strings keyed by layer name, present only on errors.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}
