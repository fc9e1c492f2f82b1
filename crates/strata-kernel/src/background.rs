//! Background reconciliation loop.
//!
//! Drains the sync queue once at startup and then on a fixed interval until
//! the shutdown signal flips. A tick that lands while the previous cycle is
//! still running is skipped.

use std::sync::Arc;
use std::time::Duration;
use strata_memory::SyncQueueProcessor;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Spawn the sync loop bound to `shutdown`.
pub fn spawn_sync_loop(
    processor: Arc<SyncQueueProcessor>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "Starting sync loop");

    tokio::spawn(async move {
        loop {
            if *shutdown.borrow() {
                break;
            }

            if processor.is_running() {
                debug!("Sync loop: skipping tick (busy)");
            } else if let Err(e) = processor.run_once().await {
                warn!(error = %e, "Sync cycle failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Sync loop: shutdown sender dropped");
                    }
                    break;
                }
            }
        }
        info!("Sync loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_memory::SqliteStore;
    use strata_types::memory::MemoryId;
    use strata_types::sync::{SyncLayer, SyncOperation};

    #[tokio::test]
    async fn test_loop_retries_until_purge_and_stops_on_signal() {
        let sqlite = SqliteStore::open_in_memory().unwrap();
        sqlite
            .enqueue_sync(&MemoryId::new().to_string(), SyncLayer::Qdrant, SyncOperation::Delete)
            .unwrap();
        let processor = Arc::new(SyncQueueProcessor::new(sqlite.clone(), None, None, None));

        let (tx, rx) = watch::channel(false);
        let handle = spawn_sync_loop(processor, Duration::from_millis(10), rx);

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while !sqlite.pending_sync_items(10).unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(drained.is_ok(), "exhausted item was never purged");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_cycle_runs_immediately() {
        let sqlite = SqliteStore::open_in_memory().unwrap();
        sqlite
            .enqueue_sync(&MemoryId::new().to_string(), SyncLayer::Age, SyncOperation::Delete)
            .unwrap();
        let processor = Arc::new(SyncQueueProcessor::new(sqlite.clone(), None, None, None));

        let (tx, rx) = watch::channel(false);
        let handle = spawn_sync_loop(processor, Duration::from_secs(3600), rx);

        let attempted = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let items = sqlite.pending_sync_items(10).unwrap();
                if items.first().map_or(false, |i| i.attempts >= 1) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(attempted.is_ok());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
    }
}
