//! The write-behind boundary between [`crate::memdb::MemDb`] and whatever
//! relational store backs it (§4.2: "the write path to the durable store is
//! coalesced into a single background committer").
//!
//! No handler ever opens a transaction directly; only [`run_snapshot_loop`]
//! talks to a [`DurableStore`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::memdb::{DirtySnapshot, MemDb};

#[async_trait::async_trait]
pub trait DurableStore: Send + Sync {
    async fn persist_snapshot(&self, snapshot: &DirtySnapshot) -> Result<(), String>;
}

/// Runs until `shutdown` reports `true`, snapshotting dirty tables on a
/// `snapshot_interval` ticker. Forces one final snapshot on the way out so a
/// graceful shutdown never drops the last batch of writes (§5 "Cancellation
/// and timeouts").
pub async fn run_snapshot_loop(
    memdb: Arc<MemDb>,
    store: Arc<dyn DurableStore>,
    snapshot_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(snapshot_interval);
    ticker.tick().await; // first tick fires immediately; skip it.

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                commit_once(&memdb, store.as_ref()).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("flushing final snapshot before shutdown");
    commit_once(&memdb, store.as_ref()).await;
}

async fn commit_once(memdb: &MemDb, store: &dyn DurableStore) {
    let snapshot = memdb.take_dirty().await;
    if snapshot.is_empty() {
        return;
    }
    if let Err(err) = store.persist_snapshot(&snapshot).await {
        error!(error = %err, "failed to persist snapshot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChannelType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        commits: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl DurableStore for CountingStore {
        async fn persist_snapshot(&self, _snapshot: &DirtySnapshot) -> Result<(), String> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_forces_a_final_snapshot() {
        let memdb = Arc::new(MemDb::new());
        memdb
            .create_channel("general", "General", None, ChannelType::Chat, 24, None, false, 0)
            .await
            .unwrap();

        let commits = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(CountingStore {
            commits: commits.clone(),
        });
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_snapshot_loop(
            memdb,
            store,
            Duration::from_secs(3600),
            rx,
        ));
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(commits.load(Ordering::SeqCst), 1);
    }
}
