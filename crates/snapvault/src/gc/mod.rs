//! Snapshot garbage collector.
//!
//! Runs one collection cycle per period on a single task, so cycles
//! never overlap. Victims are whole chains. A delta is never deleted
//! while its anchor or any younger sibling survives, so deletion walks
//! each victim chain newest delta first and removes the anchor last. A
//! crash mid-cycle therefore leaves every surviving chain restorable.

mod exponential;
mod limit_based;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};
use utils::config::{RetentionPolicy, SnapshotterConfig};
use utils::task_manager::Listener;

use crate::snapshot::chain::{build_chains, SnapshotChain};
use crate::snapshot::collect_listing;
use crate::store::{SnapStore, StoreError};

/// Counters from one collection cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    /// Chains fully deleted
    pub deleted_chains: usize,
    /// Snapshot objects deleted
    pub deleted_objects: usize,
    /// Victim chains left alone because of in-use markers, the delta
    /// retention floor, or a mid-chain delete failure
    pub skipped_chains: usize,
}

/// Periodic snapshot garbage collector
#[derive(Debug)]
pub struct GarbageCollector<S> {
    /// Snapshot store being collected
    store: Arc<S>,
    /// Retention configuration
    config: SnapshotterConfig,
}

impl<S> GarbageCollector<S>
where
    S: SnapStore,
{
    /// Creates a collector over the given store
    #[must_use]
    #[inline]
    pub fn new(store: Arc<S>, config: SnapshotterConfig) -> Self {
        Self { store, config }
    }

    /// Run loop, spawned as the `GarbageCollector` task
    #[inline]
    pub async fn run(&self, listener: Listener) {
        loop {
            tokio::select! {
                () = sleep(*self.config.garbage_collection_period()) => {}
                () = listener.wait() => break,
            }
            match self.collect_once().await {
                Ok(stats) => {
                    if stats == GcStats::default() {
                        debug!("garbage collection cycle found nothing to delete");
                    } else {
                        info!(
                            deleted_chains = stats.deleted_chains,
                            deleted_objects = stats.deleted_objects,
                            skipped_chains = stats.skipped_chains,
                            "garbage collection cycle done"
                        );
                    }
                }
                // cycle aborted, retry at the next period
                Err(e) => warn!("garbage collection cycle aborted: {e}"),
            }
        }
        debug!("garbage collector run loop exits");
    }

    /// One collection cycle.
    ///
    /// A listing failure aborts the whole cycle. Failures on individual
    /// objects only skip the rest of that chain.
    #[inline]
    pub async fn collect_once(&self) -> Result<GcStats, StoreError> {
        let names = self.store.list().await?;
        let listing = collect_listing(&names);
        for name in &listing.malformed {
            warn!(%name, "unreadable snapshot name left in place");
        }
        let index = build_chains(listing.snapshots);
        for corrupt in index.corrupt() {
            warn!(
                anchor = corrupt.anchor.as_deref().unwrap_or("<none>"),
                "corrupt chain left in place: {}", corrupt.corruption
            );
        }

        let chains = index.chains();
        let victims = match self.config.retention_policy() {
            RetentionPolicy::LimitBased(max_backups) => {
                limit_based::victims(chains, max_backups)
            }
            RetentionPolicy::Exponential => {
                exponential::victims(chains, utils::timestamp())
            }
        };

        let mut stats = GcStats::default();
        for idx in victims {
            let Some(chain) = chains.get(idx) else {
                continue;
            };
            if self.chain_is_protected(chain).await {
                stats.skipped_chains = stats.skipped_chains.wrapping_add(1);
                continue;
            }
            match self.delete_chain(chain).await {
                Ok(deleted) => {
                    stats.deleted_chains = stats.deleted_chains.wrapping_add(1);
                    stats.deleted_objects = stats.deleted_objects.wrapping_add(deleted);
                }
                Err(e) => {
                    warn!(
                        anchor = %chain.full().object_name(),
                        "chain deletion abandoned: {e}"
                    );
                    stats.skipped_chains = stats.skipped_chains.wrapping_add(1);
                }
            }
        }
        Ok(stats)
    }

    /// Whether a victim chain must be left alone this cycle
    async fn chain_is_protected(&self, chain: &SnapshotChain) -> bool {
        let retention = *self.config.delta_snapshot_retention_period();
        if retention > Duration::ZERO {
            let now = utils::timestamp();
            let floor = now.saturating_sub(retention.as_secs());
            if chain.deltas().iter().any(|d| d.created_at() > floor) {
                debug!(
                    anchor = %chain.full().object_name(),
                    "chain kept, deltas inside the retention floor"
                );
                return true;
            }
        }
        for member in chain.members() {
            if self.store.is_in_use(&member.object_name()).await {
                debug!(
                    name = %member.object_name(),
                    "chain kept, snapshot is marked in use"
                );
                return true;
            }
        }
        false
    }

    /// Deletes a whole chain, newest delta first and the anchor last
    async fn delete_chain(&self, chain: &SnapshotChain) -> Result<usize, StoreError> {
        let mut deleted = 0_usize;
        for delta in chain.deltas().iter().rev() {
            self.store.delete(&delta.object_name()).await?;
            deleted = deleted.wrapping_add(1);
        }
        self.store.delete(&chain.full().object_name()).await?;
        Ok(deleted.wrapping_add(1))
    }
}
