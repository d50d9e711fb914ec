//! Snapshot scheduler.
//!
//! Drives full snapshots on a cron schedule and delta snapshots on a
//! fixed period, with an early delta when the unsnapshotted backlog
//! grows past the configured memory limit. Only one snapshot write is
//! in flight at a time because the whole scheduler runs on a single
//! task.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use utils::config::SnapshotterConfig;
use utils::task_manager::Listener;

use crate::datasource::{DataSource, DataSourceError};
use crate::snapshot::{collect_listing, SnapKind, SnapshotMetadata};
use crate::store::{SnapStore, StoreError};

/// Write attempts before the scheduler gives up and deactivates
const MAX_WRITE_ATTEMPTS: u32 = 3;
/// Backoff after the first failed attempt, doubled per retry
const RETRY_BACKOFF: Duration = Duration::from_secs(1);
/// How often the backlog size is probed against the memory limit
const BACKLOG_PROBE_PERIOD: Duration = Duration::from_secs(1);
/// Park interval of the full snapshot timer when the schedule has no
/// upcoming occurrence
const FULL_TIMER_PARK: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Errors from a snapshot write
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotterError {
    /// The key-value store failed
    #[error("data source error: {0}")]
    Source(#[from] DataSourceError),
    /// The snapshot store failed
    #[error("snapshot store error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one snapshot attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    /// A snapshot object was written covering up to this revision
    Written(i64),
    /// The store had nothing new, no object was written
    NothingNew,
}

/// Snapshot scheduler.
///
/// Created inactive. `start` and `stop` follow the member's leadership
/// and are safe to call from any task; the run loop reacts promptly via
/// an internal notifier.
#[derive(Debug)]
pub struct Snapshotter<S, D> {
    /// Snapshot store the objects are written to
    store: Arc<S>,
    /// Key-value store being snapshotted
    source: Arc<D>,
    /// Scheduler configuration
    config: SnapshotterConfig,
    /// Whether the scheduler is currently active
    active: AtomicBool,
    /// Wakes the run loop on `start` and `stop`
    wake: Notify,
}

impl<S, D> Snapshotter<S, D>
where
    S: SnapStore,
    D: DataSource,
{
    /// Creates an inactive scheduler
    #[must_use]
    #[inline]
    pub fn new(store: Arc<S>, source: Arc<D>, config: SnapshotterConfig) -> Self {
        Self {
            store,
            source,
            config,
            active: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Activates the scheduler. Idempotent.
    #[inline]
    pub fn start(&self) {
        if !self.active.swap(true, Ordering::Relaxed) {
            info!("snapshotter activated");
        }
        self.wake.notify_waiters();
    }

    /// Deactivates the scheduler, cancelling any in-flight write. Idempotent.
    #[inline]
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::Relaxed) {
            info!("snapshotter deactivated");
        }
        self.wake.notify_waiters();
    }

    /// Whether the scheduler is currently active
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Run loop, spawned as the `Snapshotter` task
    #[inline]
    pub async fn run(&self, listener: Listener) {
        let schedule = match cron::Schedule::from_str(self.config.full_snapshot_schedule()) {
            Ok(s) => s,
            Err(e) => {
                // `SnapshotterConfig::validate` catches this before spawn
                error!("invalid full snapshot schedule: {e}");
                return;
            }
        };
        loop {
            if !self.is_active() {
                let notified = self.wake.notified();
                tokio::pin!(notified);
                // register before the re-check so a concurrent `start` is not lost
                notified.as_mut().enable();
                if !self.is_active() {
                    tokio::select! {
                        () = notified => {}
                        () = listener.wait() => break,
                    }
                }
                continue;
            }
            if let Err(e) = self.active_session(&schedule, &listener).await {
                error!("snapshotter giving up after repeated failures: {e}");
                self.stop();
            }
            if listener.is_shutdown() {
                break;
            }
        }
        debug!("snapshotter run loop exits");
    }

    /// One activation: initial full if needed, then the timer loop.
    ///
    /// Returns when deactivated or shut down, or with an error once
    /// retries are exhausted.
    #[allow(clippy::arithmetic_side_effects)] // `Instant` deadline arithmetic
    async fn active_session(
        &self,
        schedule: &cron::Schedule,
        listener: &Listener,
    ) -> Result<(), SnapshotterError> {
        let mut cursor = self.resume_cursor().await?;
        if cursor.is_none() {
            let Some(outcome) = self
                .guarded_write(SnapKind::Full, 0, listener)
                .await?
            else {
                return Ok(());
            };
            if let WriteOutcome::Written(rev) = outcome {
                cursor = Some(rev);
            }
        }
        let Some(mut cursor) = cursor else {
            return Ok(());
        };
        info!(cursor, "snapshot cursor established");

        let delta_enabled = self.config.delta_snapshotting_enabled();
        let memory_limit = self.config.memory_limit_bytes();
        let mut bytes_baseline = self.source.accumulated_bytes().await?;
        let mut full_deadline = next_occurrence(schedule);
        let mut delta_deadline = Instant::now() + *self.config.delta_snapshot_period();
        loop {
            if !self.is_active() {
                return Ok(());
            }
            let due = tokio::select! {
                () = tokio::time::sleep_until(full_deadline) => Some(SnapKind::Full),
                () = tokio::time::sleep_until(delta_deadline), if delta_enabled => {
                    Some(SnapKind::Delta)
                }
                () = sleep(BACKLOG_PROBE_PERIOD), if delta_enabled && memory_limit > 0 => {
                    let accumulated = self.source.accumulated_bytes().await?;
                    (accumulated.saturating_sub(bytes_baseline) >= memory_limit)
                        .then_some(SnapKind::Delta)
                }
                () = self.wake.notified() => {
                    if self.is_active() {
                        continue;
                    }
                    return Ok(());
                }
                () = listener.wait() => return Ok(()),
            };
            let Some(kind) = due else { continue };
            let start = match kind {
                SnapKind::Full => 0,
                SnapKind::Delta => cursor,
            };
            let Some(outcome) = self.guarded_write(kind, start, listener).await? else {
                return Ok(());
            };
            if let WriteOutcome::Written(rev) = outcome {
                cursor = rev;
            }
            bytes_baseline = self.source.accumulated_bytes().await?;
            match kind {
                SnapKind::Full => {
                    full_deadline = next_occurrence(schedule);
                    delta_deadline = Instant::now() + *self.config.delta_snapshot_period();
                }
                SnapKind::Delta => {
                    delta_deadline = Instant::now() + *self.config.delta_snapshot_period();
                }
            }
        }
    }

    /// Finds the revision covered by existing snapshots, if any full exists
    async fn resume_cursor(&self) -> Result<Option<i64>, SnapshotterError> {
        let names = self.store.list().await?;
        let listing = collect_listing(&names);
        if !listing.has_full() {
            return Ok(None);
        }
        Ok(listing.latest_revision())
    }

    /// Write with retry, racing deactivation and shutdown.
    ///
    /// `None` means the write was cancelled by `stop` or shutdown.
    async fn guarded_write(
        &self,
        kind: SnapKind,
        start: i64,
        listener: &Listener,
    ) -> Result<Option<WriteOutcome>, SnapshotterError> {
        tokio::select! {
            res = self.write_with_retry(kind, start) => res.map(Some),
            () = self.wake.notified() => {
                if self.is_active() {
                    // spurious wake from a redundant `start`, retry entire write
                    Box::pin(self.guarded_write(kind, start, listener)).await
                } else {
                    warn!(?kind, "in-flight snapshot cancelled by deactivation");
                    Ok(None)
                }
            }
            () = listener.wait() => {
                warn!(?kind, "in-flight snapshot cancelled by shutdown");
                Ok(None)
            }
        }
    }

    /// Retries a snapshot write with exponential backoff
    async fn write_with_retry(
        &self,
        kind: SnapKind,
        start: i64,
    ) -> Result<WriteOutcome, SnapshotterError> {
        let mut backoff = RETRY_BACKOFF;
        let mut attempt = 0_u32;
        loop {
            attempt = attempt.wrapping_add(1);
            match self.take_snapshot(kind, start).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(?kind, attempt, "snapshot attempt failed: {e}");
                    sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Streams one snapshot from the source into the store
    async fn take_snapshot(
        &self,
        kind: SnapKind,
        start: i64,
    ) -> Result<WriteOutcome, SnapshotterError> {
        let (reader, last) = match kind {
            SnapKind::Full => self.source.stream_full().await?,
            SnapKind::Delta => {
                if self.source.current_revision().await? == start {
                    debug!(start, "no new revisions, delta snapshot skipped");
                    return Ok(WriteOutcome::NothingNew);
                }
                let (reader, last) = self.source.stream_delta_since(start).await?;
                if last == start {
                    // revisions past the cursor carried no snapshottable events
                    debug!(start, "empty delta stream, snapshot skipped");
                    return Ok(WriteOutcome::NothingNew);
                }
                (reader, last)
            }
        };
        let meta = SnapshotMetadata::new(kind, start, last, utils::timestamp());
        let name = meta.object_name();
        let written = self.store.put(&name, reader).await?;
        info!(%name, written, "snapshot written");
        Ok(WriteOutcome::Written(last))
    }
}

/// Duration-based deadline of the schedule's next occurrence.
///
/// A schedule whose occurrences are exhausted parks the timer far in the
/// future; an immediate deadline here would make the run loop write full
/// snapshots back to back.
#[allow(clippy::arithmetic_side_effects)] // datetime subtraction
fn next_occurrence(schedule: &cron::Schedule) -> Instant {
    let Some(next) = schedule.upcoming(chrono::Utc).next() else {
        warn!("full snapshot schedule has no upcoming occurrence, timer parked");
        return Instant::now() + FULL_TIMER_PARK;
    };
    let until = (next - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Instant::now() + until
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use utils::config::RetentionPolicyConfig;
    use utils::task_manager::{tasks::TaskName, TaskManager};

    use super::*;
    use crate::datasource::MockDataSource;
    use crate::snapshot::Listing;
    use crate::store::MemorySnapStore;

    fn reader(data: &[u8]) -> crate::store::SnapReader {
        Box::new(Cursor::new(data.to_vec()))
    }

    fn test_config(delta_period: Duration) -> SnapshotterConfig {
        // far future cron so only delta timing drives the tests
        SnapshotterConfig::new(
            "0 0 0 1 1 ? 2100".to_owned(),
            delta_period,
            10 * 1024 * 1024,
            RetentionPolicyConfig::Exponential,
            Duration::from_secs(60),
            7,
            Duration::ZERO,
        )
    }

    async fn run_for(
        snapshotter: Arc<Snapshotter<MemorySnapStore, MockDataSource>>,
        duration: Duration,
    ) {
        let task_manager = TaskManager::new();
        task_manager.spawn(TaskName::Snapshotter, |l| async move {
            snapshotter.run(l).await;
        });
        sleep(duration).await;
        task_manager.shutdown(true).await;
    }

    #[tokio::test(start_paused = true)]
    async fn activation_writes_an_initial_full_snapshot() {
        let store = Arc::new(MemorySnapStore::new());
        let mut source = MockDataSource::new();
        source.expect_accumulated_bytes().returning(|| Ok(0));
        source
            .expect_stream_full()
            .times(1)
            .returning(|| Ok((reader(b"full"), 42)));
        let snapshotter = Arc::new(Snapshotter::new(
            Arc::clone(&store),
            Arc::new(source),
            test_config(Duration::from_secs(3600)),
        ));
        snapshotter.start();
        run_for(Arc::clone(&snapshotter), Duration::from_secs(5)).await;

        let names = store.list().await.unwrap();
        assert_eq!(names.len(), 1);
        let listing = collect_listing(&names);
        assert!(listing.has_full());
        assert_eq!(listing.latest_revision(), Some(42));
    }

    fn counted_revisions(listing: &Listing) -> Vec<(SnapKind, i64, i64)> {
        let mut snaps = listing.snapshots.clone();
        snaps.sort_by_key(|m| (m.last_revision(), m.created_at()));
        snaps
            .iter()
            .map(|m| (m.kind(), m.start_revision(), m.last_revision()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn delta_period_produces_contiguous_deltas() {
        let store = Arc::new(MemorySnapStore::new());
        let mut source = MockDataSource::new();
        source.expect_accumulated_bytes().returning(|| Ok(0));
        source.expect_current_revision().returning(|| Ok(i64::MAX));
        source
            .expect_stream_full()
            .returning(|| Ok((reader(b"full"), 10)));
        let mut next = 10_i64;
        source
            .expect_stream_delta_since()
            .returning(move |start| {
                assert_eq!(start, next);
                next += 5;
                Ok((reader(b"delta"), next))
            });
        let snapshotter = Arc::new(Snapshotter::new(
            Arc::clone(&store),
            Arc::new(source),
            test_config(Duration::from_secs(20)),
        ));
        snapshotter.start();
        run_for(Arc::clone(&snapshotter), Duration::from_secs(50)).await;

        let listing = collect_listing(&store.list().await.unwrap());
        assert_eq!(
            counted_revisions(&listing),
            vec![
                (SnapKind::Full, 0, 10),
                (SnapKind::Delta, 10, 15),
                (SnapKind::Delta, 15, 20),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delta_is_skipped_when_nothing_changed() {
        let store = Arc::new(MemorySnapStore::new());
        let mut source = MockDataSource::new();
        source.expect_accumulated_bytes().returning(|| Ok(0));
        // revision never moves past the cursor
        source.expect_current_revision().returning(|| Ok(10));
        source
            .expect_stream_full()
            .returning(|| Ok((reader(b"full"), 10)));
        source.expect_stream_delta_since().times(0);
        let snapshotter = Arc::new(Snapshotter::new(
            Arc::clone(&store),
            Arc::new(source),
            test_config(Duration::from_secs(20)),
        ));
        snapshotter.start();
        run_for(Arc::clone(&snapshotter), Duration::from_secs(50)).await;

        let listing = collect_listing(&store.list().await.unwrap());
        assert_eq!(listing.snapshots.len(), 1);
        assert_eq!(listing.latest_revision(), Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn backlog_over_memory_limit_triggers_an_early_delta() {
        let store = Arc::new(MemorySnapStore::new());
        let mut source = MockDataSource::new();
        // backlog jumps past the 10MiB default right away
        source
            .expect_accumulated_bytes()
            .returning(|| Ok(11 * 1024 * 1024));
        source.expect_current_revision().returning(|| Ok(i64::MAX));
        source
            .expect_stream_full()
            .returning(|| Ok((reader(b"full"), 10)));
        source
            .expect_stream_delta_since()
            .times(1..)
            .returning(|start| Ok((reader(b"delta"), start + 1)));
        let snapshotter = Arc::new(Snapshotter::new(
            Arc::clone(&store),
            Arc::new(source),
            // long period so only the backlog probe can trigger deltas
            test_config(Duration::from_secs(3600)),
        ));
        snapshotter.start();
        run_for(Arc::clone(&snapshotter), Duration::from_secs(5)).await;

        let listing = collect_listing(&store.list().await.unwrap());
        assert!(listing.snapshots.len() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_cursor_from_existing_snapshots() {
        let store = Arc::new(MemorySnapStore::new());
        store.insert_object(
            &SnapshotMetadata::new(SnapKind::Full, 0, 30, 1).object_name(),
            b"full".to_vec(),
        );
        let mut source = MockDataSource::new();
        source.expect_accumulated_bytes().returning(|| Ok(0));
        source.expect_current_revision().returning(|| Ok(i64::MAX));
        source.expect_stream_full().times(0).returning(|| {
            panic!("no full snapshot expected on resume");
        });
        source
            .expect_stream_delta_since()
            .returning(|start| {
                assert_eq!(start, 30);
                Ok((reader(b"delta"), 35))
            });
        let snapshotter = Arc::new(Snapshotter::new(
            Arc::clone(&store),
            Arc::new(source),
            test_config(Duration::from_secs(20)),
        ));
        snapshotter.start();
        run_for(Arc::clone(&snapshotter), Duration::from_secs(25)).await;

        let listing = collect_listing(&store.list().await.unwrap());
        assert_eq!(listing.latest_revision(), Some(35));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_write_failures_deactivate_the_scheduler() {
        let store = Arc::new(MemorySnapStore::new());
        let mut source = MockDataSource::new();
        source.expect_accumulated_bytes().returning(|| Ok(0));
        source
            .expect_stream_full()
            .times(3)
            .returning(|| Err(DataSourceError::Unavailable("down".to_owned())));
        let snapshotter = Arc::new(Snapshotter::new(
            Arc::clone(&store),
            Arc::new(source),
            test_config(Duration::from_secs(20)),
        ));
        snapshotter.start();
        run_for(Arc::clone(&snapshotter), Duration::from_secs(60)).await;

        assert!(!snapshotter.is_active());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn an_exhausted_schedule_parks_the_full_timer() {
        // cron 0.12 yields no occurrence at all for this expression
        let schedule = cron::Schedule::from_str("0 0 0 1 1 ? 2100").unwrap();
        assert!(schedule.upcoming(chrono::Utc).next().is_none());
        let deadline = next_occurrence(&schedule);
        assert!(deadline > Instant::now() + Duration::from_secs(24 * 3600));
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_delta_period_writes_only_full_snapshots() {
        let store = Arc::new(MemorySnapStore::new());
        let mut source = MockDataSource::new();
        source.expect_accumulated_bytes().returning(|| Ok(0));
        let mut rev = 0_i64;
        source.expect_stream_full().returning(move || {
            rev += 10;
            Ok((reader(b"full"), rev))
        });
        source.expect_stream_delta_since().times(0);
        let config = SnapshotterConfig::new(
            // every second, so scheduled fulls keep firing
            "* * * * * *".to_owned(),
            Duration::from_millis(500),
            10 * 1024 * 1024,
            RetentionPolicyConfig::Exponential,
            Duration::from_secs(60),
            7,
            Duration::ZERO,
        );
        let snapshotter = Arc::new(Snapshotter::new(Arc::clone(&store), Arc::new(source), config));
        snapshotter.start();
        run_for(Arc::clone(&snapshotter), Duration::from_secs(5)).await;

        let listing = collect_listing(&store.list().await.unwrap());
        assert!(listing.snapshots.len() >= 2);
        assert!(listing.snapshots.iter().all(|s| s.kind() == SnapKind::Full));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_snapshots() {
        let store = Arc::new(MemorySnapStore::new());
        let mut source = MockDataSource::new();
        source.expect_accumulated_bytes().returning(|| Ok(0));
        source.expect_current_revision().returning(|| Ok(i64::MAX));
        source
            .expect_stream_full()
            .returning(|| Ok((reader(b"full"), 10)));
        source
            .expect_stream_delta_since()
            .returning(|start| Ok((reader(b"delta"), start + 1)));
        let snapshotter = Arc::new(Snapshotter::new(
            Arc::clone(&store),
            Arc::new(source),
            test_config(Duration::from_secs(20)),
        ));
        snapshotter.start();
        let task_manager = TaskManager::new();
        let runner = Arc::clone(&snapshotter);
        task_manager.spawn(TaskName::Snapshotter, |l| async move {
            runner.run(l).await;
        });
        sleep(Duration::from_secs(5)).await;
        snapshotter.stop();
        let before = store.list().await.unwrap().len();
        sleep(Duration::from_secs(120)).await;
        assert_eq!(store.list().await.unwrap().len(), before);
        task_manager.shutdown(true).await;
    }
}
