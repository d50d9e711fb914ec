//! Abstraction over the key-value store the sidecar snapshots.
//!
//! The sidecar never interprets snapshot payloads. It only needs the
//! store's revision counters to decide when a snapshot is due and the
//! raw byte streams to copy into the snapshot store.

use async_trait::async_trait;
use thiserror::Error;

use crate::store::SnapReader;

/// Errors reported by the backing key-value store
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DataSourceError {
    /// The store is unreachable or refused the request
    #[error("data source unavailable: {0}")]
    Unavailable(String),
    /// The requested revision has already been compacted away
    #[error("revision {0} has been compacted")]
    Compacted(i64),
    /// The stream broke part way through
    #[error("stream aborted: {0}")]
    StreamAborted(String),
}

/// Interface the snapshotter uses to read from the key-value store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Latest revision the store has applied
    async fn current_revision(&self) -> Result<i64, DataSourceError>;

    /// Monotonic count of event bytes accumulated since the source started.
    ///
    /// Callers diff two readings to size the unsnapshotted backlog. The
    /// counter never resets while the source lives.
    async fn accumulated_bytes(&self) -> Result<u64, DataSourceError>;

    /// Opens a stream over the full state of the store.
    ///
    /// Returns the stream and the revision it is consistent at. Every
    /// revision up to and including the returned one is contained in
    /// the stream.
    async fn stream_full(&self) -> Result<(SnapReader, i64), DataSourceError>;

    /// Opens a stream over all events after `start_revision`.
    ///
    /// Returns the stream and the last revision it covers, which is at
    /// least `start_revision`. A result equal to `start_revision` means
    /// there is nothing new to snapshot.
    async fn stream_delta_since(
        &self,
        start_revision: i64,
    ) -> Result<(SnapReader, i64), DataSourceError>;
}
