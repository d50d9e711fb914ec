/// Directory backed store
pub mod local;
/// In-memory store
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use utils::config::StoreConfig;

pub use local::LocalSnapStore;
pub use memory::MemorySnapStore;

/// Stream of snapshot bytes
pub type SnapReader = Box<dyn tokio::io::AsyncRead + Send + Unpin>;

/// Snapshot store error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The object does not exist
    #[error("object {0} not found")]
    NotFound(String),
    /// The underlying store failed, retriable from the caller's point of view
    #[error("io failure on object {0}")]
    Io(String, #[source] std::io::Error),
}

/// Blob store boundary holding snapshot objects
///
/// Object names are lexically sortable by creation order so a chain can be
/// reconstructed from a listing alone. Writers stream into a `.part` object
/// and finalize by rename, so listings only ever show completed objects.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapStore: Send + Sync + 'static {
    /// List all finalized object names, sorted lexically
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Stream a new object into the store, returning the bytes written
    async fn put(&self, name: &str, src: SnapReader) -> Result<u64, StoreError>;

    /// Open an object for reading
    async fn get(&self, name: &str) -> Result<SnapReader, StoreError>;

    /// Delete one object
    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Whether a concurrent reader holds the object open
    async fn is_in_use(&self, name: &str) -> bool;
}

/// Snapshot store backend selected by a `StoreConfig`
#[derive(Debug)]
pub enum Store {
    /// In-memory store, data is lost on restart
    Memory(MemorySnapStore),
    /// Directory backed store
    Local(LocalSnapStore),
}

impl Store {
    /// Open the backend the configuration selects
    ///
    /// # Errors
    ///
    /// Return `StoreError::Io` when the local store directory cannot be
    /// created
    #[inline]
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        match *config {
            StoreConfig::Memory => Ok(Store::Memory(MemorySnapStore::new())),
            StoreConfig::Local(ref dir) => {
                Ok(Store::Local(LocalSnapStore::open(dir.clone()).await?))
            }
        }
    }
}

#[async_trait]
impl SnapStore for Store {
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        match *self {
            Store::Memory(ref s) => s.list().await,
            Store::Local(ref s) => s.list().await,
        }
    }

    async fn put(&self, name: &str, src: SnapReader) -> Result<u64, StoreError> {
        match *self {
            Store::Memory(ref s) => s.put(name, src).await,
            Store::Local(ref s) => s.put(name, src).await,
        }
    }

    async fn get(&self, name: &str) -> Result<SnapReader, StoreError> {
        match *self {
            Store::Memory(ref s) => s.get(name).await,
            Store::Local(ref s) => s.get(name).await,
        }
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        match *self {
            Store::Memory(ref s) => s.delete(name).await,
            Store::Local(ref s) => s.delete(name).await,
        }
    }

    async fn is_in_use(&self, name: &str) -> bool {
        match *self {
            Store::Memory(ref s) => s.is_in_use(name).await,
            Store::Local(ref s) => s.is_in_use(name).await,
        }
    }
}
