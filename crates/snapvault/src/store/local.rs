use std::path::{Path, PathBuf};

use async_trait::async_trait;
use clippy_utilities::NumericCast;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::warn;

use super::{SnapReader, SnapStore, StoreError};

/// Suffix of objects that are still being written
const PART_SUFFIX: &str = ".part";
/// Suffix of in-use marker sidecars taken by restore readers
const LOCK_SUFFIX: &str = ".lock";
/// Suffix of integrity digest sidecars
const DIGEST_SUFFIX: &str = ".sha256";
/// Copy buffer size for streaming writes
const WRITE_BUF_SIZE: usize = 64 * 1024;

/// Directory backed snapshot store
///
/// Objects are plain files under the root directory; the numbered parts of a
/// chunked snapshot are files under a subdirectory named after the object.
#[derive(Debug)]
pub struct LocalSnapStore {
    /// Root directory
    dir: PathBuf,
}

impl LocalSnapStore {
    /// Open a store rooted at `dir`, creating the directory when absent
    ///
    /// # Errors
    ///
    /// Return `StoreError::Io` when the directory cannot be created
    #[inline]
    pub async fn open(dir: impl Into<PathBuf> + Send) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Io(dir.display().to_string(), e))?;
        Ok(Self { dir })
    }

    /// Absolute path of an object
    fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Whether a file name is a store-internal sidecar
    fn is_sidecar(name: &str) -> bool {
        name.ends_with(PART_SUFFIX) || name.ends_with(LOCK_SUFFIX) || name.ends_with(DIGEST_SUFFIX)
    }

    /// Take an in-use marker for `name` on behalf of a restore reader
    ///
    /// # Errors
    ///
    /// Return `StoreError::Io` when the marker cannot be written
    #[inline]
    pub async fn mark_in_use(&self, name: &str) -> Result<(), StoreError> {
        let lock = self.path_of(&format!("{name}{LOCK_SUFFIX}"));
        fs::write(&lock, b"")
            .await
            .map_err(|e| StoreError::Io(name.to_owned(), e))
    }

    /// Release the in-use marker for `name`
    #[inline]
    pub async fn release_in_use(&self, name: &str) {
        let lock = self.path_of(&format!("{name}{LOCK_SUFFIX}"));
        if let Err(e) = fs::remove_file(&lock).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to release in-use marker for {name}: {e}");
            }
        }
    }

    /// Collect object names under `path` into `names`, one directory level deep
    async fn collect_names(
        &self,
        path: &Path,
        prefix: Option<&str>,
        names: &mut Vec<String>,
    ) -> Result<(), StoreError> {
        let mut entries = fs::read_dir(path)
            .await
            .map_err(|e| StoreError::Io(path.display().to_string(), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(path.display().to_string(), e))?
        {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StoreError::Io(file_name.clone(), e))?;
            if file_type.is_dir() {
                if prefix.is_none() {
                    Box::pin(self.collect_names(&entry.path(), Some(&file_name), names)).await?;
                }
            } else if !Self::is_sidecar(&file_name) {
                match prefix {
                    Some(p) => names.push(format!("{p}/{file_name}")),
                    None => names.push(file_name),
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SnapStore for LocalSnapStore {
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let root = self.dir.clone();
        self.collect_names(&root, None, &mut names).await?;
        names.sort_unstable();
        Ok(names)
    }

    async fn put(&self, name: &str, mut src: SnapReader) -> Result<u64, StoreError> {
        let final_path = self.path_of(name);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(name.to_owned(), e))?;
        }
        let part_path = self.path_of(&format!("{name}{PART_SUFFIX}"));
        let mut file = fs::File::create(&part_path)
            .await
            .map_err(|e| StoreError::Io(name.to_owned(), e))?;

        let mut written: u64 = 0;
        let mut digest = Sha256::new();
        let mut buf = vec![0_u8; WRITE_BUF_SIZE];
        loop {
            let n = src
                .read(&mut buf)
                .await
                .map_err(|e| StoreError::Io(name.to_owned(), e))?;
            if n == 0 {
                break;
            }
            let chunk = buf.get(..n).unwrap_or_else(|| unreachable!("read within buffer"));
            digest.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| StoreError::Io(name.to_owned(), e))?;
            written = written.saturating_add(n.numeric_cast());
        }
        file.sync_all()
            .await
            .map_err(|e| StoreError::Io(name.to_owned(), e))?;
        drop(file);

        let checksum: String = digest
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        let digest_path = self.path_of(&format!("{name}{DIGEST_SUFFIX}"));
        fs::write(&digest_path, checksum)
            .await
            .map_err(|e| StoreError::Io(name.to_owned(), e))?;

        // visible to listings only once the write is complete
        fs::rename(&part_path, &final_path)
            .await
            .map_err(|e| StoreError::Io(name.to_owned(), e))?;
        Ok(written)
    }

    async fn get(&self, name: &str) -> Result<SnapReader, StoreError> {
        let path = self.path_of(name);
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_owned()))
            }
            Err(e) => Err(StoreError::Io(name.to_owned(), e)),
        }
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_of(name);
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_owned()));
            }
            Err(e) => return Err(StoreError::Io(name.to_owned(), e)),
        };
        let res = if meta.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        res.map_err(|e| StoreError::Io(name.to_owned(), e))?;
        let digest_path = self.path_of(&format!("{name}{DIGEST_SUFFIX}"));
        if let Err(e) = fs::remove_file(&digest_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove digest sidecar of {name}: {e}");
            }
        }
        Ok(())
    }

    async fn is_in_use(&self, name: &str) -> bool {
        let lock = self.path_of(&format!("{name}{LOCK_SUFFIX}"));
        match fs::try_exists(&lock).await {
            Ok(exists) => exists,
            // an unreadable marker counts as in use, deletion can wait
            Err(e) => {
                warn!("failed to probe in-use marker for {name}: {e}");
                true
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::*;

    /// fresh store under a per-test temp directory
    async fn test_store(name: &str) -> (LocalSnapStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("snapvault_local_store_{name}"));
        _ = fs::remove_dir_all(&dir).await;
        let store = LocalSnapStore::open(&dir).await.unwrap();
        (store, dir)
    }

    /// reader over owned bytes
    fn reader(data: &[u8]) -> SnapReader {
        Box::new(std::io::Cursor::new(data.to_vec()))
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let (store, dir) = test_store("round_trip").await;
        let written = store.put("Full-0-9-1", reader(b"snapshot-bytes")).await.unwrap();
        assert_eq!(written, 14);
        assert_eq!(store.list().await.unwrap(), vec!["Full-0-9-1".to_owned()]);

        let mut data = Vec::new();
        store
            .get("Full-0-9-1")
            .await
            .unwrap()
            .read_to_end(&mut data)
            .await
            .unwrap();
        assert_eq!(data, b"snapshot-bytes");

        store.delete("Full-0-9-1").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(matches!(
            store.get("Full-0-9-1").await,
            Err(StoreError::NotFound(_))
        ));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn listing_hides_sidecars_and_partial_writes() {
        let (store, dir) = test_store("sidecars").await;
        store.put("Incr-9-20-2", reader(b"delta")).await.unwrap();
        fs::write(dir.join("Incr-20-30-3.part"), b"partial")
            .await
            .unwrap();
        store.mark_in_use("Incr-9-20-2").await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["Incr-9-20-2".to_owned()]);
        assert!(store.is_in_use("Incr-9-20-2").await);
        store.release_in_use("Incr-9-20-2").await;
        assert!(!store.is_in_use("Incr-9-20-2").await);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn chunked_objects_list_under_their_base_name() {
        let (store, dir) = test_store("chunked").await;
        store.put("Full-0-9-1/0000", reader(b"aa")).await.unwrap();
        store.put("Full-0-9-1/0001", reader(b"bb")).await.unwrap();
        assert_eq!(
            store.list().await.unwrap(),
            vec!["Full-0-9-1/0000".to_owned(), "Full-0-9-1/0001".to_owned()]
        );
        // deleting the base name removes every part
        store.delete("Full-0-9-1").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        std::fs::remove_dir_all(dir).unwrap();
    }
}
