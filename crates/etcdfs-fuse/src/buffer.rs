//! Per-file content buffer.
//!
//! The buffer starts unloaded. `open` fetches the key's value once; reads
//! and writes then work on the local copy, and `flush` replaces the stored
//! value with the whole buffer. Regions opened up by growing the buffer are
//! always zero-filled.
//!
//! Locking: reads and flushes share the lock, writes and resizes take it
//! exclusively. Flush holds the shared lock across the `put`, so the value
//! sent is exactly the buffer the dirty flag describes. `open` never holds
//! the lock across the `get`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use etcdfs_kv::KvStore;
use etcdfs_types::Status;

use crate::error::FsError;

pub struct ContentBuffer {
    key: String,
    store: Arc<dyn KvStore>,
    bytes: RwLock<Option<Vec<u8>>>,
    dirty: AtomicBool,
}

impl ContentBuffer {
    pub fn new(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            store,
            bytes: RwLock::new(None),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn is_loaded(&self) -> bool {
        self.bytes.read().await.is_some()
    }

    /// Local writes not yet flushed.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn store_error(&self, op: &'static str, status: Status) -> FsError {
        tracing::error!(path = %self.key, op, error = %status, "store operation failed");
        FsError::Io(status)
    }

    /// Load the stored value unless already loaded. A missing key loads as
    /// an empty buffer.
    pub async fn open(&self) -> Result<(), FsError> {
        if self.is_loaded().await {
            return Ok(());
        }
        let fetched = self
            .store
            .get(self.key.as_bytes())
            .await
            .map_err(|e| self.store_error("get", e))?
            .unwrap_or_default();

        let mut guard = self.bytes.write().await;
        if guard.is_none() {
            *guard = Some(fetched);
        }
        Ok(())
    }

    /// Current length; an unloaded buffer has length 0.
    pub async fn len(&self) -> u64 {
        self.bytes.read().await.as_ref().map_or(0, |b| b.len() as u64)
    }

    /// Bytes in `[offset, offset + size)` clamped to the buffer. Reading past
    /// the end returns nothing.
    pub async fn read(&self, offset: u64, size: usize) -> Vec<u8> {
        let guard = self.bytes.read().await;
        let Some(bytes) = guard.as_ref() else {
            return Vec::new();
        };
        let len = bytes.len() as u64;
        if offset >= len {
            return Vec::new();
        }
        let end = offset.saturating_add(size as u64).min(len);
        bytes[offset as usize..end as usize].to_vec()
    }

    /// Copy `data` in at `offset`, growing the buffer as needed. Purely local.
    ///
    /// Fails with `TooLarge` when the end of the write is not addressable.
    /// The configured file size limit is the caller's to enforce.
    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        if data.is_empty() {
            return Ok(0);
        }
        let (start, end) = usize::try_from(offset)
            .ok()
            .and_then(|start| Some((start, start.checked_add(data.len())?)))
            .ok_or(FsError::TooLarge(offset))?;
        let mut guard = self.bytes.write().await;
        let bytes = guard.get_or_insert_with(Vec::new);
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(data);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(data.len())
    }

    /// Store the whole buffer under the key if it has unflushed writes.
    ///
    /// On failure the buffer and its dirty state are left as they were.
    pub async fn flush(&self) -> Result<(), FsError> {
        let guard = self.bytes.read().await;
        if !self.is_dirty() {
            return Ok(());
        }
        let bytes = guard.as_deref().unwrap_or_default();
        self.store
            .put(self.key.as_bytes(), bytes)
            .await
            .map_err(|e| self.store_error("put", e))?;
        self.dirty.store(false, Ordering::SeqCst);
        tracing::debug!(path = %self.key, len = bytes.len(), "flushed");
        Ok(())
    }

    /// Resize to `size` (zero-filling growth) and flush immediately.
    ///
    /// As with `write`, the caller enforces the file size limit.
    pub async fn set_size(&self, size: u64) -> Result<(), FsError> {
        let len = usize::try_from(size).map_err(|_| FsError::TooLarge(size))?;
        self.open().await?;
        {
            let mut guard = self.bytes.write().await;
            guard.get_or_insert_with(Vec::new).resize(len, 0);
            self.dirty.store(true, Ordering::SeqCst);
        }
        self.flush().await
    }

    /// Persist an empty value so the file exists before any content does.
    pub async fn create(&self) -> Result<(), FsError> {
        {
            let mut guard = self.bytes.write().await;
            *guard = Some(Vec::new());
            self.dirty.store(true, Ordering::SeqCst);
        }
        self.flush().await
    }

    /// Remove the key and drop local state.
    pub async fn delete(&self) -> Result<(), FsError> {
        self.store
            .delete(self.key.as_bytes())
            .await
            .map_err(|e| self.store_error("delete", e))?;
        let mut guard = self.bytes.write().await;
        *guard = None;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for ContentBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentBuffer")
            .field("key", &self.key)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use etcdfs_kv_backends::MemKvStore;

    fn buffer(store: &MemKvStore, key: &str) -> ContentBuffer {
        ContentBuffer::new(Arc::new(store.clone()), key)
    }

    #[tokio::test]
    async fn test_open_missing_key_is_empty() {
        let store = MemKvStore::new();
        let buf = buffer(&store, "/new");
        assert!(!buf.is_loaded().await);
        buf.open().await.unwrap();
        assert!(buf.is_loaded().await);
        assert_eq!(buf.len().await, 0);
        assert!(!buf.is_dirty());
    }

    #[tokio::test]
    async fn test_open_fetches_once() {
        let store = MemKvStore::new();
        store.insert("/f", "v1");
        let buf = buffer(&store, "/f");
        buf.open().await.unwrap();
        store.insert("/f", "v2-longer");
        buf.open().await.unwrap();
        assert_eq!(buf.read(0, 100).await, b"v1");
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let store = MemKvStore::new();
        let buf = buffer(&store, "/f");
        buf.open().await.unwrap();
        assert_eq!(buf.write(0, b"hello").await.unwrap(), 5);
        assert_eq!(buf.read(0, 5).await, b"hello");
        assert!(buf.is_dirty());
        // nothing reaches the store before flush
        assert_eq!(store.value(b"/f"), None);
    }

    #[tokio::test]
    async fn test_sparse_write_grows_with_zeros() {
        let store = MemKvStore::new();
        store.insert("/f", "hello");
        let buf = buffer(&store, "/f");
        buf.open().await.unwrap();
        buf.write(10, b"world").await.unwrap();
        assert_eq!(buf.len().await, 15);
        assert_eq!(buf.read(0, 5).await, b"hello");
        assert_eq!(buf.read(5, 5).await, vec![0u8; 5]);
        assert_eq!(buf.read(10, 100).await, b"world");
    }

    #[tokio::test]
    async fn test_unaddressable_write_rejected() {
        let store = MemKvStore::new();
        let buf = buffer(&store, "/f");
        buf.open().await.unwrap();
        let err = buf.write(u64::MAX, b"x").await.unwrap_err();
        assert!(matches!(err, FsError::TooLarge(u64::MAX)));
        assert_eq!(err.errno(), libc::EFBIG);
        assert!(!buf.is_dirty());
        assert_eq!(buf.len().await, 0);

        // empty writes never grow the buffer
        assert_eq!(buf.write(u64::MAX, b"").await.unwrap(), 0);
        assert_eq!(buf.len().await, 0);
    }

    #[tokio::test]
    async fn test_read_clamps() {
        let store = MemKvStore::new();
        store.insert("/f", "abc");
        let buf = buffer(&store, "/f");
        assert!(buf.read(0, 10).await.is_empty());
        buf.open().await.unwrap();
        assert_eq!(buf.read(1, 10).await, b"bc");
        assert!(buf.read(3, 10).await.is_empty());
        assert!(buf.read(1000, 10).await.is_empty());
        assert!(buf.read(u64::MAX, usize::MAX).await.is_empty());
    }

    #[tokio::test]
    async fn test_flush_then_fresh_open() {
        let store = MemKvStore::new();
        let buf = buffer(&store, "/f");
        buf.open().await.unwrap();
        buf.write(0, b"content").await.unwrap();
        buf.flush().await.unwrap();
        assert!(!buf.is_dirty());

        let fresh = buffer(&store, "/f");
        fresh.open().await.unwrap();
        assert_eq!(fresh.read(0, 64).await, b"content");
    }

    #[tokio::test]
    async fn test_write_during_flush_stays_dirty() {
        let store = MemKvStore::new();
        store.insert("/f", "old");
        let buf = Arc::new(buffer(&store, "/f"));
        buf.open().await.unwrap();
        buf.write(0, b"new").await.unwrap();
        store.set_latency(Some(Duration::from_millis(200)));

        let flushing = tokio::spawn({
            let buf = buf.clone();
            async move { buf.flush().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // the put is in flight; this write waits for it to finish
        let written = tokio::time::timeout(Duration::from_secs(5), buf.write(0, b"xyz"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(written, 3);
        tokio::time::timeout(Duration::from_secs(5), flushing)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        store.set_latency(None);

        assert_eq!(store.value(b"/f"), Some(b"new".to_vec()));
        assert!(buf.is_dirty());
        assert_eq!(buf.read(0, 3).await, b"xyz");

        buf.flush().await.unwrap();
        assert_eq!(store.value(b"/f"), Some(b"xyz".to_vec()));
    }

    #[tokio::test]
    async fn test_flush_clean_buffer_skips_store() {
        let store = MemKvStore::new();
        store.insert("/f", "keep");
        let buf = buffer(&store, "/f");
        store.fail_next(1);
        // would fail if it touched the store
        buf.flush().await.unwrap();
        assert_eq!(store.value(b"/f"), Some(b"keep".to_vec()));
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_buffer() {
        let store = MemKvStore::new();
        let buf = buffer(&store, "/f");
        buf.open().await.unwrap();
        buf.write(0, b"data").await.unwrap();

        store.fail_next(1);
        let err = buf.flush().await.unwrap_err();
        assert_eq!(err.errno(), libc::EIO);
        assert!(buf.is_dirty());
        assert_eq!(buf.read(0, 4).await, b"data");
        assert_eq!(store.value(b"/f"), None);

        buf.flush().await.unwrap();
        assert_eq!(store.value(b"/f"), Some(b"data".to_vec()));
    }

    #[tokio::test]
    async fn test_failed_open_stays_unloaded() {
        let store = MemKvStore::new();
        store.insert("/f", "x");
        let buf = buffer(&store, "/f");
        store.fail_next(1);
        assert_eq!(buf.open().await.unwrap_err().errno(), libc::EIO);
        assert!(!buf.is_loaded().await);
        buf.open().await.unwrap();
        assert_eq!(buf.read(0, 1).await, b"x");
    }

    #[tokio::test]
    async fn test_set_size_shrinks_and_persists() {
        let store = MemKvStore::new();
        store.insert("/f", "0123456789");
        let buf = buffer(&store, "/f");
        buf.set_size(4).await.unwrap();
        assert_eq!(store.value(b"/f"), Some(b"0123".to_vec()));
        assert!(!buf.is_dirty());
    }

    #[tokio::test]
    async fn test_shrink_then_regrow_exposes_zeros() {
        let store = MemKvStore::new();
        store.insert("/f", "abcdef");
        let buf = buffer(&store, "/f");
        buf.set_size(2).await.unwrap();
        buf.set_size(6).await.unwrap();
        assert_eq!(buf.read(0, 6).await, b"ab\0\0\0\0");
        assert_eq!(store.value(b"/f"), Some(b"ab\0\0\0\0".to_vec()));
    }

    #[tokio::test]
    async fn test_create_writes_placeholder() {
        let store = MemKvStore::new();
        let buf = buffer(&store, "/new");
        buf.create().await.unwrap();
        assert_eq!(store.value(b"/new"), Some(Vec::new()));
        assert!(buf.is_loaded().await);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemKvStore::new();
        store.insert("/f", "x");
        let buf = buffer(&store, "/f");
        buf.open().await.unwrap();
        buf.delete().await.unwrap();
        assert_eq!(store.value(b"/f"), None);
        assert!(!buf.is_loaded().await);
    }

    #[tokio::test]
    async fn test_concurrent_disjoint_writes() {
        let store = MemKvStore::new();
        let buf = Arc::new(buffer(&store, "/f"));
        buf.open().await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let buf = buf.clone();
            tasks.push(tokio::spawn(async move {
                buf.write(i as u64 * 4, &[i; 4]).await.unwrap()
            }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap(), 4);
        }
        buf.flush().await.unwrap();

        let stored = store.value(b"/f").unwrap();
        assert_eq!(stored.len(), 32);
        for i in 0..8u8 {
            assert_eq!(&stored[i as usize * 4..i as usize * 4 + 4], &[i; 4]);
        }
    }

    #[tokio::test]
    async fn test_concurrent_first_opens_agree() {
        let store = MemKvStore::new();
        store.insert("/f", "snapshot");
        let buf = Arc::new(buffer(&store, "/f"));
        let (a, b) = tokio::join!(buf.open(), buf.open());
        a.unwrap();
        b.unwrap();
        assert_eq!(buf.read(0, 64).await, b"snapshot");
    }
}
