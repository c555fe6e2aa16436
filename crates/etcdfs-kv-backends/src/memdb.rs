//! In-memory KV store backed by a `BTreeMap`.
//!
//! A fully functional [`KvStore`] for tests and for running the filesystem
//! without a cluster (`--backend memory`). Data lives behind a
//! `parking_lot::RwLock`; clones share the same map.
//!
//! Two knobs exist for exercising failure paths: [`MemKvStore::fail_next`]
//! makes the next `n` operations fail, and [`MemKvStore::set_latency`]
//! delays every operation, which combined with a command timeout turns
//! into timeouts.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use etcdfs_kv::{with_timeout, KvStore, RangeEnd, ScanRequest, ScanResult, SortOrder};
use etcdfs_types::{make_error_msg, status_code_t, KvCode, Result};

type KeyMap = BTreeMap<Vec<u8>, Vec<u8>>;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Faults {
    fail_next: AtomicUsize,
    latency: Mutex<Option<Duration>>,
    command_timeout: Mutex<Option<Duration>>,
}

/// In-memory ordered KV store.
#[derive(Clone, Default)]
pub struct MemKvStore {
    data: Arc<RwLock<KeyMap>>,
    faults: Arc<Faults>,
    scans: Arc<AtomicU64>,
}

impl MemKvStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every operation by `timeout`, like the etcd backend does.
    pub fn with_command_timeout(self, timeout: Duration) -> Self {
        *self.faults.command_timeout.lock() = Some(timeout);
        self
    }

    /// Return the number of keys currently stored.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Return whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Seed a key without going through the async interface.
    pub fn insert(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.data.write().insert(key.into(), value.into());
    }

    /// Read a key without going through the async interface.
    pub fn value(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    /// All keys in ascending order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.data.read().keys().cloned().collect()
    }

    /// Make the next `n` operations fail with an injected error.
    pub fn fail_next(&self, n: usize) {
        self.faults.fail_next.store(n, Ordering::SeqCst);
    }

    /// Delay every subsequent operation by `latency` (`None` to clear).
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.faults.latency.lock() = latency;
    }

    /// Number of scans served so far.
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::SeqCst)
    }

    /// Consume one pending injected failure, if any.
    fn take_fault(&self, code: status_code_t, op: &str) -> Result<()> {
        let taken = self
            .faults
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            tracing::debug!(op, "injecting fault");
            return make_error_msg(code, format!("{}: injected fault", op));
        }
        Ok(())
    }

    async fn run<T, F>(&self, op: &'static str, code: status_code_t, body: F) -> Result<T>
    where
        F: FnOnce(&Self) -> T + Send,
        T: Send,
    {
        let latency = *self.faults.latency.lock();
        let timeout = *self.faults.command_timeout.lock();
        let call = async {
            if let Some(delay) = latency {
                tokio::time::sleep(delay).await;
            }
            self.take_fault(code, op)?;
            Ok(body(self))
        };
        match timeout {
            Some(timeout) => with_timeout(timeout, op, call).await,
            None => call.await,
        }
    }
}

// ---------------------------------------------------------------------------
// Helper: range collection
// ---------------------------------------------------------------------------

/// Collect the keys of `map` in `[start, end)` honouring order and limit.
fn collect_range(map: &KeyMap, req: &ScanRequest) -> ScanResult {
    let end_bound = match &req.end {
        RangeEnd::Bounded(end) => {
            if end.as_slice() <= req.start.as_slice() {
                return ScanResult::default();
            }
            Bound::Excluded(end.clone())
        }
        RangeEnd::Unbounded => Bound::Unbounded,
    };
    let range = map.range((Bound::Included(req.start.clone()), end_bound));
    let keys: Box<dyn Iterator<Item = &Vec<u8>>> = match req.order {
        SortOrder::Descend => Box::new(range.rev().map(|(k, _)| k)),
        SortOrder::Ascend | SortOrder::None => Box::new(range.map(|(k, _)| k)),
    };

    let mut out = Vec::new();
    let mut has_more = false;
    for key in keys {
        if req.limit > 0 && out.len() >= req.limit {
            has_more = true;
            break;
        }
        out.push(key.clone());
    }
    ScanResult {
        keys: out,
        has_more,
    }
}

#[async_trait]
impl KvStore for MemKvStore {
    async fn scan(&self, req: &ScanRequest) -> Result<ScanResult> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.run("scan", KvCode::SCAN_ERROR, |s| {
            collect_range(&s.data.read(), req)
        })
        .await
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.run("get", KvCode::GET_ERROR, |s| s.data.read().get(key).cloned())
            .await
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.run("put", KvCode::PUT_ERROR, |s| {
            s.data.write().insert(key.to_vec(), value.to_vec());
        })
        .await
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.run("delete", KvCode::DELETE_ERROR, |s| {
            s.data.write().remove(key);
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
