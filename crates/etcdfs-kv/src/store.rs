use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use etcdfs_types::{make_error_msg, RPCCode, Result};

use crate::{prefix_range_end, RangeEnd};

/// Key order requested from a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Whatever order the backend produces.
    None,
    #[default]
    Ascend,
    Descend,
}

/// A keys-only range scan over `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub start: Vec<u8>,
    pub end: RangeEnd,
    pub order: SortOrder,
    /// Maximum number of keys to return; 0 means no limit.
    pub limit: usize,
}

impl ScanRequest {
    pub fn range(start: impl Into<Vec<u8>>, end: RangeEnd) -> Self {
        Self {
            start: start.into(),
            end,
            order: SortOrder::Ascend,
            limit: 0,
        }
    }

    /// All keys starting with `prefix`.
    pub fn prefix(prefix: impl Into<Vec<u8>>) -> Self {
        let start = prefix.into();
        let end = prefix_range_end(&start);
        Self::range(start, end)
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }
}

/// One page of scan results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub keys: Vec<Vec<u8>>,
    /// More keys exist in the range beyond this page.
    pub has_more: bool,
}

/// An ordered, prefix-scannable key-value store.
///
/// Every call is bounded by the backend's command timeout. Dropping a
/// returned future abandons the call.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn scan(&self, req: &ScanRequest) -> Result<ScanResult>;

    /// Fetch a value; a missing key is `Ok(None)`.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a key. Removing a missing key succeeds.
    async fn delete(&self, key: &[u8]) -> Result<()>;
}

/// Run a store future under a deadline, reporting expiry as `RPCCode::TIMEOUT`.
pub async fn with_timeout<T, F>(timeout: Duration, op: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => make_error_msg(
            RPCCode::TIMEOUT,
            format!("{} timed out after {:?}", op, timeout),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etcdfs_types::KvCode;

    #[test]
    fn test_prefix_request() {
        let req = ScanRequest::prefix("/a/").with_limit(500);
        assert_eq!(req.start, b"/a/");
        assert_eq!(req.end, RangeEnd::Bounded(b"/a0".to_vec()));
        assert_eq!(req.order, SortOrder::Ascend);
        assert_eq!(req.limit, 500);
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let ok = with_timeout(Duration::from_secs(1), "get", async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<()> = with_timeout(Duration::from_secs(1), "put", async {
            make_error_msg(KvCode::PUT_ERROR, "refused")
        })
        .await;
        assert_eq!(err.unwrap_err().code(), KvCode::PUT_ERROR);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let err: Result<()> = with_timeout(Duration::from_millis(10), "scan", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let status = err.unwrap_err();
        assert_eq!(status.code(), RPCCode::TIMEOUT);
        assert!(status.message().unwrap_or_default().starts_with("scan timed out"));
    }
}
