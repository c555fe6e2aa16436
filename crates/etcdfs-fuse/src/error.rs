use etcdfs_types::{status_code, status_code_t, MetaCode, Status, StatusCode};

/// Failures of filesystem-level operations.
///
/// Each variant carries a status code and the errno comes from
/// [`status_code::to_errno`]. Store failures, timeouts included, are `Io`;
/// stores only raise `Kv` and `RPC` codes, so these all surface as `EIO`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FsError {
    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("store operation failed: {0}")]
    Io(#[from] Status),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("is a directory: {0}")]
    IsDirectory(String),

    #[error("filesystem is mounted read-only")]
    ReadOnly,

    #[error("file would grow to {0} bytes, past the size limit")]
    TooLarge(u64),

    #[error("invalid offset {0}")]
    InvalidOffset(i64),
}

impl FsError {
    pub fn code(&self) -> status_code_t {
        match self {
            FsError::NotFound(_) => MetaCode::NOT_FOUND,
            FsError::Io(status) => status.code(),
            FsError::NotDirectory(_) => MetaCode::NOT_DIRECTORY,
            FsError::IsDirectory(_) => MetaCode::IS_DIRECTORY,
            FsError::ReadOnly => StatusCode::READ_ONLY_MODE,
            FsError::TooLarge(_) => StatusCode::FILE_TOO_LARGE,
            FsError::InvalidOffset(_) => StatusCode::INVALID_ARG,
        }
    }

    pub fn errno(&self) -> i32 {
        match self {
            FsError::Io(status) => status.errno(),
            other => status_code::to_errno(other.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etcdfs_types::{KvCode, RPCCode};

    #[test]
    fn test_store_failures_are_eio() {
        for code in [
            KvCode::GET_ERROR,
            KvCode::PUT_ERROR,
            KvCode::SCAN_ERROR,
            RPCCode::TIMEOUT,
            RPCCode::CONNECT_FAILED,
        ] {
            assert_eq!(FsError::from(Status::new(code)).errno(), libc::EIO);
        }
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound("/a".into()).errno(), libc::ENOENT);
        assert_eq!(FsError::NotDirectory("/a".into()).errno(), libc::ENOTDIR);
        assert_eq!(FsError::IsDirectory("/a".into()).errno(), libc::EISDIR);
        assert_eq!(FsError::ReadOnly.errno(), libc::EROFS);
        assert_eq!(FsError::TooLarge(u64::MAX).errno(), libc::EFBIG);
        assert_eq!(FsError::InvalidOffset(-1).errno(), libc::EINVAL);
    }

    #[test]
    fn test_code_names_the_failure() {
        assert_eq!(FsError::NotFound("/a".into()).code(), MetaCode::NOT_FOUND);
        let err = FsError::from(Status::new(KvCode::DELETE_ERROR));
        assert_eq!(err.code(), KvCode::DELETE_ERROR);
        assert_eq!(status_code::to_string(FsError::ReadOnly.code()), "ReadOnlyMode");
    }

    #[test]
    fn test_display_keeps_status() {
        let err = FsError::from(Status::with_message(KvCode::PUT_ERROR, "quota"));
        assert!(err.to_string().contains("quota"));
    }
}
