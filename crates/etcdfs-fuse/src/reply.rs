//! Reply types for FUSE operations.
//!
//! Each operation produces one of these; the `session` adapter turns them
//! into kernel replies. Keeping them plain data lets `FuseOps` be tested
//! without a kernel connection.

use crate::types::{FileAttr, FuseDirEntry, FuseEntryParam, StatFs};
use std::time::Duration;

/// Reply for lookup.
#[derive(Debug, Clone)]
pub struct ReplyEntry {
    pub entry: FuseEntryParam,
}

/// Reply for getattr and setattr.
#[derive(Debug, Clone)]
pub struct ReplyAttr {
    pub attr: FileAttr,
    pub attr_timeout: Duration,
}

/// Reply for open/opendir.
#[derive(Debug, Clone)]
pub struct ReplyOpen {
    /// File handle assigned by the filesystem.
    pub fh: u64,
    /// Flags back to the kernel (`FOPEN_DIRECT_IO`).
    pub flags: u32,
}

/// Reply for read.
#[derive(Debug)]
pub struct ReplyData {
    pub data: Vec<u8>,
}

/// Reply for write.
#[derive(Debug, Clone, Copy)]
pub struct ReplyWrite {
    /// Number of bytes written.
    pub written: u32,
}

/// Reply for readdir.
#[derive(Debug)]
pub struct ReplyDirectory {
    pub entries: Vec<FuseDirEntry>,
}

/// Reply for statfs.
#[derive(Debug, Clone)]
pub struct ReplyStatFs {
    pub stat: StatFs,
}

/// Reply for create (entry plus open handle).
#[derive(Debug, Clone)]
pub struct ReplyCreate {
    pub entry: FuseEntryParam,
    pub fh: u64,
    pub flags: u32,
}

/// Result type for FUSE operations. The error is a positive errno.
pub type FuseResult<T> = std::result::Result<T, i32>;
