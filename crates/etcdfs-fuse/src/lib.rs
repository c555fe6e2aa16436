//! etcdfs-fuse: a POSIX view of a flat key namespace.
//!
//! Every key in the store is a regular file whose content is the value.
//! Directories are implied by `/` separators in key names and exist only
//! while some key lives underneath them.
//!
//! # Architecture
//!
//! - **[`path`]** - key/path mapping and the "next hierarchy level" rule
//!   that turns a range of keys into the children of one directory.
//! - **[`readdir`]** - paged prefix scans that skip over whole subtrees.
//! - **[`buffer`]** - lazily loaded, dirty-tracked file contents.
//! - **[`node`]** - `FileNode` and `DirNode`, the store-backed tree.
//! - **[`inode`]** - stable inode numbers and open handle tables.
//! - **[`types`]**, **[`reply`]**, **[`ops`]** - the kernel-independent
//!   operation surface, `FuseOps`.
//! - **[`filesystem`]** - `EtcdFileSystem`, the `FuseOps` implementation.
//! - **`session`** - the `fuser` binding and mount helpers (feature `fuse`).

pub mod buffer;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod inode;
pub mod node;
pub mod ops;
pub mod path;
pub mod readdir;
pub mod reply;
pub mod types;

#[cfg(feature = "fuse")]
pub mod session;

pub use config::FuseConfig;
pub use error::FsError;
pub use filesystem::EtcdFileSystem;
pub use node::{DirNode, FileNode, NodeKind, TreeNode};
pub use ops::FuseOps;
pub use reply::FuseResult;
pub use types::{FileAttr, FuseEntryParam, FuseRequestContext, StatFs};
