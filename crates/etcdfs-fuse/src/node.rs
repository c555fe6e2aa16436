//! Filesystem nodes.
//!
//! A node is a path plus what it was discovered to be. Nodes are built per
//! call from the path and dropped afterwards; only open file handles keep a
//! [`FileNode`] alive, so writes can accumulate in its buffer until flush.

use std::sync::Arc;

use etcdfs_kv::{KvStore, ScanRequest};

use crate::buffer::ContentBuffer;
use crate::error::FsError;
use crate::inode::inode_of;
use crate::path::{resolve, ROOT};
use crate::readdir::{self, DirEntry, ListLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Directory,
}

/// A leaf: one key and its content buffer.
#[derive(Debug)]
pub struct FileNode {
    path: String,
    buffer: ContentBuffer,
}

impl FileNode {
    pub fn new(store: Arc<dyn KvStore>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            buffer: ContentBuffer::new(store, path.clone()),
            path,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn inode(&self) -> u64 {
        inode_of(&self.path)
    }

    pub async fn open(&self) -> Result<(), FsError> {
        self.buffer.open().await
    }

    pub async fn is_loaded(&self) -> bool {
        self.buffer.is_loaded().await
    }

    pub fn is_dirty(&self) -> bool {
        self.buffer.is_dirty()
    }

    pub async fn size(&self) -> u64 {
        self.buffer.len().await
    }

    pub async fn read(&self, offset: u64, size: usize) -> Vec<u8> {
        self.buffer.read(offset, size).await
    }

    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        self.buffer.write(offset, data).await
    }

    pub async fn flush(&self) -> Result<(), FsError> {
        self.buffer.flush().await
    }

    /// Durability is only ever reached through flush; sync has nothing to do.
    pub async fn sync(&self) -> Result<(), FsError> {
        Ok(())
    }

    pub async fn set_size(&self, size: u64) -> Result<(), FsError> {
        self.buffer.set_size(size).await
    }

    pub async fn delete(&self) -> Result<(), FsError> {
        self.buffer.delete().await
    }
}

/// A directory: a path under which keys exist. Never stored itself.
#[derive(Clone)]
pub struct DirNode {
    path: String,
    store: Arc<dyn KvStore>,
}

impl DirNode {
    pub fn new(store: Arc<dyn KvStore>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            store,
        }
    }

    pub fn root(store: Arc<dyn KvStore>) -> Self {
        Self::new(store, ROOT)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn inode(&self) -> u64 {
        inode_of(&self.path)
    }

    async fn first_key(&self, req: ScanRequest, path: &str) -> Result<Option<Vec<u8>>, FsError> {
        let result = self.store.scan(&req.with_limit(1)).await.map_err(|status| {
            tracing::error!(path = %path, error = %status, "failed to list keys");
            FsError::Io(status)
        })?;
        Ok(result.keys.into_iter().next())
    }

    async fn has_descendants(&self, full: &str) -> Result<bool, FsError> {
        let below = resolve(full, "");
        Ok(self.first_key(ScanRequest::prefix(below), full).await?.is_some())
    }

    /// Classify `self/name` from the keys that start with it.
    ///
    /// The path is a directory when any key lies below `path + "/"`, a file
    /// when the exact key exists and nothing lies below it, and missing
    /// otherwise. The first scan is the prefix scan over the path itself;
    /// a second scan settles the cases it cannot (an exact key that may also
    /// have children, or a sibling such as `path-x` sorting first).
    pub async fn lookup(&self, name: &str) -> Result<TreeNode, FsError> {
        let full = resolve(&self.path, name);
        let below = resolve(&full, "");

        let first = self
            .first_key(ScanRequest::prefix(full.clone()), &full)
            .await?
            .ok_or_else(|| FsError::NotFound(full.clone()))?;

        let kind = if first.starts_with(below.as_bytes()) {
            NodeKind::Directory
        } else if self.has_descendants(&full).await? {
            NodeKind::Directory
        } else if first == full.as_bytes() {
            NodeKind::File
        } else {
            return Err(FsError::NotFound(full));
        };

        tracing::debug!(path = %full, ?kind, "resolved");
        Ok(TreeNode::new(self.store.clone(), full, kind))
    }

    pub async fn list_children(&self, limits: ListLimits) -> Result<Vec<DirEntry>, FsError> {
        readdir::list_children(self.store.as_ref(), &self.path, limits).await
    }

    /// Create `self/name` as an empty file, durable immediately.
    pub async fn create(&self, name: &str) -> Result<FileNode, FsError> {
        let node = FileNode::new(self.store.clone(), resolve(&self.path, name));
        node.buffer.create().await?;
        Ok(node)
    }

    /// Remove the key `self/name`. Removing a missing key succeeds.
    pub async fn unlink(&self, name: &str) -> Result<(), FsError> {
        FileNode::new(self.store.clone(), resolve(&self.path, name))
            .delete()
            .await
    }
}

impl std::fmt::Debug for DirNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirNode").field("path", &self.path).finish()
    }
}

/// A node of either kind. Kind-specific operations are reached through
/// [`TreeNode::into_file`] / [`TreeNode::into_dir`].
#[derive(Debug)]
pub enum TreeNode {
    File(FileNode),
    Directory(DirNode),
}

impl TreeNode {
    pub fn new(store: Arc<dyn KvStore>, path: impl Into<String>, kind: NodeKind) -> Self {
        match kind {
            NodeKind::File => TreeNode::File(FileNode::new(store, path)),
            NodeKind::Directory => TreeNode::Directory(DirNode::new(store, path)),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            TreeNode::File(f) => f.path(),
            TreeNode::Directory(d) => d.path(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            TreeNode::File(_) => NodeKind::File,
            TreeNode::Directory(_) => NodeKind::Directory,
        }
    }

    pub fn inode(&self) -> u64 {
        inode_of(self.path())
    }

    pub fn into_file(self) -> Result<FileNode, FsError> {
        match self {
            TreeNode::File(f) => Ok(f),
            TreeNode::Directory(d) => Err(FsError::IsDirectory(d.path)),
        }
    }

    pub fn into_dir(self) -> Result<DirNode, FsError> {
        match self {
            TreeNode::Directory(d) => Ok(d),
            TreeNode::File(f) => Err(FsError::NotDirectory(f.path)),
        }
    }
}
