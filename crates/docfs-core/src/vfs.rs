//! Filesystem core: the namespace, the document-backed content store and
//! the open handle table behind one call surface.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::document::DocumentStore;
use crate::error::{FsError, FsResult};
use crate::storage::RandomAccessStore;
use crate::tree::{Leaf, Node, NodeKind, PathTree};
use crate::{Attributes, BackingId, DirEntry, FileType, FsConfig, HandleId, NodeId, StatfsData};

const NAME_MAX: u32 = 255;

/// Open file handle
#[derive(Clone, Debug)]
struct Handle {
    node: NodeId,
    backing: BackingId,
}

/// The filesystem. Every call runs to completion before the next one; no
/// locking happens here.
pub struct FsCore {
    config: FsConfig,
    tree: PathTree,
    storage: RandomAccessStore,
    handles: HashMap<HandleId, Handle>,
    next_handle_id: u64,
}

impl FsCore {
    pub fn new(config: FsConfig, documents: Arc<dyn DocumentStore>) -> Self {
        let tree = PathTree::new(config.defaults.root_mode, config.defaults.uid, config.defaults.gid);
        let storage = RandomAccessStore::new(documents, config.write.clone(), config.limits.max_file_size);
        Self {
            config,
            tree,
            storage,
            handles: HashMap::new(),
            next_handle_id: 1,
        }
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Number of currently open handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn check_handle_capacity(&self) -> FsResult<()> {
        if self.handles.len() >= self.config.limits.max_open_handles as usize {
            return Err(FsError::TooManyOpenFiles);
        }
        Ok(())
    }

    fn bind_handle(&mut self, node: NodeId, backing: BackingId) -> FsResult<HandleId> {
        self.check_handle_capacity()?;
        let id = HandleId(self.next_handle_id);
        self.next_handle_id += 1;
        self.handles.insert(id, Handle { node, backing });
        Ok(id)
    }

    fn handle(&self, id: HandleId) -> FsResult<&Handle> {
        self.handles.get(&id).ok_or(FsError::BadHandle)
    }

    /// Record a content change reported by the store.
    fn record_size(&mut self, node: NodeId, size: u64, modified: bool) {
        // The node may have been unlinked while the handle stayed open
        if let Some(node) = self.tree.node_mut(node) {
            node.size = size;
            if modified {
                node.touch();
            }
        }
    }

    // File operations

    /// Create a regular file and open it. Missing parent directories are
    /// created with the configured directory mode.
    pub fn create(&mut self, path: &Path, mode: u32) -> FsResult<HandleId> {
        debug!(path = %path.display(), mode = %format!("{:o}", mode), "create");
        if self.tree.resolve(path).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        let parent = path.parent().ok_or(FsError::InvalidArgument)?;
        let name = path
            .file_name()
            .ok_or(FsError::InvalidArgument)?
            .to_str()
            .ok_or(FsError::InvalidName)?;
        self.check_handle_capacity()?;

        self.tree.ensure_directories(parent, self.config.defaults.dir_mode)?;
        let title = path.to_string_lossy();
        let backing = self.storage.create_backing(&title)?;

        let leaf = Leaf::File {
            backing: backing.clone(),
            mode,
        };
        let node = match self.tree.insert_leaf(parent, name, leaf) {
            Ok(node) => node,
            Err(e) => {
                if let Err(cleanup) = self.storage.delete_backing(&backing) {
                    warn!(%backing, error = %cleanup, "failed to delete orphaned backing document");
                }
                return Err(e);
            }
        };
        self.bind_handle(node, backing)
    }

    pub fn open(&mut self, path: &Path) -> FsResult<HandleId> {
        debug!(path = %path.display(), "open");
        let id = self.tree.resolve(path)?;
        let node = self.tree.node(id).ok_or(FsError::NotFound)?;
        let backing = match &node.kind {
            NodeKind::File { backing } => backing.clone(),
            NodeKind::Directory { .. } => return Err(FsError::IsADirectory),
            NodeKind::Symlink { .. } => return Err(FsError::InvalidArgument),
        };
        self.bind_handle(id, backing)
    }

    /// Read up to `size` bytes at `offset`; short at end of file.
    pub fn read(&mut self, handle: HandleId, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let Handle { node, backing } = self.handle(handle)?.clone();
        debug!(handle = handle.0, offset, size, "read");
        let (bytes, total) = self.storage.read(&backing, offset, Some(u64::from(size)))?;
        self.record_size(node, total, false);
        Ok(bytes)
    }

    pub fn write(&mut self, handle: HandleId, offset: u64, data: &[u8]) -> FsResult<usize> {
        let Handle { node, backing } = self.handle(handle)?.clone();
        debug!(handle = handle.0, offset, len = data.len(), "write");
        let total = self.storage.write(&backing, offset, data)?;
        self.record_size(node, total, true);
        Ok(data.len())
    }

    pub fn truncate(&mut self, handle: HandleId, len: u64) -> FsResult<()> {
        let Handle { node, backing } = self.handle(handle)?.clone();
        debug!(handle = handle.0, len, "truncate");
        self.storage.truncate(&backing, len)?;
        self.record_size(node, len, true);
        Ok(())
    }

    pub fn truncate_path(&mut self, path: &Path, len: u64) -> FsResult<()> {
        debug!(path = %path.display(), len, "truncate");
        let id = self.tree.resolve(path)?;
        let backing = match &self.tree.node(id).ok_or(FsError::NotFound)?.kind {
            NodeKind::File { backing } => backing.clone(),
            NodeKind::Directory { .. } => return Err(FsError::IsADirectory),
            NodeKind::Symlink { .. } => return Err(FsError::InvalidArgument),
        };
        self.storage.truncate(&backing, len)?;
        self.record_size(id, len, true);
        Ok(())
    }

    /// Writes go straight to the backend, so there is nothing to flush.
    pub fn flush(&self, handle: HandleId) -> FsResult<()> {
        self.handle(handle).map(|_| ())
    }

    pub fn fsync(&self, handle: HandleId) -> FsResult<()> {
        self.handle(handle).map(|_| ())
    }

    pub fn release(&mut self, handle: HandleId) -> FsResult<()> {
        debug!(handle = handle.0, "release");
        self.handles.remove(&handle).map(|_| ()).ok_or(FsError::BadHandle)
    }

    // Namespace operations

    pub fn mkdir(&mut self, path: &Path, mode: u32) -> FsResult<()> {
        debug!(path = %path.display(), mode = %format!("{:o}", mode), "mkdir");
        if self.tree.resolve(path).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        if let Some(parent) = path.parent() {
            self.tree.ensure_directories(parent, self.config.defaults.dir_mode)?;
        }
        self.tree.ensure_directories(path, mode)?;
        Ok(())
    }

    pub fn rmdir(&mut self, path: &Path) -> FsResult<()> {
        debug!(path = %path.display(), "rmdir");
        let id = self.tree.resolve(path)?;
        if !self.tree.node(id).ok_or(FsError::NotFound)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        self.tree.remove(path)?;
        Ok(())
    }

    /// Remove a file or symlink. A file's backing document is deleted with it.
    pub fn unlink(&mut self, path: &Path) -> FsResult<()> {
        debug!(path = %path.display(), "unlink");
        let id = self.tree.resolve(path)?;
        if self.tree.node(id).ok_or(FsError::NotFound)?.is_dir() {
            return Err(FsError::IsADirectory);
        }
        // The document goes first so a failed delete leaves the entry in place
        if let Some(backing) = self.tree.node(id).and_then(|node| node.backing()).cloned() {
            self.storage.delete_backing(&backing)?;
        }
        self.tree.remove(path)?;
        Ok(())
    }

    pub fn rename(&mut self, from: &Path, to: &Path) -> FsResult<()> {
        debug!(from = %from.display(), to = %to.display(), "rename");
        self.tree.move_subtree(from, to)
    }

    /// Entries of a directory, starting with `.` and `..`.
    pub fn readdir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        debug!(path = %path.display(), "readdir");
        let id = self.tree.resolve(path)?;
        let node = self.tree.node(id).ok_or(FsError::NotFound)?;
        let parent = node.parent.unwrap_or(id);

        let mut entries = vec![
            DirEntry {
                name: ".".to_string(),
                node: id,
                file_type: FileType::Directory,
            },
            DirEntry {
                name: "..".to_string(),
                node: parent,
                file_type: FileType::Directory,
            },
        ];
        entries.extend(self.tree.list(path)?.into_iter().map(|(name, child)| DirEntry {
            name: name.to_string(),
            node: child.id,
            file_type: child.file_type(),
        }));
        Ok(entries)
    }

    pub fn symlink(&mut self, target: &str, link: &Path) -> FsResult<()> {
        debug!(link_target = target, link = %link.display(), "symlink");
        let parent = link.parent().ok_or(FsError::InvalidArgument)?;
        let name = link
            .file_name()
            .ok_or(FsError::InvalidArgument)?
            .to_str()
            .ok_or(FsError::InvalidName)?;
        self.tree.insert_leaf(
            parent,
            name,
            Leaf::Symlink {
                target: target.to_string(),
            },
        )?;
        Ok(())
    }

    pub fn readlink(&self, path: &Path) -> FsResult<String> {
        let id = self.tree.resolve(path)?;
        match &self.tree.node(id).ok_or(FsError::NotFound)?.kind {
            NodeKind::Symlink { target } => Ok(target.clone()),
            _ => Err(FsError::InvalidArgument),
        }
    }

    // Metadata operations

    pub fn getattr(&self, path: &Path) -> FsResult<Attributes> {
        let id = self.tree.resolve(path)?;
        self.getattr_node(id)
    }

    pub fn getattr_node(&self, id: NodeId) -> FsResult<Attributes> {
        self.tree.node(id).map(|node| node.attributes()).ok_or(FsError::NotFound)
    }

    fn node_at(&mut self, path: &Path) -> FsResult<&mut Node> {
        let id = self.tree.resolve(path)?;
        self.tree.node_mut(id).ok_or(FsError::NotFound)
    }

    pub fn set_mode(&mut self, path: &Path, mode: u32) -> FsResult<()> {
        debug!(path = %path.display(), mode = %format!("{:o}", mode), "chmod");
        let node = self.node_at(path)?;
        node.mode = mode & 0o7777;
        node.times.ctime = SystemTime::now();
        Ok(())
    }

    /// Change ownership; `None` leaves that id unchanged.
    pub fn set_owner(&mut self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        debug!(path = %path.display(), ?uid, ?gid, "chown");
        let node = self.node_at(path)?;
        if let Some(uid) = uid {
            node.uid = uid;
        }
        if let Some(gid) = gid {
            node.gid = gid;
        }
        node.times.ctime = SystemTime::now();
        Ok(())
    }

    pub fn set_times(&mut self, path: &Path, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> FsResult<()> {
        debug!(path = %path.display(), "utimens");
        let node = self.node_at(path)?;
        if let Some(atime) = atime {
            node.times.atime = atime;
        }
        if let Some(mtime) = mtime {
            node.times.mtime = mtime;
        }
        node.times.ctime = SystemTime::now();
        Ok(())
    }

    pub fn statfs(&self) -> StatfsData {
        let policy = &self.config.statfs;
        let files = self.tree.len() as u64;
        StatfsData {
            block_size: policy.block_size,
            blocks: policy.blocks,
            blocks_free: policy.blocks_available,
            blocks_available: policy.blocks_available,
            files,
            files_free: u64::from(u32::MAX).saturating_sub(files),
            name_max: NAME_MAX,
        }
    }
}
