//! Inode number to path bookkeeping for the FUSE adapter
//!
//! Inode numbers are the core's node ids, so they stay stable across
//! renames; only the remembered paths have to follow a moved subtree.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use docfs_core::NodeId;

pub struct InodeTable {
    paths: HashMap<u64, PathBuf>,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut paths = HashMap::new();
        paths.insert(NodeId::ROOT.0, PathBuf::from("/"));
        Self { paths }
    }

    pub fn path(&self, ino: u64) -> Option<&Path> {
        self.paths.get(&ino).map(PathBuf::as_path)
    }

    /// Full path of `name` inside the directory known as `parent`.
    pub fn child_path(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        self.path(parent).map(|dir| dir.join(name))
    }

    pub fn remember(&mut self, ino: u64, path: PathBuf) {
        self.paths.insert(ino, path);
    }

    pub fn forget_path(&mut self, path: &Path) {
        self.paths.retain(|_, p| p != path);
    }

    /// Re-root every remembered path under `from` at `to`.
    pub fn rename(&mut self, from: &Path, to: &Path) {
        for path in self.paths.values_mut() {
            let Ok(rest) = path.strip_prefix(from) else {
                continue;
            };
            *path = if rest.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rest)
            };
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_known() {
        let table = InodeTable::new();
        assert_eq!(table.path(1), Some(Path::new("/")));
        assert_eq!(table.child_path(1, OsStr::new("a")), Some(PathBuf::from("/a")));
        assert_eq!(table.child_path(99, OsStr::new("a")), None);
    }

    #[test]
    fn test_rename_moves_descendants_only() {
        let mut table = InodeTable::new();
        table.remember(2, PathBuf::from("/a"));
        table.remember(3, PathBuf::from("/a/b"));
        table.remember(4, PathBuf::from("/a/b/f"));
        table.remember(5, PathBuf::from("/ab"));

        table.rename(Path::new("/a/b"), Path::new("/c/b"));

        assert_eq!(table.path(2), Some(Path::new("/a")));
        assert_eq!(table.path(3), Some(Path::new("/c/b")));
        assert_eq!(table.path(4), Some(Path::new("/c/b/f")));
        assert_eq!(table.path(5), Some(Path::new("/ab")));
    }

    #[test]
    fn test_forget_path() {
        let mut table = InodeTable::new();
        table.remember(2, PathBuf::from("/gone"));
        table.forget_path(Path::new("/gone"));
        assert_eq!(table.path(2), None);
        assert_eq!(table.len(), 1);
    }
}
