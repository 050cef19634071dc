//! Core type definitions for DocFS

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Opaque handle identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

/// Internal node ID for namespace entries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

impl NodeId {
    pub const ROOT: NodeId = NodeId(1);
}

/// Identifier of the remote document holding a file's bytes
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackingId(String);

impl BackingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// File timestamps
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileTimes {
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub birthtime: SystemTime,
}

impl FileTimes {
    pub fn now() -> Self {
        let now = SystemTime::now();
        Self {
            atime: now,
            mtime: now,
            ctime: now,
            birthtime: now,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    Directory,
    File,
    Symlink,
}

/// File attributes
#[derive(Clone, Debug)]
pub struct Attributes {
    pub node: NodeId,
    pub file_type: FileType,
    pub size: u64,
    /// Permission bits only; the file type lives in `file_type`.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub times: FileTimes,
}

/// Directory entry information
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub name: String,
    pub node: NodeId,
    pub file_type: FileType,
}

/// Filesystem statistics reported by `statfs`
#[derive(Clone, Copy, Debug)]
pub struct StatfsData {
    pub block_size: u32,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub name_max: u32,
}
