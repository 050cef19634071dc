//! DocFS Core: a filesystem whose file contents live in remote text documents
//!
//! This crate provides the namespace, the byte codec, random-access storage
//! on top of whole-document edits, and the handle-based filesystem core.
//! Platform glue (FUSE) lives in the host crate.

pub mod codec;
pub mod config;
pub mod document;
pub mod error;
pub mod gdocs;
pub mod storage;
pub mod tree;
pub mod types;
pub mod vfs;

// Re-export key types for convenience
pub use config::{BackendConfig, CachePolicy, FsConfig, FsLimits, GoogleDocsConfig, NodeDefaults, StatfsPolicy, WritePolicy};
pub use document::{DocumentStore, DocumentStoreError, MemoryDocumentStore};
pub use error::{FsError, FsResult};
pub use gdocs::GoogleDocsStore;
pub use types::*;
pub use vfs::FsCore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(FsError::NotFound.to_string(), "not found");
        assert_eq!(FsError::BadHandle.errno(), libc::EBADF);
    }

    #[test]
    fn test_config_creation() {
        let config = FsConfig {
            limits: FsLimits {
                max_open_handles: 16,
                ..FsLimits::default()
            },
            write: WritePolicy {
                require_revision: false,
                max_conflict_retries: 0,
            },
            ..FsConfig::default()
        };
        assert_eq!(config.limits.max_open_handles, 16);
        assert!(!config.write.require_revision);
    }
}
