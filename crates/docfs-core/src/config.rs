//! Configuration types for DocFS Core

use serde::{Deserialize, Serialize};

/// Which document store backs file content
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum BackendConfig {
    /// Process-local documents; content is lost on unmount
    Memory,
    /// Google Docs for content, Google Drive for deletion
    GoogleDocs(GoogleDocsConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleDocsConfig {
    pub docs_api_base: String,
    pub drive_api_base: String,
    /// Environment variable holding an OAuth access token
    pub access_token_env: String,
    pub timeout_ms: u64,
}

impl Default for GoogleDocsConfig {
    fn default() -> Self {
        Self {
            docs_api_base: "https://docs.googleapis.com".to_string(),
            drive_api_base: "https://www.googleapis.com".to_string(),
            access_token_env: "DOCFS_ACCESS_TOKEN".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// Cache policy settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachePolicy {
    pub attr_ttl_ms: u32,
    pub entry_ttl_ms: u32,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            attr_ttl_ms: 1000,
            entry_ttl_ms: 1000,
        }
    }
}

/// System limits
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FsLimits {
    pub max_open_handles: u32,
    /// Largest file size in bytes that a write or truncate may produce
    pub max_file_size: u64,
}

impl Default for FsLimits {
    fn default() -> Self {
        Self {
            max_open_handles: 10000,
            max_file_size: 16 * 1024 * 1024,
        }
    }
}

/// How whole-document replacements guard against concurrent editors
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WritePolicy {
    /// Send the revision observed at fetch time as an edit precondition
    pub require_revision: bool,
    /// Fresh read-modify-write attempts after a revision conflict
    pub max_conflict_retries: u32,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            require_revision: true,
            max_conflict_retries: 3,
        }
    }
}

/// Attributes given to nodes the caller did not describe
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeDefaults {
    pub root_mode: u32,
    /// Mode of parent directories created implicitly by `create`
    pub dir_mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl Default for NodeDefaults {
    fn default() -> Self {
        Self {
            root_mode: 0o755,
            dir_mode: 0o755,
            uid: 0,
            gid: 0,
        }
    }
}

/// Numbers reported by `statfs`; the remote store has no real capacity
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatfsPolicy {
    pub block_size: u32,
    pub blocks: u64,
    pub blocks_available: u64,
}

impl Default for StatfsPolicy {
    fn default() -> Self {
        Self {
            block_size: 512,
            blocks: 4096,
            blocks_available: 2048,
        }
    }
}

/// Main filesystem configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub backend: BackendConfig,
    pub cache: CachePolicy,
    pub limits: FsLimits,
    pub write: WritePolicy,
    pub defaults: NodeDefaults,
    pub statfs: StatfsPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: FsConfig = serde_json::from_str(r#"{ "limits": { "max_open_handles": 8 } }"#).unwrap();
        assert_eq!(config.limits.max_open_handles, 8);
        assert_eq!(config.limits.max_file_size, 16 * 1024 * 1024);
        assert!(config.write.require_revision);
        assert_eq!(config.defaults.dir_mode, 0o755);
        assert!(matches!(config.backend, BackendConfig::Memory));
    }

    #[test]
    fn test_google_backend_keeps_unset_fields_default() {
        let config: FsConfig = serde_json::from_str(
            r#"{ "backend": { "GoogleDocs": { "access_token_env": "MY_TOKEN" } } }"#,
        )
        .unwrap();
        match config.backend {
            BackendConfig::GoogleDocs(google) => {
                assert_eq!(google.access_token_env, "MY_TOKEN");
                assert_eq!(google.docs_api_base, "https://docs.googleapis.com");
                assert_eq!(google.timeout_ms, 30_000);
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }
}
