//! DocFS FUSE Host: mounts a document-backed filesystem
//!
//! This binary mounts a DocFS volume using libfuse (Linux) or macFUSE
//! (macOS). File contents live in remote documents; the namespace lives in
//! memory for the lifetime of the mount.

#[cfg(feature = "fuse")]
mod adapter;
#[cfg_attr(not(feature = "fuse"), allow(dead_code))]
mod inodes;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(feature = "fuse")]
use adapter::DocFsFuse;
use anyhow::{Context, Result};
use clap::Parser;
use docfs_core::{BackendConfig, DocumentStore, FsConfig, FsCore, GoogleDocsStore, MemoryDocumentStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Mount a filesystem whose files are stored in remote documents")]
struct Args {
    /// Mount point for the filesystem
    mount_point: PathBuf,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep file contents in process memory instead of the configured backend
    #[arg(long)]
    memory: bool,

    /// Allow other users to access the filesystem
    #[arg(long)]
    allow_other: bool,

    /// Allow root to access the filesystem
    #[arg(long)]
    allow_root: bool,

    /// Auto unmount on process exit
    #[arg(long)]
    auto_unmount: bool,
}

fn load_config(config_path: Option<PathBuf>) -> Result<FsConfig> {
    match config_path {
        Some(path) => {
            let content =
                fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
            let config: FsConfig =
                serde_json::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
            Ok(config)
        }
        None => Ok(FsConfig::default()),
    }
}

fn build_store(backend: &BackendConfig) -> Result<Arc<dyn DocumentStore>> {
    match backend {
        BackendConfig::Memory => {
            warn!("using in-memory documents; contents are lost on unmount");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
        BackendConfig::GoogleDocs(google) => {
            let token = std::env::var(&google.access_token_env)
                .with_context(|| format!("access token variable {} is not set", google.access_token_env))?;
            info!(docs = %google.docs_api_base, drive = %google.drive_api_base, "using Google Docs backend");
            Ok(Arc::new(GoogleDocsStore::new(google, &token)))
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    info!("Starting DocFS FUSE Host");
    info!("Mount point: {}", args.mount_point.display());

    let mut config = load_config(args.config)?;
    if args.memory {
        config.backend = BackendConfig::Memory;
    }
    info!("Configuration loaded: {:?}", config);

    let store = build_store(&config.backend)?;
    let core = FsCore::new(config, store);

    #[cfg(feature = "fuse")]
    {
        let filesystem = DocFsFuse::new(core);

        let mut mount_options = vec![
            fuser::MountOption::FSName("docfs".to_string()),
            fuser::MountOption::Subtype("docfs".to_string()),
        ];

        if args.allow_other {
            mount_options.push(fuser::MountOption::AllowOther);
        }

        if args.allow_root {
            mount_options.push(fuser::MountOption::AllowRoot);
        }

        if args.auto_unmount {
            mount_options.push(fuser::MountOption::AutoUnmount);
        }

        info!("Mounting filesystem...");
        fuser::mount2(filesystem, &args.mount_point, &mount_options)
            .with_context(|| format!("mounting at {}", args.mount_point.display()))?;
        info!("Filesystem unmounted");
    }

    #[cfg(not(feature = "fuse"))]
    {
        let _ = (core, args.allow_other, args.allow_root, args.auto_unmount);
        warn!("FUSE support not compiled in. This binary is for testing only.");
        info!("To enable FUSE support, compile with: cargo build --features fuse");
    }

    Ok(())
}
