//! fused - Mount a directory with in-memory files layered on top.
//!
//! Usage: fused <SOURCE> <MOUNT> [--virtual PATH=CONTENT]...

use anyhow::{Context, Result};
use clap::Parser;
use fused_core::{FsLayer, InMemoryFile, RealFs, VirtualFs, compose};
use fused_fuse::{MountConfig, backend};
use fused_mount::{MountOptions, MountPaths, UnmountGuard};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the main thread checks that the mount is still attached.
const MOUNT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "fused")]
#[command(about = "Mount a directory with virtual files layered on top")]
#[command(version)]
struct Cli {
    /// Directory to expose
    source: PathBuf,

    /// Mountpoint for the filesystem
    mount: PathBuf,

    /// Add an in-memory file at PATH (relative to the mount root)
    #[arg(long = "virtual", value_name = "PATH=CONTENT", value_parser = parse_virtual)]
    virtual_files: Vec<(String, String)>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Fail instead of detaching a previous mount at MOUNT
    #[arg(long)]
    no_force: bool,

    /// Fail instead of creating a missing MOUNT directory
    #[arg(long)]
    no_create: bool,
}

fn parse_virtual(arg: &str) -> Result<(String, String), String> {
    let (path, content) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected PATH=CONTENT, got '{arg}'"))?;
    if path.is_empty() {
        return Err("virtual file path is empty".to_string());
    }
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Ok((path, content.to_string()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let paths = MountPaths::new(&cli.source, &cli.mount).context("Invalid mount paths")?;
    let guard = paths.guard();

    let mut overlays: Vec<Box<dyn FsLayer>> = Vec::with_capacity(cli.virtual_files.len());
    for (path, content) in &cli.virtual_files {
        let provider = Arc::new(InMemoryFile::new(path.as_str(), content.as_bytes()));
        let layer = VirtualFs::new(provider, guard.clone())
            .with_context(|| format!("Failed to set up virtual file {path}"))?;
        info!(path = %path, size = content.len(), "Virtual file registered");
        overlays.push(Box::new(layer));
    }
    let store = compose(Box::new(RealFs::new(guard)), overlays);

    let source_name = paths
        .source()
        .file_name()
        .map_or_else(|| "root".to_string(), |n| n.to_string_lossy().to_string());
    let config = MountConfig::default()
        .fs_name(format!("fused:{source_name}"))
        .options(MountOptions {
            force: !cli.no_force,
            auto_create: !cli.no_create,
            ..MountOptions::default()
        });

    let unmount = Arc::new(UnmountGuard::new());
    {
        let unmount = Arc::clone(&unmount);
        ctrlc::set_handler(move || {
            if unmount.request() {
                info!("Received interrupt signal, unmounting...");
            } else {
                warn!("Already unmounting");
            }
        })
        .context("Failed to set signal handler")?;
    }

    let handle = backend::mount(store, &paths, &config).context("Failed to mount filesystem")?;
    info!(
        "Mounted {} at {} (press Ctrl+C to unmount)",
        paths.source().display(),
        handle.mountpoint().display()
    );

    // Also stop when someone detaches the mount behind our back (fusermount -u)
    while !unmount.wait_timeout(MOUNT_CHECK_INTERVAL) {
        if !handle.is_attached() {
            warn!(mountpoint = %handle.mountpoint().display(), "Mount detached externally");
            unmount.request();
        }
    }
    handle.unmount();
    info!("Filesystem unmounted");
    Ok(())
}
