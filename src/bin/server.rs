//! scene-sync-server binary
//!
//! Hosts the authoritative operation log for one scene and serves it over
//! TCP (one JSON document per line).
//!
//! ## Configuration (TOML via `--config`, env, flags)
//!
//! | Key                          | Default          | Description                     |
//! |------------------------------|------------------|---------------------------------|
//! | `SCENE_CONFIG`               | *(none)*         | Path to a TOML settings file    |
//! | `SCENE_LISTEN`               | `127.0.0.1:7420` | TCP listen address              |
//! | `SCENE_PUSH_BUFFER`          | `1024`           | Push channel capacity           |
//! | `SCENE_MAX_RANGE`            | `10000`          | Widest `missing_range` answered |
//!
//! Flags override the file and `SCENE_SERVER__*` settings.

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use scene_sync::{SceneServer, SceneService, Settings};
use std::path::PathBuf;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "scene-sync-server", about = "Scene Sync operation log server", version)]
struct Args {
    /// TOML settings file
    #[arg(long, env = "SCENE_CONFIG")]
    config: Option<PathBuf>,

    /// TCP listen address
    #[arg(long, env = "SCENE_LISTEN")]
    listen: Option<String>,

    /// Push channel capacity
    #[arg(long, env = "SCENE_PUSH_BUFFER")]
    push_buffer: Option<usize>,

    /// Widest missing-range request answered
    #[arg(long, env = "SCENE_MAX_RANGE")]
    max_range: Option<u64>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scene_sync=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut settings =
        Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    if let Some(listen) = args.listen {
        settings.server.listen = listen;
    }
    if let Some(push_buffer) = args.push_buffer {
        settings.server.push_buffer = push_buffer;
    }
    if let Some(max_range) = args.max_range {
        settings.server.max_range = max_range;
    }

    log::info!(
        "Starting scene-sync-server (listen={}, push_buffer={}, max_range={})",
        settings.server.listen,
        settings.server.push_buffer,
        settings.server.max_range,
    );

    let service = Arc::new(Mutex::new(SceneService::new(settings.server.clone())));

    // Run until shutdown
    SceneServer::new(settings.server, service).run().await
}
