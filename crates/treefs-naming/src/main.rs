#![warn(missing_docs)]

//! TreeFS naming server binary.
//!
//! Starts a naming service, registers the in-memory storage servers listed
//! in the config and replicates hot paths between them until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use treefs_naming::{MemoryStorageServer, NamingConfig, NamingService, Path};

/// TreeFS naming server
#[derive(Parser, Debug)]
#[command(name = "treefs-naming", version, about)]
struct Cli {
    /// Config file (TOML or JSON)
    #[arg(long, env = "TREEFS_NAMING_CONFIG", default_value = "treefs-naming.toml")]
    config: PathBuf,

    /// Seconds between replication passes
    #[arg(long, default_value_t = 1)]
    replication_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        NamingConfig::from_file(&cli.config)?
    } else {
        tracing::warn!("Config file not found, using defaults: {}", cli.config.display());
        NamingConfig::default()
    };

    let service = NamingService::start(config.clone())?;
    for (i, demo) in config.storage_servers.iter().enumerate() {
        let files = demo
            .files
            .iter()
            .map(|f| Path::parse(f))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let server = Arc::new(MemoryStorageServer::with_files(files.clone()));
        let duplicates = service
            .register(server.clone(), server, demo.capacity, files)
            .await?;
        if !duplicates.is_empty() {
            tracing::warn!(
                "demo server {} holds {} files already registered",
                i + 1,
                duplicates.len()
            );
        }
    }
    tracing::info!(
        "naming server ready with {} storage servers",
        service.server_count()
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(cli.replication_interval.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                if let Err(e) = replicate_pending(&service).await {
                    tracing::error!("replication pass failed: {}", e);
                }
            }
        }
    }

    tracing::info!("shutting down");
    service.shutdown().await;
    Ok(())
}

/// Copies every pending hot path to one more storage server.
async fn replicate_pending(service: &NamingService) -> Result<usize> {
    let mut copied = 0;
    for item in service.replication().take_pending()? {
        let Some(target) = service.plan_replica(&item)? else {
            continue;
        };
        let Some(source) = service.replicas(&item.path)?.first().copied() else {
            continue;
        };

        let source = service.storage_of(source)?;
        let storage = service.storage_of(target)?;
        match storage.copy(&item.path, source).await {
            Ok(true) => {
                service.record_replica(&item.path, target).await?;
                tracing::info!("replicated {} to server {}", item.path, target);
                copied += 1;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("cannot replicate {}: {}", item.path, e),
        }
    }
    Ok(copied)
}
