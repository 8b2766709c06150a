// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use xcm_monitor::config::{Config, MonitorNodeConfig};
use xcm_monitor::ingress::FileReplayIngress;
use xcm_monitor::node::run_monitor_node;
use xcm_monitor::types::NetworkId;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
    /// Directory of per-network NDJSON decoded-block files to replay. Live
    /// chain connectivity comes from an external ingestion service.
    #[clap(long)]
    pub replay_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = MonitorNodeConfig::load(&args.config_path)?;
    let prometheus_registry = prometheus::Registry::new();

    let Some(replay_dir) = args.replay_dir else {
        anyhow::bail!(
            "no ingestion source configured: pass --replay-dir or run behind an ingestion service"
        );
    };
    let networks: Vec<NetworkId> = config
        .networks
        .iter()
        .map(|n| NetworkId::from(n.id.as_str()))
        .collect();
    let ingress = Arc::new(FileReplayIngress::new(replay_dir, networks));

    let handle = run_monitor_node(config, ingress, &prometheus_registry).await?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    handle.shutdown().await;
    Ok(())
}
