// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Composition root.
//!
//! Owns every long-lived resource: the embedded database, the per-network
//! stream registry, the matching shards, the janitor and the notifier hub.
//! Consumers receive capabilities (channels, store handles) whose lifetime
//! is bound to the shutdown token; nothing is a lazily-initialized global.

use crate::config::MonitorNodeConfig;
use crate::extractor::extract_facts;
use crate::ingress::{IngressConsumer, StreamRegistry};
use crate::matching::{
    open_database, spawn_janitor, Matcher, MatchingEngine, RocksDbStore, WaitingStore,
};
use crate::metrics::MonitorMetrics;
use crate::notifier::NotifierHub;
use crate::subscriptions::SubsStore;
use crate::types::NetworkId;
use crate::XCM_AGENT_ID;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Running node: the shutdown token plus every worker handle, and the store
/// handles exposed for audit reads and subscription management.
pub struct MonitorHandle {
    pub store: Arc<dyn WaitingStore>,
    pub subscriptions: Arc<SubsStore>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Cancels every worker and waits for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!("worker task join error: {}", e);
            }
        }
        info!("monitor node stopped");
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

pub async fn run_monitor_node(
    config: MonitorNodeConfig,
    ingress: Arc<dyn IngressConsumer>,
    prometheus_registry: &prometheus::Registry,
) -> anyhow::Result<MonitorHandle> {
    config.validate()?;
    let metrics = Arc::new(MonitorMetrics::new(prometheus_registry));

    let db = open_database(&config.db_path)?;
    let store: Arc<dyn WaitingStore> = Arc::new(RocksDbStore::new(db.clone()));
    let subscriptions = Arc::new(SubsStore::new(db));

    // Entries written before the restart are picked up as-is; the janitor's
    // first sweep resolves any whose deadline already passed.
    let reloaded = store.pending_count().await?;
    info!(
        "waiting-state store reloaded with {} in-flight journeys",
        reloaded
    );

    let cancel = CancellationToken::new();
    let (terminal_tx, terminal_rx) = mpsc::channel(1024);

    let matcher = Matcher::new(store.clone(), config.matching.clone(), terminal_tx)
        .with_metrics(metrics.clone());
    let (engine, mut handles) =
        MatchingEngine::start(matcher, config.matching.shards, cancel.clone());
    handles.push(spawn_janitor(
        store.clone(),
        engine.clone(),
        config.matching.sweep_interval_ms,
        cancel.clone(),
    ));

    let hub = NotifierHub::new(subscriptions.clone(), XCM_AGENT_ID).with_metrics(metrics.clone());
    handles.push(hub.start(terminal_rx, cancel.clone()));

    let networks: Vec<NetworkId> = config
        .networks
        .iter()
        .map(|n| NetworkId::from(n.id.as_str()))
        .collect();
    let mut streams = StreamRegistry::open(ingress, &networks).await?;
    for network in &networks {
        let rx = streams.subscribe(network)?;
        handles.push(spawn_ingest(
            network.clone(),
            rx,
            engine.clone(),
            metrics.clone(),
            cancel.clone(),
        ));
    }
    handles.extend(streams.start(&cancel));

    handles.push(spawn_gauge_refresh(
        store.clone(),
        metrics.clone(),
        cancel.clone(),
    ));

    info!(
        "monitor node started: networks={}, shards={}, window={}ms",
        networks.len(),
        config.matching.shards,
        config.matching.max_inflight_window_ms
    );
    Ok(MonitorHandle {
        store,
        subscriptions,
        cancel,
        handles,
    })
}

fn spawn_ingest(
    network: NetworkId,
    mut blocks: broadcast::Receiver<Arc<crate::extractor::DecodedBlock>>,
    engine: MatchingEngine,
    metrics: Arc<MonitorMetrics>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                block = blocks.recv() => {
                    match block {
                        Ok(block) => {
                            for fact in extract_facts(&block) {
                                let kind = fact.kind.to_string();
                                metrics
                                    .facts_received
                                    .with_label_values(&[network.as_str(), kind.as_str()])
                                    .inc();
                                engine.submit_fact(fact).await;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("[{}] ingest lagged, {} blocks missed", network, missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        info!("[{}] ingest stopped", network);
    })
}

fn spawn_gauge_refresh(
    store: Arc<dyn WaitingStore>,
    metrics: Arc<MonitorMetrics>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            match store.pending_count().await {
                Ok(count) => metrics.pending_entries.set(count as i64),
                Err(e) => warn!("pending gauge refresh failed: {}", e),
            }
        }
    })
}
