// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ingress consumption.
//!
//! Block ingestion and decoding live in an external collaborator; this
//! module defines the consumed interface and the per-network stream registry
//! the composition root owns. The registry replaces lazily-initialized
//! global stream caches: channels are created at startup, handed to
//! consumers as capabilities, and die with the shutdown token.

use crate::error::{MonitorError, MonitorResult};
use crate::extractor::DecodedBlock;
use crate::types::NetworkId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Interface to the block ingestion collaborator.
#[async_trait]
pub trait IngressConsumer: Send + Sync {
    fn is_network_defined(&self, network: &NetworkId) -> bool;

    fn network_ids(&self) -> Vec<NetworkId>;

    /// Opens the finalized-block stream of one network.
    async fn finalized_blocks(
        &self,
        network: &NetworkId,
    ) -> MonitorResult<mpsc::Receiver<DecodedBlock>>;

    /// Reads a raw storage value at an optional block hash.
    async fn get_storage(
        &self,
        network: &NetworkId,
        key: &str,
        at: Option<&str>,
    ) -> MonitorResult<Vec<u8>>;

    /// Pages raw storage keys under a prefix.
    async fn get_storage_keys(
        &self,
        network: &NetworkId,
        prefix: &str,
        count: u32,
        start_key: Option<&str>,
    ) -> MonitorResult<Vec<String>>;
}

/// Per-network finalized-block channels owned by the composition root.
///
/// Opening wires the channels without moving any data, so consumers can
/// subscribe before the pumps start and never miss the head of a stream.
pub struct StreamRegistry {
    channels: HashMap<NetworkId, broadcast::Sender<Arc<DecodedBlock>>>,
    pumps: Vec<Pump>,
}

struct Pump {
    network: NetworkId,
    source: mpsc::Receiver<DecodedBlock>,
    tx: broadcast::Sender<Arc<DecodedBlock>>,
}

impl StreamRegistry {
    /// Opens one channel per network against the ingress collaborator.
    pub async fn open(
        ingress: Arc<dyn IngressConsumer>,
        networks: &[NetworkId],
    ) -> MonitorResult<Self> {
        let mut channels = HashMap::new();
        let mut pumps = Vec::with_capacity(networks.len());
        for network in networks {
            if !ingress.is_network_defined(network) {
                return Err(MonitorError::Validation(format!(
                    "network not supported: {}",
                    network
                )));
            }
            let (tx, _) = broadcast::channel(256);
            let source = ingress.finalized_blocks(network).await?;
            channels.insert(network.clone(), tx.clone());
            pumps.push(Pump {
                network: network.clone(),
                source,
                tx,
            });
        }
        Ok(Self { channels, pumps })
    }

    /// Subscribes to one network's finalized blocks.
    pub fn subscribe(
        &self,
        network: &NetworkId,
    ) -> MonitorResult<broadcast::Receiver<Arc<DecodedBlock>>> {
        self.channels
            .get(network)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| MonitorError::NotFound(format!("no stream for network {}", network)))
    }

    pub fn network_ids(&self) -> Vec<NetworkId> {
        self.channels.keys().cloned().collect()
    }

    /// Spawns the pump tasks. Call after every consumer subscribed; the
    /// pumps stop with the token.
    pub fn start(&mut self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.pumps.len());
        for mut pump in self.pumps.drain(..) {
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        block = pump.source.recv() => {
                            match block {
                                Some(block) => {
                                    // No subscribers is fine; send only
                                    // fails when nobody listens.
                                    let _ = pump.tx.send(Arc::new(block));
                                }
                                None => {
                                    info!("[{}] finalized block stream ended", pump.network);
                                    break;
                                }
                            }
                        }
                    }
                }
                debug!("[{}] block pump stopped", pump.network);
            }));
        }
        handles
    }
}

/// Replays decoded blocks from NDJSON files, one file per network.
///
/// File naming: the network URN with `:` replaced by `_`, plus `.ndjson`
/// (e.g. `urn_ocn_local_0.ndjson`). Lets the node run without live chain
/// connectivity, for local runs and integration tests.
pub struct FileReplayIngress {
    dir: PathBuf,
    networks: Vec<NetworkId>,
}

impl FileReplayIngress {
    pub fn new(dir: PathBuf, networks: Vec<NetworkId>) -> Self {
        Self { dir, networks }
    }

    fn file_for(&self, network: &NetworkId) -> PathBuf {
        self.dir
            .join(format!("{}.ndjson", network.as_str().replace(':', "_")))
    }
}

#[async_trait]
impl IngressConsumer for FileReplayIngress {
    fn is_network_defined(&self, network: &NetworkId) -> bool {
        self.networks.contains(network)
    }

    fn network_ids(&self) -> Vec<NetworkId> {
        self.networks.clone()
    }

    async fn finalized_blocks(
        &self,
        network: &NetworkId,
    ) -> MonitorResult<mpsc::Receiver<DecodedBlock>> {
        let path = self.file_for(network);
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            MonitorError::NotFound(format!("no replay file {}: {}", path.display(), e))
        })?;
        let (tx, rx) = mpsc::channel(64);
        let network = network.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(file).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<DecodedBlock>(&line) {
                            Ok(block) => {
                                if tx.send(block).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("[{}] skipping undecodable replay line: {}", network, e);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("[{}] replay read failed: {}", network, e);
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn get_storage(
        &self,
        network: &NetworkId,
        key: &str,
        _at: Option<&str>,
    ) -> MonitorResult<Vec<u8>> {
        Err(MonitorError::NotFound(format!(
            "storage {} not available in replay mode for {}",
            key, network
        )))
    }

    async fn get_storage_keys(
        &self,
        network: &NetworkId,
        _prefix: &str,
        _count: u32,
        _start_key: Option<&str>,
    ) -> MonitorResult<Vec<String>> {
        Err(MonitorError::NotFound(format!(
            "storage keys not available in replay mode for {}",
            network
        )))
    }
}
