// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::serde_as;
use std::path::{Path, PathBuf};

// Config trait shared by loadable configuration documents.
// Supports both YAML and JSON formats.
pub trait Config: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = if path.extension().and_then(|s| s.to_str()) == Some("yaml")
            || path.extension().and_then(|s| s.to_str()) == Some("yml")
        {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// One monitored network.
#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfig {
    // Network URN, e.g. urn:ocn:polkadot:0
    pub id: String,
    // Human-readable name used in logs.
    pub name: String,
    // The relay network this one is attached to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<String>,
}

/// Matching engine tuning.
#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MatchingConfig {
    // Maximum in-flight window before a journey times out, milliseconds.
    #[serde(default = "default_max_inflight_window_ms")]
    pub max_inflight_window_ms: u64,
    // Expiry sweep cadence, milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    // Worker shards; all facts for one correlation key land on one shard.
    #[serde(default = "default_shards")]
    pub shards: usize,
    // Whether unresolved intermediate stops hold back the success
    // transition.
    #[serde(default)]
    pub require_resolved_stops: bool,
}

fn default_max_inflight_window_ms() -> u64 {
    // 2 hours: slow destinations lag far behind their origins.
    2 * 60 * 60 * 1000
}

fn default_sweep_interval_ms() -> u64 {
    30_000
}

fn default_shards() -> usize {
    8
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_inflight_window_ms: default_max_inflight_window_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            shards: default_shards(),
            require_resolved_stops: false,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MonitorNodeConfig {
    // Path of the embedded database directory.
    pub db_path: PathBuf,
    // Monitored networks.
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub matching: MatchingConfig,
}

impl Config for MonitorNodeConfig {}

impl MonitorNodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.networks.is_empty() {
            anyhow::bail!("at least one network must be configured");
        }
        if self.matching.max_inflight_window_ms == 0 {
            anyhow::bail!("max-inflight-window-ms must be positive");
        }
        for network in &self.networks {
            if !network.id.starts_with("urn:ocn:") {
                anyhow::bail!("network id {} is not a urn:ocn URN", network.id);
            }
        }
        Ok(())
    }
}
