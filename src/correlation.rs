// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Correlation key derivation.
//!
//! The key locates the in-flight journey for an incoming fact. When the
//! protocol assigned a message id, that id is the key. Older protocol
//! versions only expose a content hash, which is not unique across blocks:
//! the same program sent twice from different blocks hashes identically. The
//! fallback therefore hashes the origin block into the key alongside the
//! route endpoints.

use crate::types::MessageContext;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine-internal identifier locating the in-flight journey for a fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CorrelationKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Derives the correlation key for a fact's message context.
///
/// Identical for every leg of the same message, whichever side observed it
/// first.
pub fn correlation_key(context: &MessageContext) -> CorrelationKey {
    match &context.message_id {
        Some(id) => CorrelationKey(id.clone()),
        None => {
            let preimage = format!(
                "{}:{}|{}|{}",
                context.origin,
                context.origin_block_number,
                context.destination,
                context.message_hash
            );
            CorrelationKey(blake3::hash(preimage.as_bytes()).to_hex().to_string())
        }
    }
}
