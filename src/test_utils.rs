// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared helpers for unit tests.

use crate::types::{FactKind, Leg, MessageContext, NetworkId, Outcome, Waypoint, XcmFact};
use serde_json::Value;

/// Fixed "current time" for deterministic journeys.
pub const NOW: u64 = 1_700_000_000_000;

/// A well-known 32-byte public key in its checksummed text form.
pub const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";

/// Builds the leg sequence of a declared route through the given chains.
pub fn route(chains: &[&str]) -> Vec<Leg> {
    chains
        .windows(2)
        .map(|pair| Leg {
            from: NetworkId::from(pair[0]),
            to: NetworkId::from(pair[1]),
        })
        .collect()
}

/// Builds a fact observed on `chain` for the message traveling `legs`.
///
/// Every fact carries the full message context, so facts built from the same
/// route always correlate to the same key.
pub fn fact(kind: FactKind, chain: &str, outcome: Option<Outcome>, legs: Vec<Leg>) -> XcmFact {
    let origin = legs.first().expect("route needs at least one leg").from.clone();
    let destination = legs.last().expect("route needs at least one leg").to.clone();
    XcmFact {
        kind,
        waypoint: Waypoint {
            chain_id: NetworkId::from(chain),
            block_number: Some(100),
            block_hash: Some("0xblock".to_string()),
            outcome,
            error: None,
            extrinsic_id: Some("100-1".to_string()),
            instructions: None,
            skipped: false,
            timeout: false,
        },
        context: MessageContext {
            origin,
            origin_block_number: 90,
            destination,
            message_hash: "0xcafe".to_string(),
            message_id: None,
        },
        legs,
        sender: matches!(kind, FactKind::Sent).then(|| Value::String(ALICE.to_string())),
        instructions: None,
    }
}
