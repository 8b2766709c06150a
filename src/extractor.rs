// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Event extraction.
//!
//! Turns one decoded, finalized block into a lazy sequence of typed facts.
//! The ingestion collaborator normalizes runtime events into loosely-typed
//! `(module, name, data)` records; this module recognizes the message-passing
//! subset and deserializes their payloads. Anything that does not decode into
//! the expected shape is skipped with a debug log; a partially-decoded block
//! never fails as a whole.

use crate::types::{
    FactKind, Leg, MessageContext, NetworkId, Outcome, Waypoint, XcmFact,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// A decoded, finalized block as provided by the ingestion collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedBlock {
    pub network: NetworkId,
    pub block_number: u64,
    pub block_hash: String,
    pub extrinsics: Vec<DecodedExtrinsic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedExtrinsic {
    pub extrinsic_id: String,
    pub module: String,
    pub call: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default)]
    pub events: Vec<BlockEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockEvent {
    pub module: String,
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentPayload {
    message_hash: String,
    #[serde(default)]
    message_id: Option<String>,
    destination: NetworkId,
    #[serde(default)]
    legs: Vec<Leg>,
    #[serde(default)]
    sender: Option<Value>,
    #[serde(default)]
    instructions: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayedPayload {
    message_hash: String,
    #[serde(default)]
    message_id: Option<String>,
    origin: NetworkId,
    origin_block_number: u64,
    destination: NetworkId,
    #[serde(default)]
    legs: Vec<Leg>,
    #[serde(default)]
    outcome: Option<Outcome>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedPayload {
    message_hash: String,
    #[serde(default)]
    message_id: Option<String>,
    origin: NetworkId,
    origin_block_number: u64,
    #[serde(default)]
    legs: Vec<Leg>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrappedPayload {
    message_hash: String,
    #[serde(default)]
    message_id: Option<String>,
    origin: NetworkId,
    origin_block_number: u64,
    destination: NetworkId,
    #[serde(default)]
    legs: Vec<Leg>,
    #[serde(default)]
    assets: Option<Value>,
}

/// Extracts the message-passing facts of one decoded block.
///
/// Pure and lazy: nothing is parsed until the iterator is advanced, and the
/// sequence is bounded by the block's event count.
pub fn extract_facts(block: &DecodedBlock) -> impl Iterator<Item = XcmFact> + '_ {
    block.extrinsics.iter().flat_map(move |extrinsic| {
        extrinsic
            .events
            .iter()
            .filter_map(move |event| fact_from_event(block, extrinsic, event))
    })
}

fn fact_from_event(
    block: &DecodedBlock,
    extrinsic: &DecodedExtrinsic,
    event: &BlockEvent,
) -> Option<XcmFact> {
    match (event.module.as_str(), event.name.as_str()) {
        ("xcmpQueue", "XcmpMessageSent") | ("polkadotXcm", "Sent") | ("xcmPallet", "Sent") => {
            sent_fact(block, extrinsic, event)
        }
        ("messageQueue", "MessageRelayed") | ("paraInherent", "MessageRelayed") => {
            relayed_fact(block, extrinsic, event)
        }
        ("xcmpQueue", "Success") => received_fact(block, extrinsic, event, Some(Outcome::Success)),
        ("xcmpQueue", "Fail") => received_fact(block, extrinsic, event, Some(Outcome::Fail)),
        ("messageQueue", "Processed") => received_fact(block, extrinsic, event, None),
        ("messageQueue", "ProcessingFailed") => {
            received_fact(block, extrinsic, event, Some(Outcome::Fail))
        }
        ("polkadotXcm", "AssetsTrapped") | ("xcmPallet", "AssetsTrapped") => {
            trapped_fact(block, extrinsic, event)
        }
        _ => None,
    }
}

fn sent_fact(
    block: &DecodedBlock,
    extrinsic: &DecodedExtrinsic,
    event: &BlockEvent,
) -> Option<XcmFact> {
    let payload: SentPayload = decode_payload(block, event)?;
    let context = MessageContext {
        origin: block.network.clone(),
        origin_block_number: block.block_number,
        destination: payload.destination.clone(),
        message_hash: payload.message_hash,
        message_id: payload.message_id,
    };
    let legs = declared_legs(payload.legs, &context);
    let outcome = if extrinsic.success {
        Outcome::Success
    } else {
        Outcome::Fail
    };
    Some(XcmFact {
        kind: FactKind::Sent,
        waypoint: Waypoint {
            chain_id: block.network.clone(),
            block_number: Some(block.block_number),
            block_hash: Some(block.block_hash.clone()),
            outcome: Some(outcome),
            error: extrinsic.error.clone(),
            extrinsic_id: Some(extrinsic.extrinsic_id.clone()),
            instructions: payload.instructions.clone(),
            skipped: false,
            timeout: false,
        },
        context,
        legs,
        sender: payload.sender,
        instructions: payload.instructions,
    })
}

fn relayed_fact(
    block: &DecodedBlock,
    extrinsic: &DecodedExtrinsic,
    event: &BlockEvent,
) -> Option<XcmFact> {
    let payload: RelayedPayload = decode_payload(block, event)?;
    let context = MessageContext {
        origin: payload.origin.clone(),
        origin_block_number: payload.origin_block_number,
        destination: payload.destination.clone(),
        message_hash: payload.message_hash,
        message_id: payload.message_id,
    };
    let legs = if payload.legs.is_empty() {
        vec![
            Leg {
                from: context.origin.clone(),
                to: block.network.clone(),
            },
            Leg {
                from: block.network.clone(),
                to: context.destination.clone(),
            },
        ]
    } else {
        payload.legs
    };
    let outcome = payload.outcome.unwrap_or(if extrinsic.success {
        Outcome::Success
    } else {
        Outcome::Fail
    });
    Some(XcmFact {
        kind: FactKind::Relayed,
        waypoint: Waypoint {
            chain_id: block.network.clone(),
            block_number: Some(block.block_number),
            block_hash: Some(block.block_hash.clone()),
            outcome: Some(outcome),
            error: payload.error,
            extrinsic_id: Some(extrinsic.extrinsic_id.clone()),
            instructions: None,
            skipped: false,
            timeout: false,
        },
        context,
        legs,
        sender: None,
        instructions: None,
    })
}

fn received_fact(
    block: &DecodedBlock,
    extrinsic: &DecodedExtrinsic,
    event: &BlockEvent,
    outcome: Option<Outcome>,
) -> Option<XcmFact> {
    let payload: ReceivedPayload = decode_payload(block, event)?;
    let context = MessageContext {
        origin: payload.origin.clone(),
        origin_block_number: payload.origin_block_number,
        destination: block.network.clone(),
        message_hash: payload.message_hash,
        message_id: payload.message_id,
    };
    let legs = declared_legs(payload.legs, &context);
    // Event name decides the outcome where it is unambiguous; the
    // messageQueue.Processed payload carries an explicit success flag.
    let outcome = outcome.unwrap_or(match payload.success {
        Some(false) => Outcome::Fail,
        _ => Outcome::Success,
    });
    Some(XcmFact {
        kind: FactKind::Received,
        waypoint: Waypoint {
            chain_id: block.network.clone(),
            block_number: Some(block.block_number),
            block_hash: Some(block.block_hash.clone()),
            outcome: Some(outcome),
            error: payload.error,
            extrinsic_id: Some(extrinsic.extrinsic_id.clone()),
            instructions: None,
            skipped: false,
            timeout: false,
        },
        context,
        legs,
        sender: None,
        instructions: None,
    })
}

fn trapped_fact(
    block: &DecodedBlock,
    extrinsic: &DecodedExtrinsic,
    event: &BlockEvent,
) -> Option<XcmFact> {
    let payload: TrappedPayload = decode_payload(block, event)?;
    let context = MessageContext {
        origin: payload.origin.clone(),
        origin_block_number: payload.origin_block_number,
        destination: payload.destination.clone(),
        message_hash: payload.message_hash,
        message_id: payload.message_id,
    };
    let legs = declared_legs(payload.legs, &context);
    Some(XcmFact {
        kind: FactKind::Trapped,
        waypoint: Waypoint {
            chain_id: block.network.clone(),
            block_number: Some(block.block_number),
            block_hash: Some(block.block_hash.clone()),
            // Trapping does not resolve the leg. The trap payload rides on
            // the waypoint error so the journey record keeps it.
            outcome: None,
            error: payload.assets,
            extrinsic_id: Some(extrinsic.extrinsic_id.clone()),
            instructions: None,
            skipped: false,
            timeout: false,
        },
        context,
        legs,
        sender: None,
        instructions: None,
    })
}

fn declared_legs(legs: Vec<Leg>, context: &MessageContext) -> Vec<Leg> {
    if legs.is_empty() {
        vec![Leg {
            from: context.origin.clone(),
            to: context.destination.clone(),
        }]
    } else {
        legs
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    block: &DecodedBlock,
    event: &BlockEvent,
) -> Option<T> {
    match serde_json::from_value(event.data.clone()) {
        Ok(payload) => Some(payload),
        Err(e) => {
            debug!(
                "[{}] skipping undecodable {}.{} event at block {}: {}",
                block.network, event.module, event.name, block.block_number, e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block_with_events(network: &str, events: Vec<BlockEvent>) -> DecodedBlock {
        DecodedBlock {
            network: NetworkId::from(network),
            block_number: 100,
            block_hash: "0xblock".to_string(),
            extrinsics: vec![DecodedExtrinsic {
                extrinsic_id: "100-1".to_string(),
                module: "polkadotXcm".to_string(),
                call: "send".to_string(),
                success: true,
                error: None,
                events,
            }],
        }
    }

    fn sent_event() -> BlockEvent {
        BlockEvent {
            module: "xcmpQueue".to_string(),
            name: "XcmpMessageSent".to_string(),
            data: json!({
                "messageHash": "0xcafe",
                "messageId": "0xid01",
                "destination": "urn:ocn:local:2000",
                "sender": "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY",
            }),
        }
    }

    #[test]
    fn test_extracts_sent_fact_with_origin_context() {
        let block = block_with_events("urn:ocn:local:1000", vec![sent_event()]);
        let facts: Vec<XcmFact> = extract_facts(&block).collect();
        assert_eq!(facts.len(), 1);
        let fact = &facts[0];
        assert_eq!(fact.kind, FactKind::Sent);
        assert_eq!(fact.context.origin.as_str(), "urn:ocn:local:1000");
        assert_eq!(fact.context.origin_block_number, 100);
        assert_eq!(fact.context.destination.as_str(), "urn:ocn:local:2000");
        assert_eq!(fact.waypoint.outcome, Some(Outcome::Success));
        assert_eq!(fact.waypoint.extrinsic_id.as_deref(), Some("100-1"));
        // No declared multi-hop route: a single direct leg is assumed.
        assert_eq!(fact.legs.len(), 1);
    }

    #[test]
    fn test_extracts_received_outcome_from_event_name() {
        let block = block_with_events(
            "urn:ocn:local:2000",
            vec![BlockEvent {
                module: "xcmpQueue".to_string(),
                name: "Fail".to_string(),
                data: json!({
                    "messageHash": "0xcafe",
                    "origin": "urn:ocn:local:1000",
                    "originBlockNumber": 90,
                    "error": {"module": "Barrier"},
                }),
            }],
        );
        let facts: Vec<XcmFact> = extract_facts(&block).collect();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].kind, FactKind::Received);
        assert_eq!(facts[0].waypoint.outcome, Some(Outcome::Fail));
        assert_eq!(facts[0].context.origin_block_number, 90);
    }

    #[test]
    fn test_processed_payload_success_flag() {
        let block = block_with_events(
            "urn:ocn:local:2000",
            vec![BlockEvent {
                module: "messageQueue".to_string(),
                name: "Processed".to_string(),
                data: json!({
                    "messageHash": "0xcafe",
                    "origin": "urn:ocn:local:1000",
                    "originBlockNumber": 90,
                    "success": false,
                }),
            }],
        );
        let facts: Vec<XcmFact> = extract_facts(&block).collect();
        assert_eq!(facts[0].waypoint.outcome, Some(Outcome::Fail));
    }

    #[test]
    fn test_undecodable_event_is_skipped_not_fatal() {
        let block = block_with_events(
            "urn:ocn:local:1000",
            vec![
                BlockEvent {
                    module: "xcmpQueue".to_string(),
                    name: "XcmpMessageSent".to_string(),
                    // Missing required fields.
                    data: json!({"weird": true}),
                },
                sent_event(),
            ],
        );
        let facts: Vec<XcmFact> = extract_facts(&block).collect();
        assert_eq!(facts.len(), 1);
    }

    #[test]
    fn test_unrelated_events_ignored() {
        let block = block_with_events(
            "urn:ocn:local:1000",
            vec![BlockEvent {
                module: "balances".to_string(),
                name: "Transfer".to_string(),
                data: json!({"amount": 1}),
            }],
        );
        assert_eq!(extract_facts(&block).count(), 0);
    }

    #[test]
    fn test_relayed_fact_synthesizes_two_leg_route() {
        let block = block_with_events(
            "urn:ocn:local:0",
            vec![BlockEvent {
                module: "messageQueue".to_string(),
                name: "MessageRelayed".to_string(),
                data: json!({
                    "messageHash": "0xcafe",
                    "origin": "urn:ocn:local:1000",
                    "originBlockNumber": 90,
                    "destination": "urn:ocn:local:2000",
                }),
            }],
        );
        let facts: Vec<XcmFact> = extract_facts(&block).collect();
        assert_eq!(facts[0].kind, FactKind::Relayed);
        assert_eq!(facts[0].legs.len(), 2);
        assert_eq!(facts[0].legs[0].to.as_str(), "urn:ocn:local:0");
        assert_eq!(facts[0].legs[1].from.as_str(), "urn:ocn:local:0");
    }

    #[test]
    fn test_trapped_fact_carries_assets_in_error() {
        let block = block_with_events(
            "urn:ocn:local:2000",
            vec![BlockEvent {
                module: "polkadotXcm".to_string(),
                name: "AssetsTrapped".to_string(),
                data: json!({
                    "messageHash": "0xcafe",
                    "origin": "urn:ocn:local:1000",
                    "originBlockNumber": 90,
                    "destination": "urn:ocn:local:2000",
                    "assets": [{"id": "DOT", "amount": "10000000000"}],
                }),
            }],
        );
        let facts: Vec<XcmFact> = extract_facts(&block).collect();
        assert_eq!(facts[0].kind, FactKind::Trapped);
        assert!(facts[0].waypoint.outcome.is_none());
        assert!(facts[0].waypoint.error.is_some());
    }
}
