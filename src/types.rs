// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Domain model for cross-chain message journeys.
//!
//! A message leaves an origin network, optionally transits intermediate relay
//! hops, and arrives (or fails to arrive) at a destination network. Each
//! observed leg is a [`Waypoint`]; the correlated record of all legs is a
//! [`Journey`]. Facts extracted from finalized blocks drive the journey state
//! machine in `matching::engine`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Network identifier in URN form, e.g. `urn:ocn:polkadot:1000`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(consensus: &str, chain_id: &str) -> Self {
        Self(format!("urn:ocn:{}:{}", consensus, chain_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NetworkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NetworkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Execution outcome of a message at one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Fail,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "Success"),
            Outcome::Fail => write!(f, "Fail"),
        }
    }
}

/// One network-to-network transit segment of a declared route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    pub from: NetworkId,
    pub to: NetworkId,
}

/// Observed state of a message at one leg.
///
/// `skipped` and `timeout` default to false so documents written by older
/// versions keep decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub chain_id: NetworkId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extrinsic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub timeout: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Waypoint {
    /// A bare waypoint for a leg that has not been observed yet.
    pub fn bare(chain_id: NetworkId) -> Self {
        Self {
            chain_id,
            block_number: None,
            block_hash: None,
            outcome: None,
            error: None,
            extrinsic_id: None,
            instructions: None,
            skipped: false,
            timeout: false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Message identity shared by every fact of the same in-flight message.
///
/// Carried on all facts so the correlation key is derivable identically from
/// any leg, sender-side or receiver-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContext {
    pub origin: NetworkId,
    pub origin_block_number: u64,
    pub destination: NetworkId,
    pub message_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Kind of domain fact extracted from a decoded block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    /// Outbound message observed on the origin network.
    Sent,
    /// Message observed transiting an intermediate relay hop.
    Relayed,
    /// Inbound delivery observed on the destination network.
    Received,
    /// Assets trapped during execution at the observing network.
    Trapped,
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactKind::Sent => write!(f, "sent"),
            FactKind::Relayed => write!(f, "relayed"),
            FactKind::Received => write!(f, "received"),
            FactKind::Trapped => write!(f, "trapped"),
        }
    }
}

/// A typed fact about one leg of one message, as observed in a finalized
/// block of the waypoint's network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XcmFact {
    pub kind: FactKind,
    pub context: MessageContext,
    /// Observed state at the network this fact was extracted from.
    pub waypoint: Waypoint,
    /// Declared hop route of the message. Stops are laid out from this, in
    /// declared order, never in arrival order.
    pub legs: Vec<Leg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Value>,
}

impl XcmFact {
    /// Network the fact was observed on.
    pub fn network(&self) -> &NetworkId {
        &self.waypoint.chain_id
    }
}

/// Journey lifecycle. `Matched`, `Failed` and `TimedOut` are terminal;
/// exactly one output record is emitted per terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyStatus {
    New,
    Pending,
    /// Destination resolved with `Outcome::Success`.
    Matched,
    /// Some leg resolved with `Outcome::Fail`.
    Failed,
    /// The in-flight deadline elapsed before the destination resolved.
    TimedOut,
}

impl JourneyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JourneyStatus::Matched | JourneyStatus::Failed | JourneyStatus::TimedOut
        )
    }
}

impl fmt::Display for JourneyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JourneyStatus::New => write!(f, "new"),
            JourneyStatus::Pending => write!(f, "pending"),
            JourneyStatus::Matched => write!(f, "matched"),
            JourneyStatus::Failed => write!(f, "failed"),
            JourneyStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Correlated record of a message's path from origin to destination.
///
/// Invariants: stops are ordered by declared hop position; the destination
/// outcome is set at most once per resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Journey {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Value>,
    /// Creation time, unix milliseconds.
    pub created: u64,
    /// Last mutation time, unix milliseconds.
    pub updated: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Value>,
    pub origin: Waypoint,
    pub destination: Waypoint,
    pub stops: Vec<Waypoint>,
    pub status: JourneyStatus,
}

/// Terminal event emitted by the matching engine, exactly once per journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum XcmTerminal {
    Matched { journey: Journey },
    Timeout { journey: Journey },
}

impl XcmTerminal {
    pub fn journey(&self) -> &Journey {
        match self {
            XcmTerminal::Matched { journey } => journey,
            XcmTerminal::Timeout { journey } => journey,
        }
    }

    /// Event type name for logging and metrics labels.
    pub fn type_name(&self) -> &'static str {
        match self {
            XcmTerminal::Matched { .. } => "matched",
            XcmTerminal::Timeout { .. } => "timeout",
        }
    }
}

/// Record delivered to a subscriber's sinks after the filter layer matched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct XcmNotification {
    #[serde(flatten)]
    pub event: XcmTerminal,
    pub subscription_id: String,
    pub agent_id: String,
}

/// Current unix time in milliseconds.
pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_id_urn_form() {
        let id = NetworkId::new("polkadot", "1000");
        assert_eq!(id.as_str(), "urn:ocn:polkadot:1000");
        assert_eq!(id, NetworkId::from("urn:ocn:polkadot:1000"));
    }

    #[test]
    fn test_waypoint_optional_flags_stay_out_of_documents() {
        let wp = Waypoint::bare(NetworkId::new("local", "0"));
        let value = serde_json::to_value(&wp).unwrap();
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("skipped"));
        assert!(!obj.contains_key("timeout"));
        assert!(!obj.contains_key("outcome"));
    }

    #[test]
    fn test_waypoint_decodes_documents_without_new_fields() {
        // Simulates a document written before skipped/timeout existed.
        let wp: Waypoint =
            serde_json::from_str(r#"{"chainId":"urn:ocn:local:0","blockNumber":42}"#).unwrap();
        assert!(!wp.skipped);
        assert!(!wp.timeout);
        assert_eq!(wp.block_number, Some(42));
    }

    #[test]
    fn test_terminal_event_tagging() {
        let journey = Journey {
            id: "j".to_string(),
            sender: None,
            created: 0,
            updated: 0,
            instructions: None,
            origin: Waypoint::bare(NetworkId::new("local", "0")),
            destination: Waypoint::bare(NetworkId::new("local", "1000")),
            stops: vec![],
            status: JourneyStatus::Matched,
        };
        let event = XcmTerminal::Matched { journey };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "matched");
        assert!(value["journey"].is_object());
    }

    #[test]
    fn test_notification_flattens_event() {
        let journey = Journey {
            id: "j".to_string(),
            sender: None,
            created: 0,
            updated: 0,
            instructions: None,
            origin: Waypoint::bare(NetworkId::new("local", "0")),
            destination: Waypoint::bare(NetworkId::new("local", "1000")),
            stops: vec![],
            status: JourneyStatus::TimedOut,
        };
        let notification = XcmNotification {
            event: XcmTerminal::Timeout { journey },
            subscription_id: "sub-1".to_string(),
            agent_id: "xcm".to_string(),
        };
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["type"], "timeout");
        assert_eq!(value["subscription_id"], "sub-1");
    }
}
