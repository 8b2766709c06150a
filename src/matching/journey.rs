// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Journey construction and waypoint merging.
//!
//! Facts for the same message arrive in arbitrary order from independent
//! feeds; these rules are written so that any permutation of the same fact
//! set converges on the same journey, and replaying a fact is a no-op.

use crate::correlation::CorrelationKey;
use crate::types::{Journey, JourneyStatus, Outcome, Waypoint, XcmFact};
use serde::{Deserialize, Serialize};

/// Current layout revision of persisted entries. Decoding is additive:
/// unknown fields are ignored, missing fields take defaults.
pub const PENDING_ENTRY_SCHEMA_VERSION: u32 = 1;

/// A partially-built journey waiting for its remaining legs, owned
/// exclusively by the waiting-state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    pub key: CorrelationKey,
    pub journey: Journey,
    /// Absolute deadline, unix milliseconds.
    pub deadline: u64,
    pub legs_remaining: u32,
    #[serde(default)]
    pub schema_version: u32,
}

impl PendingEntry {
    pub fn new(key: CorrelationKey, journey: Journey, deadline: u64) -> Self {
        let legs_remaining = journey.legs_remaining();
        Self {
            key,
            journey,
            deadline,
            legs_remaining,
            schema_version: PENDING_ENTRY_SCHEMA_VERSION,
        }
    }
}

/// What a merge did, so the engine can log and count without re-deriving it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub changed: bool,
    /// The fact's chain had no stop at its declared hop position and one was
    /// appended. Should not occur under correct protocol behavior.
    pub fallback_append: bool,
}

impl Journey {
    /// Builds the journey skeleton for a fresh correlation key.
    ///
    /// The skeleton lays out stops from the declared route and leaves every
    /// waypoint bare; the seeding fact is merged through the same path as any
    /// later fact.
    pub fn seed(key: &CorrelationKey, fact: &XcmFact, now_ms: u64) -> Self {
        let stops = if fact.legs.len() > 1 {
            fact.legs[..fact.legs.len() - 1]
                .iter()
                .map(|leg| Waypoint::bare(leg.to.clone()))
                .collect()
        } else {
            Vec::new()
        };
        let mut origin = Waypoint::bare(fact.context.origin.clone());
        origin.block_number = Some(fact.context.origin_block_number);
        Self {
            id: key.as_str().to_string(),
            sender: fact.sender.clone(),
            created: now_ms,
            updated: now_ms,
            instructions: fact.instructions.clone(),
            origin,
            destination: Waypoint::bare(fact.context.destination.clone()),
            stops,
            status: JourneyStatus::New,
        }
    }

    /// Merges one observed waypoint into the journey.
    ///
    /// Idempotent: replaying a fact leaves the journey unchanged.
    pub fn merge_fact(&mut self, fact: &XcmFact, now_ms: u64) -> MergeReport {
        let mut report = MergeReport::default();
        if self.status == JourneyStatus::New {
            self.status = JourneyStatus::Pending;
        }
        if self.sender.is_none() && fact.sender.is_some() {
            self.sender = fact.sender.clone();
        }
        if self.instructions.is_none() && fact.instructions.is_some() {
            self.instructions = fact.instructions.clone();
        }

        let incoming = &fact.waypoint;
        if incoming.chain_id == self.origin.chain_id {
            // A later, richer origin observation supersedes an earlier bare
            // one.
            if self.origin != *incoming {
                self.origin = incoming.clone();
                report.changed = true;
            }
        } else if incoming.chain_id == self.destination.chain_id {
            report.changed = self.merge_destination(incoming, now_ms);
        } else {
            report = self.merge_stop(incoming, now_ms);
        }

        self.propagate_failures();
        report
    }

    // The destination outcome is set at most once per resolution. An
    // outcome-less observation (e.g. trapped assets) may still enrich an
    // unresolved destination.
    fn merge_destination(&mut self, incoming: &Waypoint, now_ms: u64) -> bool {
        if self.destination.outcome.is_some() {
            return false;
        }
        if incoming.outcome.is_some() {
            self.destination = incoming.clone();
            self.updated = now_ms;
            return true;
        }
        let mut changed = false;
        if self.destination.error.is_none() && incoming.error.is_some() {
            self.destination.error = incoming.error.clone();
            changed = true;
        }
        if self.destination.instructions.is_none() && incoming.instructions.is_some() {
            self.destination.instructions = incoming.instructions.clone();
            changed = true;
        }
        if self.destination.block_number.is_none() && incoming.block_number.is_some() {
            self.destination.block_number = incoming.block_number;
            self.destination.block_hash = incoming.block_hash.clone();
            self.destination.extrinsic_id = incoming.extrinsic_id.clone();
            changed = true;
        }
        if changed {
            self.updated = now_ms;
        }
        changed
    }

    fn merge_stop(&mut self, incoming: &Waypoint, now_ms: u64) -> MergeReport {
        let mut report = MergeReport::default();
        match self
            .stops
            .iter()
            .position(|s| s.chain_id == incoming.chain_id)
        {
            Some(index) => {
                let stop = &mut self.stops[index];
                if stop.outcome.is_some() || incoming.outcome.is_none() {
                    return report;
                }
                *stop = incoming.clone();
                self.updated = now_ms;
                report.changed = true;
            }
            None => {
                self.stops.push(incoming.clone());
                self.updated = now_ms;
                report.changed = true;
                report.fallback_append = true;
            }
        }
        report
    }

    // A hop failure terminates the whole journey: every leg positioned after
    // the failed one is marked failed-and-skipped.
    fn propagate_failures(&mut self) {
        let failed_from = if self.origin.outcome == Some(Outcome::Fail) {
            Some(0)
        } else {
            self.stops
                .iter()
                .position(|s| s.outcome == Some(Outcome::Fail))
                .map(|i| i + 1)
        };
        let Some(start) = failed_from else {
            return;
        };
        for stop in &mut self.stops[start..] {
            if stop.outcome.is_none() {
                stop.outcome = Some(Outcome::Fail);
                stop.skipped = true;
            }
        }
        if self.destination.outcome.is_none() {
            self.destination.outcome = Some(Outcome::Fail);
            self.destination.skipped = true;
        }
    }

    /// Resolves the journey status after a merge.
    ///
    /// The origin leg must be observed before the destination outcome can
    /// resolve the journey: an inbound delivery seen before its outbound
    /// counterpart keeps waiting for the origin. `require_resolved_stops`
    /// controls whether unresolved intermediate stops also hold back the
    /// success transition.
    pub fn resolve(&mut self, require_resolved_stops: bool) {
        if self.status.is_terminal() {
            return;
        }
        if self.origin.outcome.is_none() {
            if self.status == JourneyStatus::New {
                self.status = JourneyStatus::Pending;
            }
            return;
        }
        match self.destination.outcome {
            Some(Outcome::Fail) => self.status = JourneyStatus::Failed,
            Some(Outcome::Success) => {
                if !require_resolved_stops || self.stops.iter().all(Waypoint::is_resolved) {
                    self.status = JourneyStatus::Matched;
                } else {
                    self.status = JourneyStatus::Pending;
                }
            }
            None => {
                if self.status == JourneyStatus::New {
                    self.status = JourneyStatus::Pending;
                }
            }
        }
    }

    /// Marks the journey timed out: the destination and every unresolved
    /// stop get the timeout flag, then the journey is terminal.
    pub fn apply_timeout(&mut self) {
        self.destination.timeout = true;
        for stop in &mut self.stops {
            if stop.outcome.is_none() {
                stop.timeout = true;
            }
        }
        self.status = JourneyStatus::TimedOut;
    }

    /// Legs whose outcome is still unobserved, destination included.
    pub fn legs_remaining(&self) -> u32 {
        let unresolved_stops = self.stops.iter().filter(|s| s.outcome.is_none()).count();
        let destination = usize::from(self.destination.outcome.is_none());
        (unresolved_stops + destination) as u32
    }
}
