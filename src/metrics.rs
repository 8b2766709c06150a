// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, IntCounter, IntCounterVec, IntGauge, Registry,
};

#[derive(Clone, Debug)]
pub struct MonitorMetrics {
    pub(crate) facts_received: IntCounterVec,
    pub(crate) journeys_created: IntCounter,
    pub(crate) journeys_resolved: IntCounterVec,
    pub(crate) replayed_facts_ignored: IntCounter,
    pub(crate) stop_fallback_appends: IntCounter,
    pub(crate) pending_entries: IntGauge,
    pub(crate) notifications_sent: IntCounterVec,
    pub(crate) notifications_failed: IntCounterVec,
    pub(crate) subscription_filter_rejected: IntCounter,
}

impl MonitorMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            facts_received: register_int_counter_vec_with_registry!(
                "xcmon_facts_received",
                "Total number of facts extracted from finalized blocks",
                &["network", "kind"],
                registry,
            )
            .unwrap(),
            journeys_created: register_int_counter_with_registry!(
                "xcmon_journeys_created",
                "Total number of journeys opened on a first observed waypoint",
                registry,
            )
            .unwrap(),
            journeys_resolved: register_int_counter_vec_with_registry!(
                "xcmon_journeys_resolved",
                "Total number of journeys that reached a terminal state",
                &["status"],
                registry,
            )
            .unwrap(),
            replayed_facts_ignored: register_int_counter_with_registry!(
                "xcmon_replayed_facts_ignored",
                "Total number of facts ignored because their journey already resolved",
                registry,
            )
            .unwrap(),
            stop_fallback_appends: register_int_counter_with_registry!(
                "xcmon_stop_fallback_appends",
                "Total number of waypoints appended because no stop existed at the declared hop position",
                registry,
            )
            .unwrap(),
            pending_entries: register_int_gauge_with_registry!(
                "xcmon_pending_entries",
                "Current number of in-flight journeys in the waiting-state store",
                registry,
            )
            .unwrap(),
            notifications_sent: register_int_counter_vec_with_registry!(
                "xcmon_notifications_sent",
                "Total number of notifications delivered to sinks",
                &["channel"],
                registry,
            )
            .unwrap(),
            notifications_failed: register_int_counter_vec_with_registry!(
                "xcmon_notifications_failed",
                "Total number of notifications dropped after a sink failure",
                &["channel"],
                registry,
            )
            .unwrap(),
            subscription_filter_rejected: register_int_counter_with_registry!(
                "xcmon_subscription_filter_rejected",
                "Total number of subscription filters rejected as malformed",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }
}
