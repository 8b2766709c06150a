// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Notification fan-out.
//!
//! The hub consumes the engine's terminal-event channel, gates every event
//! through each subscription's compiled filter, and hands matches to the
//! subscription's channel sinks. Delivery is at-least-once to connected
//! sinks and fire-and-forget: a sink failure is counted and logged, never
//! fed back into engine state.

use crate::error::{MonitorError, MonitorResult};
use crate::metrics::MonitorMetrics;
use crate::subscriptions::{SubsStore, Subscription};
use crate::types::{XcmNotification, XcmTerminal};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A delivery sink for one channel type.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;

    async fn notify(&self, sub: &Subscription, msg: &XcmNotification) -> MonitorResult<()>;
}

/// Writes notifications to the log. The default sink, and the only delivery
/// transport that lives in-tree.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn channel(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, sub: &Subscription, msg: &XcmNotification) -> MonitorResult<()> {
        let journey = msg.event.journey();
        info!(
            "[{} ➜ {}] NOTIFICATION subscription={}, type={}, journey={}, outcome={:?} (o: #{:?}, d: #{:?})",
            journey.origin.chain_id,
            journey.destination.chain_id,
            sub.id,
            msg.event.type_name(),
            journey.id,
            journey.destination.outcome,
            journey.origin.block_number,
            journey.destination.block_number,
        );
        Ok(())
    }
}

/// Filter-gated fan-out from the engine's terminal channel to sinks.
pub struct NotifierHub {
    subs: Arc<SubsStore>,
    agent_id: String,
    sinks: HashMap<&'static str, Arc<dyn Notifier>>,
    metrics: Option<Arc<MonitorMetrics>>,
}

impl NotifierHub {
    pub fn new(subs: Arc<SubsStore>, agent_id: impl Into<String>) -> Self {
        let mut sinks: HashMap<&'static str, Arc<dyn Notifier>> = HashMap::new();
        let log: Arc<dyn Notifier> = Arc::new(LogNotifier);
        sinks.insert(log.channel(), log);
        Self {
            subs,
            agent_id: agent_id.into(),
            sinks,
            metrics: None,
        }
    }

    /// Attach metrics for monitoring
    pub fn with_metrics(mut self, metrics: Arc<MonitorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Registers an additional delivery sink.
    pub fn with_sink(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.insert(sink.channel(), sink);
        self
    }

    /// Consumes terminal events until the channel closes or the token fires.
    pub fn start(
        self,
        mut terminals: mpsc::Receiver<XcmTerminal>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    terminal = terminals.recv() => {
                        match terminal {
                            Some(terminal) => self.dispatch(terminal).await,
                            None => break,
                        }
                    }
                }
            }
            debug!("notifier hub stopped");
        })
    }

    /// Fans one terminal event out to every matching subscription.
    pub async fn dispatch(&self, terminal: XcmTerminal) {
        let subscriptions = match self.subs.get_by_agent_id(&self.agent_id) {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!("subscription lookup failed, event dropped: {}", e);
                return;
            }
        };
        for sub in &subscriptions {
            match self.matches(sub, &terminal) {
                Ok(true) => {
                    let notification = XcmNotification {
                        event: terminal.clone(),
                        subscription_id: sub.id.clone(),
                        agent_id: self.agent_id.clone(),
                    };
                    self.deliver(sub, &notification).await;
                }
                Ok(false) => {}
                Err(e) => {
                    // A filter that stopped compiling is a subscription
                    // defect, not an engine one.
                    warn!("subscription {} filter rejected: {}", sub.id, e);
                    if let Some(m) = &self.metrics {
                        m.subscription_filter_rejected.inc();
                    }
                }
            }
        }
    }

    fn matches(&self, sub: &Subscription, terminal: &XcmTerminal) -> MonitorResult<bool> {
        let query = sub.compile_filter()?;
        let event = serde_json::to_value(terminal)
            .map_err(|e| MonitorError::Delivery(format!("event not serializable: {}", e)))?;
        Ok(query.matches(&event))
    }

    async fn deliver(&self, sub: &Subscription, notification: &XcmNotification) {
        for channel in &sub.channels {
            let Some(sink) = self.sinks.get(channel.channel_type.as_str()) else {
                warn!(
                    "subscription {} references unknown channel {}",
                    sub.id, channel.channel_type
                );
                continue;
            };
            match sink.notify(sub, notification).await {
                Ok(()) => {
                    if let Some(m) = &self.metrics {
                        m.notifications_sent
                            .with_label_values(&[sink.channel()])
                            .inc();
                    }
                }
                Err(e) => {
                    warn!(
                        "delivery failed on channel {}, dropped: subscription={}, error={}",
                        sink.channel(),
                        sub.id,
                        e
                    );
                    if let Some(m) = &self.metrics {
                        m.notifications_failed
                            .with_label_values(&[sink.channel()])
                            .inc();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::store::open_database;
    use crate::subscriptions::{ChannelConfig, SubscriptionArgs};
    use crate::types::{Journey, JourneyStatus, NetworkId, Outcome, Waypoint};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct CountingSink {
        delivered: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for CountingSink {
        fn channel(&self) -> &'static str {
            "counting"
        }

        async fn notify(&self, _sub: &Subscription, _msg: &XcmNotification) -> MonitorResult<()> {
            if self.fail {
                return Err(MonitorError::Delivery("sink down".to_string()));
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn subscription(id: &str, destination: &str) -> Subscription {
        Subscription {
            id: id.to_string(),
            agent: "xcm".to_string(),
            owner: "unknown".to_string(),
            args: SubscriptionArgs {
                origin: Some(NetworkId::from("urn:ocn:local:0")),
                destinations: vec![NetworkId::from(destination)],
                senders: vec![],
                filter: None,
            },
            channels: vec![ChannelConfig {
                channel_type: "counting".to_string(),
            }],
        }
    }

    fn terminal(destination: &str) -> XcmTerminal {
        let mut dest = Waypoint::bare(NetworkId::from(destination));
        dest.outcome = Some(Outcome::Success);
        XcmTerminal::Matched {
            journey: Journey {
                id: "j".to_string(),
                sender: None,
                created: 0,
                updated: 0,
                instructions: None,
                origin: Waypoint::bare(NetworkId::from("urn:ocn:local:0")),
                destination: dest,
                stops: vec![],
                status: JourneyStatus::Matched,
            },
        }
    }

    fn hub_with_sink(dir: &TempDir, fail: bool) -> (NotifierHub, Arc<SubsStore>, Arc<AtomicU32>) {
        let subs = Arc::new(SubsStore::new(open_database(dir.path()).unwrap()));
        let delivered = Arc::new(AtomicU32::new(0));
        let hub = NotifierHub::new(subs.clone(), "xcm").with_sink(Arc::new(CountingSink {
            delivered: delivered.clone(),
            fail,
        }));
        (hub, subs, delivered)
    }

    #[tokio::test]
    async fn test_dispatch_delivers_to_matching_subscriptions_only() {
        let dir = TempDir::new().unwrap();
        let (hub, subs, delivered) = hub_with_sink(&dir, false);
        subs.insert(&subscription("wants-1000", "urn:ocn:local:1000"))
            .unwrap();
        subs.insert(&subscription("wants-2000", "urn:ocn:local:2000"))
            .unwrap();

        hub.dispatch(terminal("urn:ocn:local:1000")).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 1);

        hub.dispatch(terminal("urn:ocn:local:3000")).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sink_failure_is_dropped_not_propagated() {
        let dir = TempDir::new().unwrap();
        let (hub, subs, delivered) = hub_with_sink(&dir, true);
        subs.insert(&subscription("wants-1000", "urn:ocn:local:1000"))
            .unwrap();

        // Must not error or panic; the failure is swallowed.
        hub.dispatch(terminal("urn:ocn:local:1000")).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hub_consumes_terminal_channel() {
        let dir = TempDir::new().unwrap();
        let (hub, subs, delivered) = hub_with_sink(&dir, false);
        subs.insert(&subscription("wants-1000", "urn:ocn:local:1000"))
            .unwrap();

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = hub.start(rx, cancel.clone());
        tx.send(terminal("urn:ocn:local:1000")).await.unwrap();
        drop(tx);
        handle.await.unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
