// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Matching engine.
//!
//! [`Matcher`] holds the per-key decision logic: merge a fact into the
//! waiting entry, resolve the state machine, and on a terminal transition
//! archive the journey, drop the pending entry and emit exactly one terminal
//! event. [`MatchingEngine`] runs a pool of shard workers and routes every
//! command for one correlation key to the same shard, which linearizes facts
//! and expiry decisions per key while distinct keys proceed in parallel.

use crate::config::MatchingConfig;
use crate::correlation::{correlation_key, CorrelationKey};
use crate::error::MonitorResult;
use crate::matching::journey::PendingEntry;
use crate::matching::store::WaitingStore;
use crate::metrics::MonitorMetrics;
use crate::retry_with_max_elapsed_time;
use crate::types::{unix_now_ms, Journey, JourneyStatus, XcmFact, XcmTerminal};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// Upper bound on store-write retries before the failure is surfaced.
const STORE_WRITE_MAX_ELAPSED: Duration = Duration::from_secs(30);

/// Per-key matching logic. Cheap to clone; every clone shares the store and
/// the terminal outbox.
#[derive(Clone)]
pub struct Matcher {
    store: Arc<dyn WaitingStore>,
    config: MatchingConfig,
    outbox: mpsc::Sender<XcmTerminal>,
    metrics: Option<Arc<MonitorMetrics>>,
}

impl Matcher {
    pub fn new(
        store: Arc<dyn WaitingStore>,
        config: MatchingConfig,
        outbox: mpsc::Sender<XcmTerminal>,
    ) -> Self {
        Self {
            store,
            config,
            outbox,
            metrics: None,
        }
    }

    /// Attach metrics for monitoring
    pub fn with_metrics(mut self, metrics: Arc<MonitorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Processes one fact. Must be called under single-writer-per-key
    /// discipline; the shard workers guarantee that in production.
    pub async fn on_fact(&self, fact: XcmFact, now_ms: u64) -> MonitorResult<()> {
        let key = correlation_key(&fact.context);

        // Replays after a terminal resolution are no-ops, which keeps
        // crash-restart fact replay idempotent.
        if self.store.get_archived(&key).await?.is_some() {
            warn!(
                "fact for already-resolved journey ignored: key={}, kind={}, chain={}",
                key, fact.kind, fact.waypoint.chain_id
            );
            if let Some(m) = &self.metrics {
                m.replayed_facts_ignored.inc();
            }
            return Ok(());
        }

        let mut entry = match self.store.get(&key).await? {
            Some(entry) => entry,
            None => {
                debug!(
                    "journey opened: key={}, origin={}, destination={}",
                    key, fact.context.origin, fact.context.destination
                );
                if let Some(m) = &self.metrics {
                    m.journeys_created.inc();
                }
                let journey = Journey::seed(&key, &fact, now_ms);
                PendingEntry::new(
                    key.clone(),
                    journey,
                    now_ms + self.config.max_inflight_window_ms,
                )
            }
        };

        let report = entry.journey.merge_fact(&fact, now_ms);
        if report.fallback_append {
            warn!(
                "no stop at declared hop position, appended: key={}, chain={}",
                key, fact.waypoint.chain_id
            );
            if let Some(m) = &self.metrics {
                m.stop_fallback_appends.inc();
            }
        }
        entry.journey.resolve(self.config.require_resolved_stops);
        entry.legs_remaining = entry.journey.legs_remaining();

        if entry.journey.status.is_terminal() {
            self.finalize(entry).await
        } else {
            self.persist(&entry).await
        }
    }

    /// Resolves one expired key to timeout. Routed through the same shard as
    /// facts for that key, so the decision cannot interleave with a late
    /// fact.
    pub async fn expire_key(&self, key: &CorrelationKey, now_ms: u64) -> MonitorResult<()> {
        let Some(mut entry) = self.store.get(key).await? else {
            // Resolved between the janitor scan and this command.
            return Ok(());
        };
        if entry.deadline > now_ms {
            return Ok(());
        }
        entry.journey.apply_timeout();
        entry.legs_remaining = entry.journey.legs_remaining();
        self.finalize(entry).await
    }

    /// Scans for expired entries and resolves each to timeout. Used by tests
    /// and single-threaded callers; the production janitor routes expiries
    /// through the shard workers instead.
    pub async fn sweep(&self, now_ms: u64) -> MonitorResult<usize> {
        let expired = self.store.scan_expired(now_ms).await?;
        let count = expired.len();
        for entry in &expired {
            self.expire_key(&entry.key, now_ms).await?;
        }
        Ok(count)
    }

    // Write-then-acknowledge: the entry is only treated as authoritative
    // once the store accepted it.
    async fn persist(&self, entry: &PendingEntry) -> MonitorResult<()> {
        match retry_with_max_elapsed_time!(self.store.upsert(entry), STORE_WRITE_MAX_ELAPSED) {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(
                    "pending entry write failed after retries: key={}, error={}",
                    entry.key, e
                );
                Err(e)
            }
        }
    }

    // Terminal transition: archive the final journey for audit reads, delete
    // the pending entry, emit exactly one output record.
    async fn finalize(&self, entry: PendingEntry) -> MonitorResult<()> {
        let PendingEntry { key, journey, .. } = entry;
        if let Err(e) =
            retry_with_max_elapsed_time!(self.store.archive(&journey), STORE_WRITE_MAX_ELAPSED)
        {
            error!(
                "journey archive failed after retries: key={}, error={}",
                key, e
            );
            return Err(e);
        }
        if let Err(e) =
            retry_with_max_elapsed_time!(self.store.delete(&key), STORE_WRITE_MAX_ELAPSED)
        {
            error!(
                "pending entry delete failed after retries: key={}, error={}",
                key, e
            );
            return Err(e);
        }

        let status_label = match journey.status {
            JourneyStatus::Matched => "matched",
            JourneyStatus::Failed => "failed",
            JourneyStatus::TimedOut => "timed_out",
            JourneyStatus::New | JourneyStatus::Pending => "pending",
        };
        if let Some(m) = &self.metrics {
            m.journeys_resolved.with_label_values(&[status_label]).inc();
        }
        info!(
            "[{} ➜ {}] journey resolved: key={}, status={}, stops={}",
            journey.origin.chain_id,
            journey.destination.chain_id,
            key,
            journey.status,
            journey.stops.len()
        );

        let terminal = match journey.status {
            JourneyStatus::TimedOut => XcmTerminal::Timeout { journey },
            _ => XcmTerminal::Matched { journey },
        };
        // Fire-and-forget: a missing consumer is a telemetry concern, never
        // rolled back into engine state.
        if let Err(e) = self.outbox.send(terminal).await {
            warn!("terminal event dropped, no consumer: {}", e);
        }
        Ok(())
    }
}

enum ShardCommand {
    Fact(Box<XcmFact>),
    Expire(CorrelationKey),
}

/// Sharded front of the matcher: routes every command for one correlation
/// key to the same worker.
#[derive(Clone)]
pub struct MatchingEngine {
    shards: Arc<Vec<mpsc::Sender<ShardCommand>>>,
}

impl MatchingEngine {
    /// Spawns `shard_count` workers and returns the engine handle plus the
    /// worker join handles.
    pub fn start(
        matcher: Matcher,
        shard_count: usize,
        cancel: CancellationToken,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        let mut handles = Vec::with_capacity(shard_count);
        for shard_id in 0..shard_count {
            let (tx, rx) = mpsc::channel(1024);
            shards.push(tx);
            handles.push(tokio::spawn(run_shard(
                shard_id,
                matcher.clone(),
                rx,
                cancel.clone(),
            )));
        }
        (
            Self {
                shards: Arc::new(shards),
            },
            handles,
        )
    }

    pub async fn submit_fact(&self, fact: XcmFact) {
        let key = correlation_key(&fact.context);
        let shard = self.shard_for(&key);
        if self.shards[shard]
            .send(ShardCommand::Fact(Box::new(fact)))
            .await
            .is_err()
        {
            warn!("shard {} is gone, fact dropped: key={}", shard, key);
        }
    }

    pub async fn submit_expiry(&self, key: CorrelationKey) {
        let shard = self.shard_for(&key);
        if self.shards[shard]
            .send(ShardCommand::Expire(key))
            .await
            .is_err()
        {
            warn!("shard {} is gone, expiry dropped", shard);
        }
    }

    fn shard_for(&self, key: &CorrelationKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }
}

async fn run_shard(
    shard_id: usize,
    matcher: Matcher,
    mut rx: mpsc::Receiver<ShardCommand>,
    cancel: CancellationToken,
) {
    debug!("matching shard {} started", shard_id);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = rx.recv() => {
                match cmd {
                    Some(ShardCommand::Fact(fact)) => {
                        if let Err(e) = matcher.on_fact(*fact, unix_now_ms()).await {
                            error!("shard {}: fact processing failed: {}", shard_id, e);
                        }
                    }
                    Some(ShardCommand::Expire(key)) => {
                        if let Err(e) = matcher.expire_key(&key, unix_now_ms()).await {
                            error!("shard {}: expiry failed: key={}, error={}", shard_id, key, e);
                        }
                    }
                    None => break,
                }
            }
        }
    }
    debug!("matching shard {} stopped", shard_id);
}

/// Periodic expiry sweep.
///
/// The first tick fires immediately, so entries already expired at restart
/// resolve to timeout on the first sweep. Expired keys are routed through
/// the shard workers rather than resolved inline.
pub fn spawn_janitor(
    store: Arc<dyn WaitingStore>,
    engine: MatchingEngine,
    sweep_interval_ms: u64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(sweep_interval_ms.max(1)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let now_ms = unix_now_ms();
            match store.scan_expired(now_ms).await {
                Ok(expired) => {
                    if !expired.is_empty() {
                        info!("expiry sweep found {} entries past deadline", expired.len());
                    }
                    for entry in expired {
                        engine.submit_expiry(entry.key).await;
                    }
                }
                Err(e) => error!("expiry sweep failed: {}", e),
            }
        }
        debug!("janitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::store::MemoryStore;
    use crate::test_utils::{fact, route, NOW};
    use crate::types::{FactKind, Outcome};

    const WINDOW_MS: u64 = 120_000;

    fn config(require_resolved_stops: bool) -> MatchingConfig {
        MatchingConfig {
            max_inflight_window_ms: WINDOW_MS,
            sweep_interval_ms: 30_000,
            shards: 4,
            require_resolved_stops,
        }
    }

    fn matcher(
        store: Arc<dyn WaitingStore>,
        require_resolved_stops: bool,
    ) -> (Matcher, mpsc::Receiver<XcmTerminal>) {
        let (tx, rx) = mpsc::channel(16);
        (Matcher::new(store, config(require_resolved_stops), tx), rx)
    }

    fn three_leg_facts() -> Vec<XcmFact> {
        let legs = route(&["urn:ocn:local:0", "urn:ocn:local:1", "urn:ocn:local:2"]);
        vec![
            fact(FactKind::Sent, "urn:ocn:local:0", Some(Outcome::Success), legs.clone()),
            fact(FactKind::Relayed, "urn:ocn:local:1", Some(Outcome::Success), legs.clone()),
            fact(FactKind::Received, "urn:ocn:local:2", Some(Outcome::Success), legs),
        ]
    }

    #[tokio::test]
    async fn test_order_independence_over_all_permutations() {
        let facts = three_leg_facts();
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let mut reference: Option<Journey> = None;
        for order in orders {
            let store = Arc::new(MemoryStore::new());
            // With all stops required, every permutation consumes all three
            // facts before resolving.
            let (matcher, mut rx) = matcher(store.clone(), true);
            for index in order {
                matcher.on_fact(facts[index].clone(), NOW).await.unwrap();
            }
            let terminal = rx.try_recv().expect("exactly one terminal event");
            assert!(rx.try_recv().is_err(), "no second emission");
            let journey = terminal.journey().clone();
            assert_eq!(journey.status, JourneyStatus::Matched);
            match &reference {
                None => reference = Some(journey),
                Some(reference) => assert_eq!(&journey, reference, "order {:?} diverged", order),
            }
        }
    }

    #[tokio::test]
    async fn test_idempotence_after_terminal_resolution() {
        let legs = route(&["urn:ocn:local:0", "urn:ocn:local:2"]);
        let sent = fact(FactKind::Sent, "urn:ocn:local:0", Some(Outcome::Success), legs.clone());
        let received = fact(
            FactKind::Received,
            "urn:ocn:local:2",
            Some(Outcome::Success),
            legs,
        );
        let store = Arc::new(MemoryStore::new());
        let (matcher, mut rx) = matcher(store.clone(), false);

        matcher.on_fact(sent, NOW).await.unwrap();
        matcher.on_fact(received.clone(), NOW).await.unwrap();
        let terminal = rx.try_recv().expect("terminal emitted");
        let key = correlation_key(&received.context);
        let archived = store.get_archived(&key).await.unwrap().unwrap();

        // Re-delivering after resolution must change nothing and emit
        // nothing.
        matcher.on_fact(received, NOW + 500).await.unwrap();
        assert!(rx.try_recv().is_err());
        let archived_after = store.get_archived(&key).await.unwrap().unwrap();
        assert_eq!(archived, archived_after);
        assert_eq!(terminal.journey(), &archived_after);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_terminates_immediately() {
        let legs = route(&[
            "urn:ocn:local:a",
            "urn:ocn:local:b",
            "urn:ocn:local:c",
            "urn:ocn:local:d",
        ]);
        let store = Arc::new(MemoryStore::new());
        let (matcher, mut rx) = matcher(store.clone(), false);

        let sent = fact(FactKind::Sent, "urn:ocn:local:a", Some(Outcome::Success), legs.clone());
        matcher.on_fact(sent, NOW).await.unwrap();
        let failed = fact(FactKind::Relayed, "urn:ocn:local:b", Some(Outcome::Fail), legs);
        matcher.on_fact(failed, NOW + 1).await.unwrap();

        let terminal = rx.try_recv().expect("failure is terminal");
        let journey = terminal.journey();
        assert_eq!(journey.status, JourneyStatus::Failed);
        assert_eq!(journey.stops[0].outcome, Some(Outcome::Fail));
        assert!(!journey.stops[0].skipped);
        assert_eq!(journey.stops[1].outcome, Some(Outcome::Fail));
        assert!(journey.stops[1].skipped);
        assert_eq!(journey.destination.outcome, Some(Outcome::Fail));
        assert!(journey.destination.skipped);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_times_out_expired_entries() {
        let legs = route(&["urn:ocn:local:0", "urn:ocn:local:1", "urn:ocn:local:2"]);
        let sent = fact(FactKind::Sent, "urn:ocn:local:0", Some(Outcome::Success), legs);
        let store = Arc::new(MemoryStore::new());
        let (matcher, mut rx) = matcher(store.clone(), false);
        matcher.on_fact(sent, NOW).await.unwrap();

        // Before the deadline nothing expires.
        assert_eq!(matcher.sweep(NOW + WINDOW_MS - 1).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());

        assert_eq!(matcher.sweep(NOW + WINDOW_MS).await.unwrap(), 1);
        let terminal = rx.try_recv().expect("timeout emitted");
        let journey = terminal.journey();
        assert_eq!(journey.status, JourneyStatus::TimedOut);
        assert!(journey.destination.timeout);
        assert!(journey.destination.outcome.is_none());
        assert!(journey.stops[0].timeout);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_restart_recovery_times_out_stale_entry_on_first_sweep() {
        let legs = route(&["urn:ocn:local:0", "urn:ocn:local:2"]);
        let sent = fact(FactKind::Sent, "urn:ocn:local:0", Some(Outcome::Success), legs);
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());

        {
            let (matcher, _rx) = matcher(store.clone(), false);
            matcher.on_fact(sent, NOW).await.unwrap();
        }

        // A fresh matcher over the same store simulates a process restart
        // after the deadline already passed.
        let (matcher, mut rx) = matcher(store.clone(), false);
        assert_eq!(matcher.sweep(NOW + WINDOW_MS + 1).await.unwrap(), 1);
        let terminal = rx.try_recv().expect("stale entry resolves, not dropped");
        assert_eq!(terminal.journey().status, JourneyStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_late_fact_after_timeout_is_noop() {
        let legs = route(&["urn:ocn:local:0", "urn:ocn:local:2"]);
        let sent = fact(FactKind::Sent, "urn:ocn:local:0", Some(Outcome::Success), legs.clone());
        let received = fact(
            FactKind::Received,
            "urn:ocn:local:2",
            Some(Outcome::Success),
            legs,
        );
        let store = Arc::new(MemoryStore::new());
        let (matcher, mut rx) = matcher(store.clone(), false);
        matcher.on_fact(sent, NOW).await.unwrap();
        matcher.sweep(NOW + WINDOW_MS).await.unwrap();
        let timeout = rx.try_recv().unwrap();
        assert_eq!(timeout.journey().status, JourneyStatus::TimedOut);

        matcher.on_fact(received.clone(), NOW + WINDOW_MS + 1).await.unwrap();
        assert!(rx.try_recv().is_err(), "late fact emits nothing");
        let key = correlation_key(&received.context);
        let archived = store.get_archived(&key).await.unwrap().unwrap();
        assert_eq!(archived.status, JourneyStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_sharded_engine_end_to_end() {
        let legs = route(&["urn:ocn:local:0", "urn:ocn:local:2"]);
        let sent = fact(FactKind::Sent, "urn:ocn:local:0", Some(Outcome::Success), legs.clone());
        let received = fact(
            FactKind::Received,
            "urn:ocn:local:2",
            Some(Outcome::Success),
            legs,
        );
        let store = Arc::new(MemoryStore::new());
        let (tx, mut rx) = mpsc::channel(16);
        let matcher = Matcher::new(store.clone(), config(false), tx);
        let cancel = CancellationToken::new();
        let (engine, handles) = MatchingEngine::start(matcher, 4, cancel.clone());

        engine.submit_fact(sent).await;
        engine.submit_fact(received).await;

        let terminal = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("terminal within deadline")
            .expect("channel open");
        assert_eq!(terminal.journey().status, JourneyStatus::Matched);

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_janitor_times_out_preexisting_entry() {
        let legs = route(&["urn:ocn:local:0", "urn:ocn:local:2"]);
        let sent = fact(FactKind::Sent, "urn:ocn:local:0", Some(Outcome::Success), legs);
        let store = Arc::new(MemoryStore::new());
        let (tx, mut rx) = mpsc::channel(16);

        // Seed an entry whose deadline is already in the past, as after a
        // long downtime.
        let seeding = Matcher::new(
            store.clone(),
            MatchingConfig {
                max_inflight_window_ms: 0,
                ..config(false)
            },
            tx.clone(),
        );
        seeding.on_fact(sent, NOW).await.unwrap();

        let matcher = Matcher::new(store.clone(), config(false), tx);
        let cancel = CancellationToken::new();
        let (engine, mut handles) = MatchingEngine::start(matcher, 2, cancel.clone());
        handles.push(spawn_janitor(store.clone(), engine, 10, cancel.clone()));

        let terminal = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("janitor resolves the stale entry")
            .expect("channel open");
        assert_eq!(terminal.journey().status, JourneyStatus::TimedOut);

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
