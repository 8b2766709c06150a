// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Subscription model and persistence.
//!
//! A subscription is expected to have a unique id per agent in the database.
//! Persisted layouts are additively versioned JSON documents, keyed
//! `subs:<agent>:<id>`.

use crate::error::{MonitorError, MonitorResult};
use crate::filter::{Filter, FilterQuery, MatchOp};
use crate::types::NetworkId;
use rocksdb::{Direction, IteratorMode, DB};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const SUBS_PREFIX: &str = "subs:";

/// Declarative arguments of a journey subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionArgs {
    /// Origin network the journey must depart from, if constrained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<NetworkId>,
    /// Destination networks of interest; empty means any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destinations: Vec<NetworkId>,
    /// Sender addresses of interest, in any supported encoding; empty means
    /// any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub senders: Vec<String>,
    /// Extra filter document evaluated against the flattened event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    #[serde(rename = "type")]
    pub channel_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub agent: String,
    pub owner: String,
    pub args: SubscriptionArgs,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl Subscription {
    /// Compiles the subscription's declarative arguments plus its optional
    /// filter document into one predicate over the flattened event.
    pub fn compile_filter(&self) -> MonitorResult<FilterQuery> {
        let mut clauses = Vec::new();
        if let Some(origin) = &self.args.origin {
            clauses.push(Filter::Field {
                path: "journey.origin.chainId".to_string(),
                op: MatchOp::Eq(Value::String(origin.as_str().to_string())),
            });
        }
        if !self.args.destinations.is_empty() {
            clauses.push(Filter::Field {
                path: "journey.destination.chainId".to_string(),
                op: MatchOp::In(
                    self.args
                        .destinations
                        .iter()
                        .map(|d| Value::String(d.as_str().to_string()))
                        .collect(),
                ),
            });
        }
        if !self.args.senders.is_empty() {
            // Any of the listed senders, compared canonically.
            clauses.push(Filter::Any(
                self.args
                    .senders
                    .iter()
                    .map(|sender| Filter::Field {
                        path: "journey.sender".to_string(),
                        op: MatchOp::address_eq(&Value::String(sender.clone())),
                    })
                    .collect(),
            ));
        }
        let base = match &self.args.filter {
            Some(document) => FilterQuery::parse(document)?,
            None => FilterQuery::match_all(),
        };
        Ok(base.and(clauses))
    }
}

/// Subscriptions persistence over the shared embedded database.
pub struct SubsStore {
    db: Arc<DB>,
}

impl SubsStore {
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }

    fn key(agent_id: &str, id: &str) -> Vec<u8> {
        format!("{}{}:{}", SUBS_PREFIX, agent_id, id).into_bytes()
    }

    /// Returns true if a subscription for the given id exists.
    pub fn exists(&self, agent_id: &str, id: &str) -> MonitorResult<bool> {
        Ok(self.raw_get(agent_id, id)?.is_some())
    }

    /// Retrieves all the subscriptions for a given agent.
    pub fn get_by_agent_id(&self, agent_id: &str) -> MonitorResult<Vec<Subscription>> {
        let prefix = format!("{}{}:", SUBS_PREFIX, agent_id).into_bytes();
        let mut subscriptions = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item
                .map_err(|e| MonitorError::Storage(format!("subscription scan failed: {}", e)))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let subscription: Subscription = serde_json::from_slice(&value).map_err(|e| {
                MonitorError::Storage(format!("undecodable subscription: {}", e))
            })?;
            subscriptions.push(subscription);
        }
        Ok(subscriptions)
    }

    /// Retrieves a subscription by id, failing with `NotFound` when it does
    /// not exist.
    pub fn get_by_id(&self, agent_id: &str, id: &str) -> MonitorResult<Subscription> {
        match self.raw_get(agent_id, id)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| MonitorError::Storage(format!("undecodable subscription: {}", e))),
            None => Err(MonitorError::NotFound(format!(
                "subscription {} {} not found",
                agent_id, id
            ))),
        }
    }

    /// Inserts a new subscription, failing with `Validation` on a duplicate
    /// id.
    pub fn insert(&self, subscription: &Subscription) -> MonitorResult<()> {
        if self.exists(&subscription.agent, &subscription.id)? {
            return Err(MonitorError::Validation(format!(
                "subscription with id={}:{} already exists",
                subscription.agent, subscription.id
            )));
        }
        self.save(subscription)
    }

    /// Writes the subscription, replacing any previous revision.
    pub fn save(&self, subscription: &Subscription) -> MonitorResult<()> {
        // Reject filters that would never compile before they are persisted.
        subscription.compile_filter()?;
        let value = serde_json::to_vec(subscription)
            .map_err(|e| MonitorError::Storage(format!("encode failed: {}", e)))?;
        self.db
            .put(Self::key(&subscription.agent, &subscription.id), value)
            .map_err(|e| MonitorError::Storage(format!("put failed: {}", e)))
    }

    /// Removes a subscription for the given id.
    pub fn remove(&self, agent_id: &str, id: &str) -> MonitorResult<()> {
        self.db
            .delete(Self::key(agent_id, id))
            .map_err(|e| MonitorError::Storage(format!("delete failed: {}", e)))
    }

    fn raw_get(&self, agent_id: &str, id: &str) -> MonitorResult<Option<Vec<u8>>> {
        self.db
            .get(Self::key(agent_id, id))
            .map_err(|e| MonitorError::Storage(format!("get failed: {}", e)))
    }
}
