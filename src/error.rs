// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the monitor.
//!
//! A journey timeout is not represented here: it is a normal terminal state
//! of the matching state machine, not a failure.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MonitorError {
    // Malformed filter or subscription, surfaced to the caller. Never enters
    // engine state.
    #[error("validation error: {0}")]
    Validation(String),
    // Unknown subscription, agent or network, surfaced to the caller.
    #[error("not found: {0}")]
    NotFound(String),
    // Malformed chain data. The offending fact is dropped and block
    // processing continues.
    #[error("decode error: {0}")]
    Decode(String),
    // Persistence failure. Retried before in-memory state is treated as
    // authoritative.
    #[error("storage error: {0}")]
    Storage(String),
    // An engine invariant did not hold (e.g. the stop-not-found fallback
    // triggered). The engine logs and continues with best-effort recovery.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    // A notification sink failed to deliver. Reported and dropped.
    #[error("delivery error: {0}")]
    Delivery(String),
}

impl MonitorError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            MonitorError::Validation(_) => "validation",
            MonitorError::NotFound(_) => "not_found",
            MonitorError::Decode(_) => "decode",
            MonitorError::Storage(_) => "storage",
            MonitorError::InvariantViolation(_) => "invariant_violation",
            MonitorError::Delivery(_) => "delivery",
        }
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
