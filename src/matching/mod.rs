// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Matching Module
//!
//! Correlates facts observed on independent networks into journey records:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        MatchingEngine                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  facts ──▶ shard by correlation key ──▶ Matcher ──▶ terminals    │
//! │                                           │                      │
//! │                                     WaitingStore                 │
//! │                               (pending: / journey: docs)         │
//! │                                                                  │
//! │  janitor: scan expired ──▶ same shard path ──▶ timeout decision  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All mutations for one correlation key flow through one shard task, so a
//! late-arriving fact can never interleave with a timeout decision for that
//! same key. Distinct keys process fully in parallel.

pub mod engine;
pub mod journey;
pub mod store;

pub use engine::{spawn_janitor, Matcher, MatchingEngine};
pub use journey::PendingEntry;
pub use store::{open_database, MemoryStore, RocksDbStore, WaitingStore};
