// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Subscription filter predicate layer.
//!
//! A filter is a JSON document of field criteria, compiled into a typed AST
//! with a closed operator set and evaluated against a flattened candidate
//! event. Compilation rejects malformed documents up front; evaluation is
//! pure, does no I/O, and its cost is bounded by the size of the compiled
//! document.
//!
//! Domain operators extend the structural ones because raw chain values are
//! arbitrary-precision integers and addresses admit multiple equivalent
//! encodings:
//! - `$bn_lt/$bn_lte/$bn_gt/$bn_gte/$bn_eq/$bn_neq` (and the plain
//!   `$lt/$lte/$gt/$gte` spellings) compare as big integers, never as
//!   doubles.
//! - `$address_eq/$address_neq` compare canonical 32-byte public keys;
//!   decode failure on either side is `false` for equality and `true` for
//!   inequality, never an error.
//!
//! Any comparison against a field resolving to multiple values succeeds if
//! any element satisfies it.

pub mod address;
pub mod bignum;

use crate::error::{MonitorError, MonitorResult};
use bignum::BigNum;
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every clause must hold. An empty conjunction matches everything.
    All(Vec<Filter>),
    /// At least one clause must hold.
    Any(Vec<Filter>),
    Field { path: String, op: MatchOp },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOp {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    BnLt(BigNum),
    BnLte(BigNum),
    BnGt(BigNum),
    BnGte(BigNum),
    BnEq(BigNum),
    BnNeq(BigNum),
    AddressEq(AddressOperand),
    AddressNeq(AddressOperand),
}

/// Address operand with its canonical form resolved at compile time. An
/// operand that does not decode is kept: equality against it is always
/// false, inequality always true.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressOperand {
    raw: Value,
    decoded: Option<[u8; 32]>,
}

impl AddressOperand {
    fn new(raw: &Value) -> Self {
        Self {
            raw: raw.clone(),
            decoded: address::decode_account(raw),
        }
    }
}

impl MatchOp {
    /// Canonical address equality against the given operand.
    pub fn address_eq(operand: &Value) -> Self {
        MatchOp::AddressEq(AddressOperand::new(operand))
    }
}

/// A compiled, evaluatable filter document.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterQuery {
    root: Filter,
}

impl FilterQuery {
    /// Compiles a filter document. Unknown operators and malformed operands
    /// are validation errors surfaced to the caller; they never enter engine
    /// state.
    pub fn parse(document: &Value) -> MonitorResult<Self> {
        Ok(Self {
            root: parse_document(document)?,
        })
    }

    /// A filter that matches every event.
    pub fn match_all() -> Self {
        Self {
            root: Filter::All(Vec::new()),
        }
    }

    /// Combines this filter with extra clauses that must also hold.
    pub fn and(self, clauses: Vec<Filter>) -> Self {
        let mut all = match self.root {
            Filter::All(existing) => existing,
            other => vec![other],
        };
        all.extend(clauses);
        Self {
            root: Filter::All(all),
        }
    }

    pub fn matches(&self, event: &Value) -> bool {
        eval(&self.root, event)
    }
}

fn parse_document(document: &Value) -> MonitorResult<Filter> {
    let Some(object) = document.as_object() else {
        return Err(MonitorError::Validation(
            "filter document must be an object".to_string(),
        ));
    };
    let mut clauses = Vec::with_capacity(object.len());
    for (key, value) in object {
        match key.as_str() {
            "$and" => clauses.push(Filter::All(parse_document_list(key, value)?)),
            "$or" => clauses.push(Filter::Any(parse_document_list(key, value)?)),
            other if other.starts_with('$') => {
                return Err(MonitorError::Validation(format!(
                    "unknown operator: {}",
                    other
                )));
            }
            field => clauses.push(parse_field(field, value)?),
        }
    }
    Ok(Filter::All(clauses))
}

fn parse_document_list(op: &str, value: &Value) -> MonitorResult<Vec<Filter>> {
    let Some(items) = value.as_array() else {
        return Err(MonitorError::Validation(format!(
            "{} expects an array of filter documents",
            op
        )));
    };
    items.iter().map(parse_document).collect()
}

fn parse_field(path: &str, value: &Value) -> MonitorResult<Filter> {
    if let Some(object) = value.as_object() {
        if !object.is_empty() && object.keys().all(|k| k.starts_with('$')) {
            let mut ops = Vec::with_capacity(object.len());
            for (name, operand) in object {
                ops.push(Filter::Field {
                    path: path.to_string(),
                    op: parse_op(name, operand)?,
                });
            }
            return Ok(if ops.len() == 1 {
                ops.remove(0)
            } else {
                Filter::All(ops)
            });
        }
    }
    // Bare value: structural equality.
    Ok(Filter::Field {
        path: path.to_string(),
        op: MatchOp::Eq(value.clone()),
    })
}

fn parse_op(name: &str, operand: &Value) -> MonitorResult<MatchOp> {
    let op = match name {
        "$eq" => MatchOp::Eq(operand.clone()),
        "$ne" => MatchOp::Ne(operand.clone()),
        "$in" => MatchOp::In(operand_array(name, operand)?),
        "$nin" => MatchOp::Nin(operand_array(name, operand)?),
        "$exists" => MatchOp::Exists(operand.as_bool().ok_or_else(|| {
            MonitorError::Validation("$exists expects a boolean".to_string())
        })?),
        "$bn_lt" | "$lt" => MatchOp::BnLt(operand_bignum(name, operand)?),
        "$bn_lte" | "$lte" => MatchOp::BnLte(operand_bignum(name, operand)?),
        "$bn_gt" | "$gt" => MatchOp::BnGt(operand_bignum(name, operand)?),
        "$bn_gte" | "$gte" => MatchOp::BnGte(operand_bignum(name, operand)?),
        "$bn_eq" => MatchOp::BnEq(operand_bignum(name, operand)?),
        "$bn_neq" => MatchOp::BnNeq(operand_bignum(name, operand)?),
        "$address_eq" => MatchOp::AddressEq(AddressOperand::new(operand)),
        "$address_neq" => MatchOp::AddressNeq(AddressOperand::new(operand)),
        other => {
            return Err(MonitorError::Validation(format!(
                "unknown operator: {}",
                other
            )));
        }
    };
    Ok(op)
}

fn operand_array(name: &str, operand: &Value) -> MonitorResult<Vec<Value>> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| MonitorError::Validation(format!("{} expects an array", name)))
}

fn operand_bignum(name: &str, operand: &Value) -> MonitorResult<BigNum> {
    BigNum::parse(operand).ok_or_else(|| {
        MonitorError::Validation(format!("{} expects an integer operand", name))
    })
}

fn eval(filter: &Filter, event: &Value) -> bool {
    match filter {
        Filter::All(clauses) => clauses.iter().all(|c| eval(c, event)),
        Filter::Any(clauses) => clauses.iter().any(|c| eval(c, event)),
        Filter::Field { path, op } => {
            let segments: Vec<&str> = path.split('.').collect();
            let mut candidates = Vec::new();
            resolve(event, &segments, &mut candidates);
            eval_op(op, &candidates)
        }
    }
}

// Collects every value the dotted path reaches. Arrays along the path are
// traversed element-wise; at the leaf the array itself and its elements are
// both candidates, except byte arrays, which are single values.
fn resolve<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    match segments.split_first() {
        None => {
            out.push(value);
            if let Value::Array(items) = value {
                if !is_byte_array(value) {
                    out.extend(items.iter());
                }
            }
        }
        Some((head, rest)) => match value {
            Value::Object(map) => {
                if let Some(next) = map.get(*head) {
                    resolve(next, rest, out);
                }
            }
            Value::Array(items) => {
                for item in items {
                    resolve(item, segments, out);
                }
            }
            _ => {}
        },
    }
}

// A 32-byte array is one address value, not a collection of numbers.
fn is_byte_array(value: &Value) -> bool {
    match value {
        Value::Array(items) => {
            items.len() == 32
                && items
                    .iter()
                    .all(|i| i.as_u64().map(|b| b <= 255).unwrap_or(false))
        }
        _ => false,
    }
}

fn eval_op(op: &MatchOp, candidates: &[&Value]) -> bool {
    match op {
        MatchOp::Eq(operand) => candidates.iter().any(|c| *c == operand),
        MatchOp::Ne(operand) => {
            candidates.is_empty() || candidates.iter().any(|c| *c != operand)
        }
        MatchOp::In(operands) => candidates.iter().any(|c| operands.contains(c)),
        MatchOp::Nin(operands) => {
            candidates.is_empty() || candidates.iter().any(|c| !operands.contains(c))
        }
        MatchOp::Exists(expected) => !candidates.is_empty() == *expected,
        MatchOp::BnLt(operand) => bn_any(candidates, operand, Ordering::is_lt),
        MatchOp::BnLte(operand) => bn_any(candidates, operand, Ordering::is_le),
        MatchOp::BnGt(operand) => bn_any(candidates, operand, Ordering::is_gt),
        MatchOp::BnGte(operand) => bn_any(candidates, operand, Ordering::is_ge),
        MatchOp::BnEq(operand) => bn_any(candidates, operand, Ordering::is_eq),
        MatchOp::BnNeq(operand) => bn_any(candidates, operand, Ordering::is_ne),
        MatchOp::AddressEq(operand) => match operand.decoded {
            None => false,
            Some(target) => candidates
                .iter()
                .any(|c| address::decode_account(c) == Some(target)),
        },
        // Fail-open: an undecodable side cannot be proven equal.
        MatchOp::AddressNeq(operand) => match operand.decoded {
            None => true,
            Some(target) => {
                candidates.is_empty()
                    || candidates.iter().any(|c| match address::decode_account(c) {
                        None => true,
                        Some(decoded) => decoded != target,
                    })
            }
        },
    }
}

fn bn_any(candidates: &[&Value], operand: &BigNum, pred: fn(Ordering) -> bool) -> bool {
    candidates
        .iter()
        .filter_map(|c| BigNum::parse(c))
        .any(|value| pred(value.cmp(operand)))
}
