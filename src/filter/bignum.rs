// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Arbitrary-precision integers for filter ordering operators.
//!
//! Chain values routinely exceed 2^53, where double-precision comparison
//! silently loses digits, so ordering operators never go through floating
//! point. Magnitudes are 256-bit, which covers every integer a runtime can
//! emit; an optional leading minus keeps the full ordering total.

use primitive_types::U256;
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigNum {
    negative: bool,
    magnitude: U256,
}

impl BigNum {
    /// Parses a JSON value as an integer. Accepts integral numbers and
    /// strings in decimal or `0x` hexadecimal form. Fractional numbers and
    /// other shapes yield `None`.
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Some(Self {
                        negative: false,
                        magnitude: U256::from(u),
                    })
                } else if let Some(i) = n.as_i64() {
                    Some(Self {
                        negative: i < 0,
                        magnitude: U256::from(i.unsigned_abs()),
                    })
                } else {
                    None
                }
            }
            Value::String(s) => Self::parse_str(s),
            _ => None,
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        let (negative, rest) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        if rest.is_empty() {
            return None;
        }
        let magnitude = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
            U256::from_str_radix(hex, 16).ok()?
        } else {
            U256::from_dec_str(rest).ok()?
        };
        Some(Self {
            // Normalize -0 so equality and ordering behave.
            negative: negative && !magnitude.is_zero(),
            magnitude,
        })
    }
}

impl PartialOrd for BigNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BigNum {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.magnitude.cmp(&other.magnitude),
            (true, true) => other.magnitude.cmp(&self.magnitude),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_beyond_double_precision() {
        // 2^64: a double would collapse this against nearby values.
        let big = BigNum::parse(&json!("18446744073709551616")).unwrap();
        let one = BigNum::parse(&json!("1")).unwrap();
        assert!(big > one);

        let adjacent = BigNum::parse(&json!("18446744073709551617")).unwrap();
        assert!(adjacent > big);
        assert_ne!(adjacent, big);
    }

    #[test]
    fn test_parses_numbers_and_hex() {
        assert_eq!(
            BigNum::parse(&json!(42)).unwrap(),
            BigNum::parse(&json!("42")).unwrap()
        );
        assert_eq!(
            BigNum::parse(&json!("0xff")).unwrap(),
            BigNum::parse(&json!(255)).unwrap()
        );
    }

    #[test]
    fn test_negative_ordering() {
        let minus_two = BigNum::parse(&json!("-2")).unwrap();
        let minus_one = BigNum::parse(&json!(-1)).unwrap();
        let zero = BigNum::parse(&json!(0)).unwrap();
        assert!(minus_two < minus_one);
        assert!(minus_one < zero);
        // -0 == 0
        assert_eq!(BigNum::parse(&json!("-0")).unwrap(), zero);
    }

    #[test]
    fn test_rejects_non_integers() {
        assert!(BigNum::parse(&json!(1.5)).is_none());
        assert!(BigNum::parse(&json!("not a number")).is_none());
        assert!(BigNum::parse(&json!(null)).is_none());
        assert!(BigNum::parse(&json!([1])).is_none());
        assert!(BigNum::parse(&json!("")).is_none());
    }
}
