// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Canonical account decoding for filter address operators.
//!
//! Addresses admit multiple equivalent encodings: the raw 32-byte public key
//! (hex or a JSON byte array) and the base58 checksummed text form carrying a
//! network prefix. Equality must therefore compare canonical public keys, not
//! surface strings.

use blake2::{Blake2b512, Digest};
use serde_json::Value;

const CHECKSUM_PREAMBLE: &[u8] = b"SS58PRE";
const ACCOUNT_LEN: usize = 32;
const CHECKSUM_LEN: usize = 2;

/// Decodes a JSON value into a canonical 32-byte public key.
///
/// Accepts `0x`-prefixed 64-hex-digit strings, checksummed base58 text, and
/// arrays of 32 byte values. Returns `None` on any malformed input; the
/// operators map that to their fail-open/fail-closed semantics, never an
/// error.
pub fn decode_account(value: &Value) -> Option<[u8; ACCOUNT_LEN]> {
    match value {
        Value::String(s) => decode_account_str(s),
        Value::Array(items) => {
            if items.len() != ACCOUNT_LEN {
                return None;
            }
            let mut key = [0u8; ACCOUNT_LEN];
            for (slot, item) in key.iter_mut().zip(items) {
                *slot = u8::try_from(item.as_u64()?).ok()?;
            }
            Some(key)
        }
        _ => None,
    }
}

pub fn decode_account_str(s: &str) -> Option<[u8; ACCOUNT_LEN]> {
    let trimmed = s.trim();
    if let Some(hex_part) = trimmed.strip_prefix("0x") {
        if hex_part.len() != ACCOUNT_LEN * 2 {
            return None;
        }
        let bytes = hex::decode(hex_part).ok()?;
        let mut key = [0u8; ACCOUNT_LEN];
        key.copy_from_slice(&bytes);
        return Some(key);
    }
    decode_checksummed(trimmed)
}

// Layout: prefix (1 or 2 bytes) | 32-byte public key | 2-byte checksum,
// where the checksum is the head of blake2b-512 over "SS58PRE" + prefix +
// key.
fn decode_checksummed(s: &str) -> Option<[u8; ACCOUNT_LEN]> {
    let data = bs58::decode(s).into_vec().ok()?;
    let prefix_len = match data.first()? {
        0..=63 => 1,
        64..=127 => 2,
        _ => return None,
    };
    if data.len() != prefix_len + ACCOUNT_LEN + CHECKSUM_LEN {
        return None;
    }
    let (body, checksum) = data.split_at(data.len() - CHECKSUM_LEN);
    let mut hasher = Blake2b512::new();
    hasher.update(CHECKSUM_PREAMBLE);
    hasher.update(body);
    let digest = hasher.finalize();
    if digest[..CHECKSUM_LEN] != *checksum {
        return None;
    }
    let mut key = [0u8; ACCOUNT_LEN];
    key.copy_from_slice(&body[prefix_len..]);
    Some(key)
}

/// Canonical equality across encodings; `None` when either side fails to
/// decode.
pub fn accounts_equal(a: &Value, b: &Value) -> Option<bool> {
    Some(decode_account(a)? == decode_account(b)?)
}
