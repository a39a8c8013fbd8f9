//! Composite key encoding for non-unique indexes.
//!
//! A non-unique index can hold many objects under the same secondary key,
//! but the underlying tree maps each byte-string key to exactly one entry.
//! The composite encoding makes every entry distinct by appending the
//! object's primary key, followed by the secondary key's length:
//!
//! ```text
//! secondary + primary + u16-big-endian(len(secondary))
//! ```
//!
//! Placing the secondary key first keeps all entries with the same
//! secondary key adjacent in tree order, so a non-unique lookup is a prefix
//! scan. The length suffix is required to split the two variable-length
//! parts back apart: the tree stores plain bytes and has no schema to
//! consult.

use crate::error::{KeyError, KeyResult};
use crate::key::Key;

/// Width of the big-endian length suffix.
const LEN_SUFFIX: usize = 2;

/// Encodes a (secondary, primary) key pair into a single composite key.
///
/// Fails with [`KeyError::SecondaryTooLong`] if the secondary key exceeds
/// `u16::MAX` bytes.
pub fn encode_composite(secondary: &Key, primary: &Key) -> KeyResult<Key> {
    let sec = secondary.as_bytes();
    let pri = primary.as_bytes();
    if sec.len() > u16::MAX as usize {
        return Err(KeyError::SecondaryTooLong {
            len: sec.len(),
            max: u16::MAX as usize,
        });
    }

    let mut out = Vec::with_capacity(sec.len() + pri.len() + LEN_SUFFIX);
    out.extend_from_slice(sec);
    out.extend_from_slice(pri);
    out.extend_from_slice(&(sec.len() as u16).to_be_bytes());
    Ok(Key::from_bytes(out))
}

/// Decodes a composite key back into its (secondary, primary) pair.
pub fn decode_composite(bytes: &[u8]) -> KeyResult<(Key, Key)> {
    if bytes.len() < LEN_SUFFIX {
        return Err(KeyError::truncated(bytes.len(), LEN_SUFFIX));
    }

    let (payload, suffix) = bytes.split_at(bytes.len() - LEN_SUFFIX);
    let sec_len = u16::from_be_bytes([suffix[0], suffix[1]]) as usize;
    if sec_len > payload.len() {
        return Err(KeyError::corrupt(sec_len, payload.len()));
    }

    let (secondary, primary) = payload.split_at(sec_len);
    Ok((Key::from_bytes(secondary), Key::from_bytes(primary)))
}
