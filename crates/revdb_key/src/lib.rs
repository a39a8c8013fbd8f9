//! # RevDB Key Encoding
//!
//! Byte-string index keys for RevDB tables.
//!
//! Every index maps objects to one or more [`Key`]s. Keys are opaque byte
//! strings whose **lexicographic order is the index order**, so all encoders
//! here are order-preserving:
//!
//! - Unsigned integers encode as fixed-width big-endian bytes.
//! - Signed integers flip the sign bit before the big-endian encoding.
//! - Strings and raw bytes are used verbatim.
//!
//! Non-unique indexes additionally need a composite encoding that appends
//! the primary key to the secondary key (see [`encode_composite`]), keeping
//! entries with equal secondary keys adjacent while making every entry
//! distinct.
//!
//! ## Example
//!
//! ```rust
//! use revdb_key::{Key, KeySet};
//!
//! let id = Key::from_u64(42);
//! assert_eq!(id.as_bytes(), &[0, 0, 0, 0, 0, 0, 0, 42]);
//!
//! let tags: KeySet = ["hello", "world"].into_iter().map(Key::from).collect();
//! assert_eq!(tags.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod composite;
mod error;
mod key;

pub use composite::{decode_composite, encode_composite};
pub use error::{KeyError, KeyResult};
pub use key::{Key, KeySet};
