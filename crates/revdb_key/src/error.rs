//! Error types for key encoding.

use thiserror::Error;

/// Result type for key operations.
pub type KeyResult<T> = Result<T, KeyError>;

/// Errors that can occur while encoding or decoding index keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// A composite key was too short to contain its length suffix.
    #[error("composite key truncated: {len} bytes, need at least {need}")]
    Truncated {
        /// Actual length of the input.
        len: usize,
        /// Minimum length required.
        need: usize,
    },

    /// The length suffix of a composite key points past the key data.
    #[error("composite key corrupt: secondary length {secondary_len} exceeds payload {payload_len}")]
    Corrupt {
        /// Secondary key length read from the suffix.
        secondary_len: usize,
        /// Number of payload bytes actually present.
        payload_len: usize,
    },

    /// A secondary key was too long for the 16-bit length suffix.
    #[error("secondary key too long: {len} bytes, maximum {max}")]
    SecondaryTooLong {
        /// Length of the offending secondary key.
        len: usize,
        /// Maximum encodable length.
        max: usize,
    },
}

impl KeyError {
    /// Creates a truncated-key error.
    pub(crate) fn truncated(len: usize, need: usize) -> Self {
        Self::Truncated { len, need }
    }

    /// Creates a corrupt-key error.
    pub(crate) fn corrupt(secondary_len: usize, payload_len: usize) -> Self {
        Self::Corrupt {
            secondary_len,
            payload_len,
        }
    }
}
