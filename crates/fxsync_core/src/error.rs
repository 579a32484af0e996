//! Error types for the core crate.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while building, decoding or comparing identifiers and
/// version vectors.
///
/// All of these are local failures: the bytes or the call sequence were
/// invalid before anything reached a server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Input ended before a fixed-size field could be read.
    #[error("truncated input at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        /// Offset of the failed read.
        offset: usize,
        /// Bytes required.
        needed: usize,
        /// Bytes left.
        available: usize,
    },

    /// A value had the wrong length for its type.
    #[error("invalid {what} length: expected {expected}, found {found}")]
    InvalidLength {
        /// What was being decoded.
        what: &'static str,
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        found: usize,
    },

    /// Counter does not fit in 48 bits.
    #[error("global counter {value:#x} exceeds 48 bits")]
    CounterOverflow {
        /// The rejected value.
        value: u64,
    },

    /// Counter arithmetic went below zero.
    #[error("global counter underflow")]
    CounterUnderflow,

    /// A range had its low bound above its high bound.
    #[error("invalid range: low {low:#x} > high {high:#x}")]
    InvalidRange {
        /// Low bound.
        low: u64,
        /// High bound.
        high: u64,
    },

    /// Malformed IDSET/CNSET encoding.
    #[error("invalid id set: {message}")]
    InvalidIdSet {
        /// Description of the problem.
        message: String,
    },

    /// Malformed predecessor change list.
    #[error("invalid predecessor change list: {message}")]
    InvalidPcl {
        /// Description of the problem.
        message: String,
    },

    /// The local counter range has been used up.
    #[error("local counter range exhausted after {allocated} counters")]
    ExhaustedLocalRange {
        /// Counters handed out from the range.
        allocated: u64,
    },

    /// A PCL extension did not advance the replica's counter.
    #[error("stale change key for {replica}: {proposed:#x} is not newer than {previous:#x}")]
    StaleChangeKey {
        /// Replica being extended.
        replica: String,
        /// Counter already recorded.
        previous: u64,
        /// Counter that was offered.
        proposed: u64,
    },

    /// No replica GUID is registered for a replica index.
    #[error("unknown replica index {0}")]
    UnknownReplicaIndex(u16),

    /// No replica index is registered for a replica GUID.
    #[error("unknown replica {0}")]
    UnknownReplica(String),

    /// A short-term/long-term pair clashes with a mapping already held.
    #[error("conflicting mapping for short-term id {short_term:#018x} and {long_term}")]
    MappingConflict {
        /// The short-term id.
        short_term: u64,
        /// The long-term id.
        long_term: String,
    },

    /// A replica index/GUID pair clashes with a registration already held.
    #[error("conflicting registration of replica index {index} for {replica}")]
    ReplicaConflict {
        /// The replica index.
        index: u16,
        /// The replica GUID.
        replica: String,
    },
}

impl CoreError {
    /// Create an invalid id set error.
    pub fn invalid_idset(message: impl Into<String>) -> Self {
        Self::InvalidIdSet {
            message: message.into(),
        }
    }

    /// Create an invalid PCL error.
    pub fn invalid_pcl(message: impl Into<String>) -> Self {
        Self::InvalidPcl {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_offsets() {
        let err = CoreError::Truncated {
            offset: 10,
            needed: 6,
            available: 2,
        };
        let text = err.to_string();
        assert!(text.contains("10"));
        assert!(text.contains("6"));
    }

    #[test]
    fn constructors() {
        assert!(matches!(
            CoreError::invalid_idset("bad"),
            CoreError::InvalidIdSet { .. }
        ));
        assert!(matches!(
            CoreError::invalid_pcl("bad"),
            CoreError::InvalidPcl { .. }
        ));
    }
}
