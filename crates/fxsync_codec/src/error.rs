//! Error types for the codec crate.

use fxsync_core::CoreError;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding, decoding or verifying a stream.
///
/// Every decode error is fatal to the current decode; no partial object is
/// returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A read ran past the end of the buffer.
    #[error("truncated stream at offset {offset}: needed {needed} bytes, {available} available")]
    TruncatedStream {
        /// Offset of the failed read.
        offset: usize,
        /// Bytes required.
        needed: usize,
        /// Bytes left.
        available: usize,
    },

    /// A 4-byte value is neither a marker nor a readable property tag.
    #[error("unknown marker {value:#010x} at offset {offset}")]
    UnknownMarker {
        /// The value read.
        value: u32,
        /// Offset of the value.
        offset: usize,
    },

    /// A recognized marker appeared where the grammar does not allow it.
    #[error("unexpected marker {found:#010x} at offset {offset}, expected {expected}")]
    UnexpectedMarker {
        /// What the grammar required.
        expected: String,
        /// The value read.
        found: u32,
        /// Offset of the value.
        offset: usize,
    },

    /// Change records are not in non-increasing modification-time order.
    #[error("change {index} modified at {current} is newer than the previous change at {previous}")]
    OrderingViolation {
        /// Index of the offending record.
        index: usize,
        /// Modification time of the previous timed record.
        previous: u64,
        /// Modification time of the offending record.
        current: u64,
    },

    /// A folder change appears before the change of its parent folder.
    #[error("folder change {index} precedes its parent at {parent_index}")]
    ParentOrderViolation {
        /// Index of the child record.
        index: usize,
        /// Index of the parent record.
        parent_index: usize,
    },

    /// A property value failed local validation.
    #[error("invalid value for property {tag:#010x}: {message}")]
    InvalidValue {
        /// Tag of the property.
        tag: u32,
        /// Description of the problem.
        message: String,
    },

    /// Objects are nested deeper than the decoder allows.
    #[error("nesting depth exceeds {max}")]
    NestingTooDeep {
        /// Maximum depth.
        max: usize,
    },

    /// Bytes remain after a complete object.
    #[error("{count} trailing bytes at offset {offset}")]
    TrailingBytes {
        /// Offset of the first trailing byte.
        offset: usize,
        /// Number of trailing bytes.
        count: usize,
    },

    /// A construct the codec recognizes but does not handle.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A variable-width value does not fit its length prefix.
    #[error("value of property {tag:#010x} is {len} bytes, limit is {max}")]
    ValueTooLarge {
        /// Tag of the property.
        tag: u32,
        /// Encoded length.
        len: usize,
        /// Largest length the prefix can carry.
        max: usize,
    },
}

impl CodecError {
    /// Create an invalid value error.
    pub fn invalid_value(tag: u32, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            tag,
            message: message.into(),
        }
    }

    /// Create an unexpected marker error.
    pub fn unexpected_marker(expected: impl Into<String>, found: u32, offset: usize) -> Self {
        Self::UnexpectedMarker {
            expected: expected.into(),
            found,
            offset,
        }
    }

    /// Returns true for errors caused by a malformed or short buffer rather
    /// than an ordering check.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        !matches!(
            self,
            Self::OrderingViolation { .. } | Self::ParentOrderViolation { .. }
        )
    }
}

impl From<CoreError> for CodecError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Truncated {
                offset,
                needed,
                available,
            } => Self::TruncatedStream {
                offset,
                needed,
                available,
            },
            other => Self::invalid_value(0, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_maps_from_core() {
        let err: CodecError = CoreError::Truncated {
            offset: 4,
            needed: 2,
            available: 1,
        }
        .into();
        assert_eq!(
            err,
            CodecError::TruncatedStream {
                offset: 4,
                needed: 2,
                available: 1
            }
        );
    }

    #[test]
    fn ordering_is_not_structural() {
        let err = CodecError::OrderingViolation {
            index: 1,
            previous: 1,
            current: 2,
        };
        assert!(!err.is_structural());
        assert!(CodecError::Unsupported("x".into()).is_structural());
    }

    #[test]
    fn display_formats_hex() {
        let err = CodecError::UnknownMarker {
            value: 0xDEAD_BEEF,
            offset: 8,
        };
        assert!(err.to_string().contains("0xdeadbeef"));
    }
}
