//! Error types for the synchronization engine.

use crate::rop::RopResult;
use crate::transport::TransportError;
use fxsync_codec::CodecError;
use fxsync_core::CoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while driving a synchronization session.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A handle, object id, state index or buffer id is not in the session tables.
    #[error("invalid {kind} index {index}")]
    InvalidHandle {
        /// Which table was consulted.
        kind: &'static str,
        /// The index that was not found.
        index: u32,
    },

    /// The handle exists but names the wrong kind of object.
    #[error("{kind} handle {index} cannot be used for {operation}")]
    WrongHandleKind {
        /// Kind of object the handle refers to.
        kind: &'static str,
        /// The handle index.
        index: u32,
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// The local counter range is used up or was never allocated.
    #[error("local counter range exhausted; call allocate_counters first")]
    ExhaustedLocalRange,

    /// The transport failed to move the request or response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server rejected a remote operation.
    #[error("{rop} failed on the server: {result}")]
    Protocol {
        /// Name of the remote operation.
        rop: &'static str,
        /// Result code reported by the server.
        result: RopResult,
    },

    /// A request was rejected locally before reaching the server.
    #[error("local validation failed: {0}")]
    LocalValidation(String),

    /// A downloaded stream could not be decoded, or an upload could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An identifier or version-vector operation failed.
    #[error("core error: {0}")]
    Core(CoreError),

    /// The operation is not allowed in the session's current phase.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current phase.
        from: String,
        /// Attempted target phase.
        to: String,
    },

    /// The server answered with a response that does not match the request.
    #[error("unexpected response to {rop}")]
    UnexpectedResponse {
        /// Name of the remote operation.
        rop: &'static str,
    },
}

impl SyncError {
    /// Creates a local validation error.
    pub fn local(message: impl Into<String>) -> Self {
        Self::LocalValidation(message.into())
    }

    /// Returns true if the server itself rejected the request.
    ///
    /// Local validation, codec and handle errors are never remote.
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncError::Protocol { .. })
    }

    /// Returns true if this error can be retried.
    ///
    /// Always false: retry is a policy of the caller, and a transport
    /// failure terminates the context that was running.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Returns true if the error came from the transport collaborator.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }
}

impl From<CoreError> for SyncError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::ExhaustedLocalRange { .. } => SyncError::ExhaustedLocalRange,
            other => SyncError::Core(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_and_local_errors_are_distinguished() {
        let remote = SyncError::Protocol {
            rop: "SynchronizationImportMessageMove",
            result: RopResult::InvalidParameter,
        };
        assert!(remote.is_remote());

        let local = SyncError::Core(CoreError::invalid_pcl("too short"));
        assert!(!local.is_remote());
        assert!(!SyncError::local("bad request").is_remote());
    }

    #[test]
    fn nothing_is_retryable() {
        assert!(!SyncError::Transport(TransportError::disconnected("gone")).is_retryable());
        assert!(!SyncError::ExhaustedLocalRange.is_retryable());
    }

    #[test]
    fn exhausted_range_is_lifted_out_of_core() {
        let err: SyncError = CoreError::ExhaustedLocalRange { allocated: 4 }.into();
        assert!(matches!(err, SyncError::ExhaustedLocalRange));
    }

    #[test]
    fn error_display() {
        let err = SyncError::InvalidHandle {
            kind: "handle",
            index: 7,
        };
        assert_eq!(err.to_string(), "invalid handle index 7");

        let err = SyncError::Protocol {
            rop: "FastTransferSourceGetBuffer",
            result: RopResult::BufferTooSmall,
        };
        assert!(err.to_string().contains("FastTransferSourceGetBuffer"));
    }
}
