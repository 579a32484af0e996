//! Transport abstraction for remote operations.

use crate::rop::{RopReply, RopRequest, ServerHandle};
use parking_lot::Mutex;
use std::collections::VecDeque;
use thiserror::Error;

/// A failure to move a request or response.
///
/// Distinct from any [`RopResult`](crate::RopResult) the server reports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport error {code:#x}: {message}")]
pub struct TransportError {
    /// Transport status code.
    pub code: u32,
    /// Human-readable detail.
    pub message: String,
}

impl TransportError {
    /// Status code of a malformed envelope.
    pub const RPC_FORMAT: u32 = 0x0000_04B6;
    /// Status code of a lost connection.
    pub const DISCONNECTED: u32 = 0x0000_06BA;

    /// Creates an error with an explicit code.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The connection dropped.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(Self::DISCONNECTED, message)
    }

    /// The envelope could not be parsed.
    pub fn rpc_format(message: impl Into<String>) -> Self {
        Self::new(Self::RPC_FORMAT, message)
    }
}

/// Executes remote operations against one server identity.
///
/// Each call is synchronous: the chunked transfer loop must see every
/// transfer status before it issues the next request.
pub trait RopTransport: Send + Sync {
    /// Sends `request` on the object named by `input` and returns the reply.
    fn execute(
        &self,
        request: &RopRequest,
        input: ServerHandle,
    ) -> Result<RopReply, TransportError>;
}

impl<T: RopTransport + ?Sized> RopTransport for &T {
    fn execute(
        &self,
        request: &RopRequest,
        input: ServerHandle,
    ) -> Result<RopReply, TransportError> {
        (**self).execute(request, input)
    }
}

/// A scripted transport for tests.
///
/// Replies are returned in the order they were queued; every request is
/// recorded together with its input handle.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<Result<RopReply, TransportError>>>,
    requests: Mutex<Vec<(RopRequest, ServerHandle)>>,
}

impl MockTransport {
    /// Creates a transport with no queued replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply.
    pub fn push_reply(&self, reply: RopReply) {
        self.replies.lock().push_back(Ok(reply));
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: TransportError) {
        self.replies.lock().push_back(Err(error));
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<(RopRequest, ServerHandle)> {
        self.requests.lock().clone()
    }

    /// Number of requests seen so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of replies not yet consumed.
    pub fn pending(&self) -> usize {
        self.replies.lock().len()
    }
}

impl RopTransport for MockTransport {
    fn execute(
        &self,
        request: &RopRequest,
        input: ServerHandle,
    ) -> Result<RopReply, TransportError> {
        self.requests.lock().push((request.clone(), input));
        self.replies.lock().pop_front().unwrap_or_else(|| {
            Err(TransportError::disconnected(format!(
                "no scripted reply for {}",
                request.name()
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rop::{RopResponse, RopResult};

    #[test]
    fn mock_replays_in_order() {
        let transport = MockTransport::new();
        transport.push_reply(RopReply::success(RopResponse::Empty));
        transport.push_reply(RopReply::failure(RopResult::NotFound));

        let first = transport.execute(&RopRequest::Release, ServerHandle(1)).unwrap();
        assert!(first.result.is_success());
        let second = transport.execute(&RopRequest::Release, ServerHandle(2)).unwrap();
        assert_eq!(second.result, RopResult::NotFound);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].1, ServerHandle(2));
    }

    #[test]
    fn mock_without_reply_is_a_transport_error() {
        let transport = MockTransport::new();
        let err = transport
            .execute(&RopRequest::SynchronizationGetTransferState, ServerHandle(0))
            .unwrap_err();
        assert_eq!(err.code, TransportError::DISCONNECTED);
        assert!(err.message.contains("SynchronizationGetTransferState"));
    }

    #[test]
    fn mock_replays_errors() {
        let transport = MockTransport::new();
        transport.push_error(TransportError::rpc_format("bad envelope"));
        assert!(transport.execute(&RopRequest::Release, ServerHandle(0)).is_err());
        assert_eq!(transport.pending(), 0);
        assert_eq!(transport.request_count(), 1);
    }
}
