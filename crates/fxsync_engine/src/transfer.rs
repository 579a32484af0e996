//! The chunked transfer loop.
//!
//! A download issues get-buffer calls until the server reports `Done` and
//! then hands back the concatenated chunks. An upload splits an encoded
//! stream into chunks no larger than the negotiated maximum.

use crate::config::TransferConfig;
use crate::error::{SyncError, SyncResult};
use crate::rop::{RopRequest, RopResponse, RopResult, ServerHandle, TransferStatus};
use crate::transport::RopTransport;
use bytes::{Bytes, BytesMut};
use tracing::{debug, info};

/// Diagnostics collected while a transfer runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Status of each call, in call order.
    pub statuses: Vec<TransferStatus>,
    /// Size of each chunk, in call order.
    pub chunk_sizes: Vec<usize>,
    /// Largest chunk the request allowed.
    pub limit: usize,
}

impl TransferReport {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    fn record(&mut self, status: TransferStatus, size: usize) {
        self.statuses.push(status);
        self.chunk_sizes.push(size);
    }

    /// Number of calls issued.
    pub fn calls(&self) -> usize {
        self.statuses.len()
    }

    /// Total bytes received or sent.
    pub fn total_bytes(&self) -> usize {
        self.chunk_sizes.iter().sum()
    }

    /// Returns true if any call reported `Partial`.
    pub fn saw_partial(&self) -> bool {
        self.statuses.contains(&TransferStatus::Partial)
    }

    /// Returns true if any call reported `NoRoom`.
    pub fn saw_no_room(&self) -> bool {
        self.statuses.contains(&TransferStatus::NoRoom)
    }

    /// Returns true if every chunk fit the requested size.
    pub fn chunks_fit(&self) -> bool {
        self.chunk_sizes.iter().all(|size| *size <= self.limit)
    }
}

/// How a download ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The server reported `Done`; `data` holds every chunk in call order.
    Complete {
        /// The assembled stream.
        data: Bytes,
        /// Diagnostics.
        report: TransferReport,
    },
    /// The server refused the requested buffer size. Nothing was assembled.
    BufferTooSmall {
        /// Diagnostics up to the refusal.
        report: TransferReport,
    },
    /// A call failed or reported the `Error` status.
    Failed {
        /// Result code of the failing call.
        result: RopResult,
        /// Status of the failing call, if it returned one.
        status: Option<TransferStatus>,
        /// Diagnostics up to the failure.
        report: TransferReport,
    },
}

impl TransferOutcome {
    /// Returns true for [`TransferOutcome::Complete`].
    pub fn is_complete(&self) -> bool {
        matches!(self, TransferOutcome::Complete { .. })
    }

    /// Diagnostics of the transfer.
    pub fn report(&self) -> &TransferReport {
        match self {
            TransferOutcome::Complete { report, .. }
            | TransferOutcome::BufferTooSmall { report }
            | TransferOutcome::Failed { report, .. } => report,
        }
    }

    /// The assembled stream, if the transfer completed.
    pub fn data(&self) -> Option<&Bytes> {
        match self {
            TransferOutcome::Complete { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Converts anything but a completed transfer into an error.
    pub fn into_complete(self) -> SyncResult<(Bytes, TransferReport)> {
        match self {
            TransferOutcome::Complete { data, report } => Ok((data, report)),
            TransferOutcome::BufferTooSmall { .. } => Err(SyncError::Protocol {
                rop: "FastTransferSourceGetBuffer",
                result: RopResult::BufferTooSmall,
            }),
            TransferOutcome::Failed { result, status, .. } => Err(SyncError::Protocol {
                rop: "FastTransferSourceGetBuffer",
                result: match status {
                    Some(TransferStatus::Error) if result.is_success() => {
                        RopResult::GeneralFailure
                    }
                    _ => result,
                },
            }),
        }
    }
}

/// Downloads a fast-transfer source until the server reports `Done`.
///
/// `Partial` and `NoRoom` keep the loop going. `BufferTooSmall` returns at
/// once without assembling anything.
pub fn download<T>(
    transport: &T,
    source: ServerHandle,
    config: &TransferConfig,
) -> SyncResult<TransferOutcome>
where
    T: RopTransport + ?Sized,
{
    let request = RopRequest::FastTransferSourceGetBuffer {
        size: config.buffer_size,
    };
    let mut report = TransferReport::new(usize::from(config.buffer_size.limit()));
    let mut chunks: Vec<Vec<u8>> = Vec::new();

    loop {
        let reply = transport.execute(&request, source)?;
        if reply.result == RopResult::BufferTooSmall {
            debug!(source = %source, calls = report.calls() + 1, "buffer too small");
            return Ok(TransferOutcome::BufferTooSmall { report });
        }
        if !reply.result.is_success() {
            return Ok(TransferOutcome::Failed {
                result: reply.result,
                status: None,
                report,
            });
        }
        let RopResponse::Buffer { status, data } = reply.response else {
            return Err(SyncError::UnexpectedResponse {
                rop: request.name(),
            });
        };

        report.record(status, data.len());
        debug!(
            source = %source,
            call = report.calls(),
            status = ?status,
            size = data.len(),
            "received chunk"
        );

        match status {
            TransferStatus::Error => {
                return Ok(TransferOutcome::Failed {
                    result: reply.result,
                    status: Some(status),
                    report,
                });
            }
            TransferStatus::Partial | TransferStatus::NoRoom => chunks.push(data),
            TransferStatus::Done => {
                chunks.push(data);
                break;
            }
        }
    }

    let mut data = BytesMut::with_capacity(report.total_bytes());
    for chunk in &chunks {
        data.extend_from_slice(chunk);
    }
    info!(
        source = %source,
        calls = report.calls(),
        bytes = data.len(),
        "download complete"
    );
    Ok(TransferOutcome::Complete {
        data: data.freeze(),
        report,
    })
}

/// How an upload ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Result of the last call issued.
    pub result: RopResult,
    /// Diagnostics.
    pub report: TransferReport,
}

impl UploadOutcome {
    /// Returns true if every chunk was accepted.
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

/// Splits `data` into chunks of at most `config.upload_chunk` bytes.
pub fn chunks<'a>(data: &'a [u8], config: &TransferConfig) -> impl Iterator<Item = &'a [u8]> {
    data.chunks(config.upload_chunk.max(1))
}

/// Uploads an encoded stream with put-buffer calls, stopping at the first failure.
pub fn upload<T>(
    transport: &T,
    destination: ServerHandle,
    data: &[u8],
    config: &TransferConfig,
) -> SyncResult<UploadOutcome>
where
    T: RopTransport + ?Sized,
{
    let mut report = TransferReport::new(config.upload_chunk);
    for chunk in chunks(data, config) {
        let request = RopRequest::FastTransferDestinationPutBuffer {
            data: chunk.to_vec(),
        };
        let reply = transport.execute(&request, destination)?;
        if !reply.result.is_success() {
            return Ok(UploadOutcome {
                result: reply.result,
                report,
            });
        }
        let status = match reply.response {
            RopResponse::PutBuffer { status, .. } => status,
            RopResponse::Empty => TransferStatus::Partial,
            _ => {
                return Err(SyncError::UnexpectedResponse {
                    rop: request.name(),
                })
            }
        };
        report.record(status, chunk.len());
        debug!(
            destination = %destination,
            call = report.calls(),
            size = chunk.len(),
            "sent chunk"
        );
        if status == TransferStatus::Error {
            return Ok(UploadOutcome {
                result: RopResult::GeneralFailure,
                report,
            });
        }
    }
    info!(
        destination = %destination,
        calls = report.calls(),
        bytes = report.total_bytes(),
        "upload complete"
    );
    Ok(UploadOutcome {
        result: RopResult::Success,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rop::RopReply;
    use crate::transport::{MockTransport, TransportError};

    fn chunk(status: TransferStatus, data: &[u8]) -> RopReply {
        RopReply::success(RopResponse::Buffer {
            status,
            data: data.to_vec(),
        })
    }

    #[test]
    fn continues_across_partial_and_no_room() {
        let transport = MockTransport::new();
        transport.push_reply(chunk(TransferStatus::Partial, b"ab"));
        transport.push_reply(chunk(TransferStatus::Partial, b"cd"));
        transport.push_reply(chunk(TransferStatus::NoRoom, b"e"));
        transport.push_reply(chunk(TransferStatus::Done, b"fg"));

        let config = TransferConfig::new().with_buffer_size(2);
        let outcome = download(&transport, ServerHandle(9), &config).unwrap();

        assert_eq!(transport.request_count(), 4);
        assert_eq!(outcome.data().unwrap().as_ref(), b"abcdefg");
        let report = outcome.report();
        assert!(report.saw_partial());
        assert!(report.saw_no_room());
        assert!(report.chunks_fit());
        assert_eq!(report.chunk_sizes, vec![2, 2, 1, 2]);
    }

    #[test]
    fn buffer_too_small_short_circuits() {
        let transport = MockTransport::new();
        transport.push_reply(RopReply::failure(RopResult::BufferTooSmall));
        transport.push_reply(chunk(TransferStatus::Done, b"never"));

        let outcome = download(&transport, ServerHandle(1), &TransferConfig::new()).unwrap();
        assert!(matches!(outcome, TransferOutcome::BufferTooSmall { .. }));
        assert_eq!(outcome.report().calls(), 0);
        assert_eq!(transport.request_count(), 1);
        assert!(outcome.data().is_none());
    }

    #[test]
    fn error_status_fails_without_data() {
        let transport = MockTransport::new();
        transport.push_reply(chunk(TransferStatus::Partial, b"ab"));
        transport.push_reply(chunk(TransferStatus::Error, b""));

        let outcome = download(&transport, ServerHandle(1), &TransferConfig::new()).unwrap();
        assert!(matches!(
            outcome,
            TransferOutcome::Failed {
                status: Some(TransferStatus::Error),
                ..
            }
        ));
        assert!(outcome.into_complete().is_err());
    }

    #[test]
    fn failed_result_stops_the_loop() {
        let transport = MockTransport::new();
        transport.push_reply(RopReply::failure(RopResult::AccessDenied));

        let outcome = download(&transport, ServerHandle(1), &TransferConfig::new()).unwrap();
        let err = outcome.into_complete().unwrap_err();
        assert!(matches!(
            err,
            SyncError::Protocol {
                result: RopResult::AccessDenied,
                ..
            }
        ));
    }

    #[test]
    fn oversized_chunk_is_reported() {
        let transport = MockTransport::new();
        transport.push_reply(chunk(TransferStatus::Done, b"abc"));
        let config = TransferConfig::new().with_buffer_size(2);
        let outcome = download(&transport, ServerHandle(1), &config).unwrap();
        assert!(!outcome.report().chunks_fit());
    }

    #[test]
    fn transport_error_propagates() {
        let transport = MockTransport::new();
        transport.push_reply(chunk(TransferStatus::Partial, b"ab"));
        transport.push_error(TransportError::disconnected("reset"));
        let err = download(&transport, ServerHandle(1), &TransferConfig::new()).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn upload_splits_into_chunks() {
        let transport = MockTransport::new();
        for _ in 0..3 {
            transport.push_reply(RopReply::success(RopResponse::PutBuffer {
                status: TransferStatus::Partial,
                used: 2,
            }));
        }
        let config = TransferConfig::new().with_upload_chunk(2);
        let outcome = upload(&transport, ServerHandle(4), b"abcde", &config).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.report.chunk_sizes, vec![2, 2, 1]);

        let sent: Vec<Vec<u8>> = transport
            .requests()
            .into_iter()
            .map(|(request, _)| match request {
                RopRequest::FastTransferDestinationPutBuffer { data } => data,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(sent.concat(), b"abcde");
    }

    #[test]
    fn upload_stops_at_first_failure() {
        let transport = MockTransport::new();
        transport.push_reply(RopReply::success(RopResponse::Empty));
        transport.push_reply(RopReply::failure(RopResult::InvalidParameter));
        let config = TransferConfig::new().with_upload_chunk(1);
        let outcome = upload(&transport, ServerHandle(4), b"abc", &config).unwrap();
        assert_eq!(outcome.result, RopResult::InvalidParameter);
        assert_eq!(outcome.report.calls(), 1);
        assert_eq!(transport.request_count(), 2);
    }
}
