//! Property tests for the chunked transfer loops.

use fxsync_engine::transfer::{chunks, download, upload};
use fxsync_engine::{
    MockTransport, RopReply, RopRequest, RopResponse, ServerHandle, TransferConfig,
    TransferStatus,
};
use proptest::prelude::*;

fn script(transport: &MockTransport, data: &[u8], size: usize) {
    let parts: Vec<&[u8]> = data.chunks(size).collect();
    for (i, part) in parts.iter().enumerate() {
        let status = if i + 1 == parts.len() {
            TransferStatus::Done
        } else if i % 3 == 2 {
            TransferStatus::NoRoom
        } else {
            TransferStatus::Partial
        };
        transport.push_reply(RopReply::success(RopResponse::Buffer {
            status,
            data: part.to_vec(),
        }));
    }
}

proptest! {
    #[test]
    fn download_reassembles_every_chunk(
        data in prop::collection::vec(any::<u8>(), 1..2048),
        size in 1u16..512,
    ) {
        let transport = MockTransport::new();
        script(&transport, &data, usize::from(size));
        let config = TransferConfig::new().with_buffer_size(size);

        let outcome = download(&transport, ServerHandle(3), &config).unwrap();
        prop_assert_eq!(outcome.data().unwrap().as_ref(), data.as_slice());
        prop_assert!(outcome.report().chunks_fit());
        prop_assert_eq!(transport.pending(), 0);
        prop_assert_eq!(
            outcome.report().calls(),
            data.len().div_ceil(usize::from(size))
        );
    }

    #[test]
    fn upload_sends_bounded_chunks_in_order(
        data in prop::collection::vec(any::<u8>(), 0..2048),
        size in 1usize..300,
    ) {
        let config = TransferConfig::new().with_upload_chunk(size);
        let transport = MockTransport::new();
        for _ in chunks(&data, &config) {
            transport.push_reply(RopReply::success(RopResponse::PutBuffer {
                status: TransferStatus::Partial,
                used: 0,
            }));
        }

        let outcome = upload(&transport, ServerHandle(4), &data, &config).unwrap();
        prop_assert!(outcome.is_success());
        let sent: Vec<u8> = transport
            .requests()
            .into_iter()
            .flat_map(|(request, _)| match request {
                RopRequest::FastTransferDestinationPutBuffer { data } => {
                    assert!(data.len() <= size);
                    data
                }
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        prop_assert_eq!(sent, data);
    }
}
