//! Session-level tests against a scripted transport.

use fxsync_codec::{
    encode_stream, pid, ContentsSync, MessageChange, MessageContent, OrderingPolicy, PropValue,
    PropertyList, StreamObject, SyncState,
};
use fxsync_core::{
    ConflictVerdict, CoreError, GlobalCounter, IdSet, LongTermId, PredecessorChangeList, ReplicaId,
    ShortTermId, Xid,
};
use fxsync_engine::{
    ArenaIndex, CopyToObject, FastTransferSource, Freshness, HandleId, IcsStateProperty,
    ImportFlags, ImportOutcome, MockTransport, MoveRequest, RopReply, RopRequest, RopResponse,
    RopResult, ServerHandle, SessionConfig, SyncConfig, SyncError, SyncPhase, SyncSession,
    SyncType, TransferConfig, TransferOutcome, TransferStatus, TransportError,
};

const LOGON: ServerHandle = ServerHandle(1);
const FOLDER: ServerHandle = ServerHandle(10);
const CONTEXT: ServerHandle = ServerHandle(20);
const SOURCE: ServerHandle = ServerHandle(30);

fn replica() -> ReplicaId {
    ReplicaId::from_bytes([0x5A; 16])
}

fn counter(value: u64) -> GlobalCounter {
    GlobalCounter::new(value).unwrap()
}

fn cnset(low: u64, high: u64) -> IdSet {
    let mut set = IdSet::new();
    set.insert_range(replica(), counter(low), counter(high)).unwrap();
    set
}

fn session(transport: MockTransport) -> SyncSession<MockTransport> {
    SyncSession::new(transport, LOGON, SessionConfig::new())
}

fn change(time: u64, cn: u64) -> MessageChange {
    let xid = Xid::new(replica(), counter(cn));
    MessageChange {
        progress: None,
        header: PropertyList::new()
            .with(pid::CHANGE_KEY, PropValue::ChangeKey(xid))
            .with(
                pid::PREDECESSOR_CHANGE_LIST,
                PropValue::Pcl(PredecessorChangeList::from_entries(vec![xid])),
            )
            .with(pid::LAST_MODIFICATION_TIME, PropValue::Time(time))
            .with(pid::ASSOCIATED, PropValue::Boolean(false)),
        content: MessageContent::new(
            PropertyList::new().with(pid::SUBJECT, PropValue::String(format!("m{cn}"))),
        ),
    }
}

fn contents_stream(changes: Vec<MessageChange>) -> (StreamObject, Vec<u8>) {
    let sync = ContentsSync {
        changes,
        state: SyncState {
            idset_given: Some(cnset(1, 10)),
            cnset_seen: Some(cnset(1, 12)),
            ..SyncState::default()
        },
        ..ContentsSync::default()
    };
    let object = StreamObject::ContentsSync(sync);
    let bytes = encode_stream(&object).unwrap();
    (object, bytes)
}

fn buffer(status: TransferStatus, data: &[u8]) -> RopReply {
    RopReply::success(RopResponse::Buffer {
        status,
        data: data.to_vec(),
    })
}

fn opened(handle: ServerHandle) -> RopReply {
    RopReply::success(RopResponse::Empty).with_handle(handle)
}

fn state_bytes(state: SyncState) -> Vec<u8> {
    encode_stream(&StreamObject::SyncState(state)).unwrap()
}

#[test]
fn contents_download_across_chunks() {
    let (expected, bytes) = contents_stream(vec![change(300, 3), change(200, 2)]);
    let (first, second) = bytes.split_at(bytes.len() / 2);

    let transport = MockTransport::new();
    transport.push_reply(opened(CONTEXT));
    transport.push_reply(buffer(TransferStatus::Partial, first));
    transport.push_reply(buffer(TransferStatus::Done, second));

    let mut session = session(transport);
    let folder = session.register_handle(FOLDER);
    let context = session.configure(folder, SyncConfig::contents()).unwrap();
    assert_eq!(session.phase(), SyncPhase::Configured);

    let download = session.download(context).unwrap();
    assert_eq!(download.stream, expected);
    assert_eq!(download.report.calls(), 2);
    assert_eq!(session.phase(), SyncPhase::Configured);

    let state = session.state(download.state.unwrap()).unwrap();
    assert!(state.cnset_seen.as_ref().unwrap().equals(&cnset(1, 12)));
    assert_eq!(session.buffer(download.buffer).unwrap().as_ref(), bytes.as_slice());

    let requests = session.transport().requests();
    assert!(matches!(
        requests[0],
        (RopRequest::SynchronizationConfigure { sync_type: SyncType::Contents, .. }, FOLDER)
    ));
    assert_eq!(requests[1].1, CONTEXT);
    assert_eq!(requests[2].1, CONTEXT);
}

#[test]
fn enforced_ordering_rejects_ascending_changes() {
    let (_, bytes) = contents_stream(vec![change(100, 1), change(200, 2)]);

    let transport = MockTransport::new();
    transport.push_reply(opened(CONTEXT));
    transport.push_reply(buffer(TransferStatus::Done, &bytes));

    let mut session = session(transport);
    let folder = session.register_handle(FOLDER);
    let config = SyncConfig::contents().with_ordering_policy(OrderingPolicy::Enforced);
    let context = session.configure(folder, config).unwrap();

    let err = session.download(context).unwrap_err();
    assert!(matches!(err, SyncError::Codec(_)));
    assert!(!err.is_remote());
    assert_eq!(session.phase(), SyncPhase::Configured);
}

#[test]
fn unenforced_ordering_accepts_ascending_changes() {
    let (expected, bytes) = contents_stream(vec![change(100, 1), change(200, 2)]);

    let transport = MockTransport::new();
    transport.push_reply(opened(CONTEXT));
    transport.push_reply(buffer(TransferStatus::Done, &bytes));

    let mut session = session(transport);
    let folder = session.register_handle(FOLDER);
    let context = session.configure(folder, SyncConfig::contents()).unwrap();
    assert_eq!(session.download(context).unwrap().stream, expected);
}

#[test]
fn buffer_too_small_returns_without_assembling() {
    let transport = MockTransport::new();
    transport.push_reply(opened(SOURCE));
    transport.push_reply(RopReply::failure(RopResult::BufferTooSmall));

    let mut session = session(transport);
    let message = session.register_handle(FOLDER);
    let source = session
        .fast_transfer_source(
            message,
            &FastTransferSource::CopyTo {
                object: CopyToObject::Message,
                level: false,
                excluded: vec![],
            },
        )
        .unwrap();

    let transfer = TransferConfig::new().with_buffer_size(16);
    let (outcome, buffer) = session.download_buffer(source, &transfer).unwrap();
    assert!(matches!(outcome, TransferOutcome::BufferTooSmall { .. }));
    assert!(buffer.is_none());
    assert_eq!(session.transport().request_count(), 2);
    assert_eq!(session.phase(), SyncPhase::Idle);
}

#[test]
fn transport_failure_terminates_the_context() {
    let (_, bytes) = contents_stream(vec![]);

    let transport = MockTransport::new();
    transport.push_reply(opened(CONTEXT));
    transport.push_reply(buffer(TransferStatus::Partial, &bytes[..4]));
    transport.push_error(TransportError::disconnected("connection reset"));

    let mut session = session(transport);
    let folder = session.register_handle(FOLDER);
    let context = session.configure(folder, SyncConfig::contents()).unwrap();

    let err = session.download(context).unwrap_err();
    assert!(err.is_transport());
    assert!(!err.is_retryable());
    assert_eq!(session.phase(), SyncPhase::Idle);
    assert!(matches!(
        session.server_handle(context),
        Err(SyncError::InvalidHandle { kind: "handle", .. })
    ));
    assert_eq!(session.server_handle(folder).unwrap(), FOLDER);
}

#[test]
fn unknown_and_mismatched_handles_fail_locally() {
    let mut session = session(MockTransport::new());
    let err = session.download(HandleId::from_raw(42)).unwrap_err();
    assert_eq!(err.to_string(), "invalid handle index 42");

    let folder = session.register_handle(FOLDER);
    let err = session.download(folder).unwrap_err();
    assert!(matches!(err, SyncError::WrongHandleKind { kind: "object", .. }));

    let err = session
        .import_message_change(folder, ImportFlags::default(), PropertyList::new())
        .unwrap_err();
    assert!(matches!(err, SyncError::WrongHandleKind { .. }));
    assert_eq!(session.transport().request_count(), 0);
}

#[test]
fn server_failure_is_a_protocol_error() {
    let transport = MockTransport::new();
    transport.push_reply(RopReply::failure(RopResult::AccessDenied));

    let mut session = session(transport);
    let folder = session.register_handle(FOLDER);
    let err = session.configure(folder, SyncConfig::hierarchy()).unwrap_err();
    assert!(err.is_remote());
    assert!(matches!(
        err,
        SyncError::Protocol {
            rop: "SynchronizationConfigure",
            result: RopResult::AccessDenied
        }
    ));
    assert_eq!(session.phase(), SyncPhase::Idle);
}

#[test]
fn transfer_state_classifies_new_and_known_sets() {
    let first = SyncState {
        idset_given: Some(cnset(1, 5)),
        cnset_seen: Some(cnset(1, 7)),
        ..SyncState::default()
    };
    let second = SyncState {
        idset_given: Some(cnset(1, 5)),
        cnset_seen: Some(cnset(1, 9)),
        ..SyncState::default()
    };

    let transport = MockTransport::new();
    transport.push_reply(opened(CONTEXT));
    for state in [&first, &first, &second] {
        transport.push_reply(opened(SOURCE));
        transport.push_reply(buffer(TransferStatus::Done, &state_bytes(state.clone())));
    }

    let mut session = session(transport);
    let folder = session.register_handle(FOLDER);
    let collector = session.open_collector(folder, SyncType::Contents).unwrap();

    let a = session.get_transfer_state(collector).unwrap();
    assert_eq!(a.freshness.idset_given, Freshness::New);
    assert_eq!(a.freshness.cnset_seen, Freshness::New);
    assert_eq!(a.freshness.cnset_read, Freshness::Absent);

    let b = session.get_transfer_state(collector).unwrap();
    assert_ne!(a.index, b.index);
    assert_eq!(b.freshness.idset_given, Freshness::Known);
    assert_eq!(b.freshness.cnset_seen, Freshness::Known);
    assert!(!b.freshness.has_new());

    let c = session.get_transfer_state(collector).unwrap();
    assert_eq!(c.freshness.get(IcsStateProperty::IdsetGiven), Freshness::Known);
    assert_eq!(c.freshness.get(IcsStateProperty::CnsetSeen), Freshness::New);
    assert_eq!(session.phase(), SyncPhase::Collecting);
}

#[test]
fn state_upload_is_chunked_between_begin_and_end() {
    let state = SyncState {
        cnset_seen: Some(cnset(1, 40)),
        ..SyncState::default()
    };
    let encoded = cnset(1, 40).encode();

    let transport = MockTransport::new();
    transport.push_reply(opened(CONTEXT));
    transport.push_reply(opened(SOURCE));
    transport.push_reply(buffer(TransferStatus::Done, &state_bytes(state)));
    let chunk_count = encoded.chunks(8).count();
    for _ in 0..chunk_count + 2 {
        transport.push_reply(RopReply::success(RopResponse::Empty));
    }

    let config = SessionConfig::new().with_transfer(TransferConfig::new().with_upload_chunk(8));
    let mut session = SyncSession::new(transport, LOGON, config);
    let folder = session.register_handle(FOLDER);
    let collector = session.open_collector(folder, SyncType::Contents).unwrap();
    let cached = session.get_transfer_state(collector).unwrap();

    let outcome = session
        .upload_state(collector, cached.index, IcsStateProperty::CnsetSeen)
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.report.chunk_sizes.len(), chunk_count);

    let requests = session.transport().requests();
    let upload = &requests[3..];
    assert_eq!(
        upload[0].0,
        RopRequest::SynchronizationUploadStateStreamBegin {
            property: pid::CNSET_SEEN,
            size: encoded.len() as u32,
        }
    );
    let uploaded: Vec<u8> = upload[1..=chunk_count]
        .iter()
        .flat_map(|(request, _)| match request {
            RopRequest::SynchronizationUploadStateStreamContinue { data } => data.clone(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(uploaded, encoded);
    assert_eq!(upload[chunk_count + 1].0, RopRequest::SynchronizationUploadStateStreamEnd);
    assert!(upload.iter().all(|(_, handle)| *handle == CONTEXT));
}

#[test]
fn import_change_requires_identification_properties() {
    let transport = MockTransport::new();
    transport.push_reply(opened(CONTEXT));

    let mut session = session(transport);
    let folder = session.register_handle(FOLDER);
    let collector = session.open_collector(folder, SyncType::Contents).unwrap();

    let xid = Xid::new(replica(), counter(5));
    let incomplete = PropertyList::new()
        .with(pid::SOURCE_KEY, PropValue::LongTermId(LongTermId::new(replica(), counter(2))))
        .with(pid::LAST_MODIFICATION_TIME, PropValue::Time(1))
        .with(pid::CHANGE_KEY, PropValue::ChangeKey(xid));
    let err = session
        .import_message_change(collector, ImportFlags::default(), incomplete)
        .unwrap_err();
    assert!(matches!(err, SyncError::LocalValidation(_)));
    assert_eq!(session.transport().request_count(), 1);
}

#[test]
fn import_change_reports_newer_server_version() {
    let transport = MockTransport::new();
    transport.push_reply(opened(CONTEXT));
    transport.push_reply(RopReply::failure(RopResult::NewerClientChange));

    let mut session = session(transport);
    let folder = session.register_handle(FOLDER);
    let collector = session.open_collector(folder, SyncType::Contents).unwrap();

    let xid = Xid::new(replica(), counter(5));
    let properties = PropertyList::new()
        .with(pid::SOURCE_KEY, PropValue::LongTermId(LongTermId::new(replica(), counter(2))))
        .with(pid::LAST_MODIFICATION_TIME, PropValue::Time(1))
        .with(pid::CHANGE_KEY, PropValue::ChangeKey(xid))
        .with(
            pid::PREDECESSOR_CHANGE_LIST,
            PropValue::Pcl(PredecessorChangeList::from_entries(vec![xid])),
        );
    let outcome = session
        .import_message_change(collector, ImportFlags::default(), properties)
        .unwrap();
    assert_eq!(outcome, ImportOutcome::NewerClientChange);
    assert_eq!(session.phase(), SyncPhase::Collecting);
}

struct MoveFixture {
    session: SyncSession<MockTransport>,
    collector: HandleId,
    request: MoveRequest,
}

const SERVER_CN: u64 = 0x100;
const LOCAL_START: u64 = 0x9000;

fn move_fixture(newer: bool, result: RopResult) -> MoveFixture {
    let message_handle = ServerHandle(40);
    let folder_id = ShortTermId::new(1, counter(0x10));
    let message_id = ShortTermId::new(1, counter(0x20));
    let destination_id = ShortTermId::new(1, counter(LOCAL_START));

    let transport = MockTransport::new();
    transport.push_reply(opened(CONTEXT));
    transport.push_reply(RopReply::success(RopResponse::LocalReplicaIds {
        replica: replica(),
        start: counter(LOCAL_START),
    }));
    transport.push_reply(opened(message_handle));
    transport.push_reply(RopReply::success(RopResponse::Properties(
        PropertyList::new().with(
            pid::CHANGE_KEY,
            PropValue::ChangeKey(Xid::new(replica(), counter(SERVER_CN))),
        ),
    )));
    transport.push_reply(RopReply::success(RopResponse::Empty));
    transport.push_reply(RopReply::success(RopResponse::LongTermId(LongTermId::new(
        replica(),
        counter(0x10),
    ))));
    transport.push_reply(RopReply::success(RopResponse::LongTermId(LongTermId::new(
        replica(),
        counter(0x20),
    ))));
    transport.push_reply(RopReply::failure(result));
    transport.push_reply(RopReply::success(RopResponse::ShortTermId(destination_id)));

    let mut session = session(transport);
    let target = session.register_handle(ServerHandle(11));
    let source_folder_handle = session.register_handle(FOLDER);
    let collector = session.open_collector(target, SyncType::Contents).unwrap();
    session.allocate_counters(4).unwrap();

    let request = MoveRequest {
        source_folder: session.register_object(folder_id),
        source_folder_handle,
        source_message: session.register_object(message_id),
        newer_client_change: newer,
    };
    MoveFixture {
        session,
        collector,
        request,
    }
}

#[test]
fn newer_move_is_applied() {
    let mut fixture = move_fixture(true, RopResult::Success);
    let outcome = fixture
        .session
        .import_message_move(fixture.collector, fixture.request)
        .unwrap();

    assert_eq!(outcome.verdict, ConflictVerdict::AIncludesB);
    assert_eq!(outcome.change_key.counter, counter(SERVER_CN + 1));
    assert_eq!(outcome.destination, LongTermId::new(replica(), counter(LOCAL_START)));
    let ImportOutcome::Applied { object: Some(object), .. } = outcome.outcome else {
        panic!("expected an applied move, got {:?}", outcome.outcome);
    };
    assert_eq!(
        fixture.session.object(object).unwrap(),
        ShortTermId::new(1, counter(LOCAL_START))
    );

    let requests = fixture.session.transport().requests();
    let RopRequest::SynchronizationImportMessageMove(sent) = &requests[7].0 else {
        panic!("expected the move request, got {:?}", requests[7].0);
    };
    assert_eq!(sent.change_key, outcome.change_key);
    assert_eq!(sent.pcl.change_key(), Some(&outcome.change_key));
    assert_eq!(sent.source_message, LongTermId::new(replica(), counter(0x20)));
    assert_eq!(requests[7].1, CONTEXT);
}

#[test]
fn older_move_reports_newer_client_change() {
    let mut fixture = move_fixture(false, RopResult::NewerClientChange);
    let outcome = fixture
        .session
        .import_message_move(fixture.collector, fixture.request)
        .unwrap();

    assert_eq!(outcome.verdict, ConflictVerdict::BIncludesA);
    assert_eq!(outcome.change_key.counter, counter(SERVER_CN - 1));
    assert_eq!(outcome.outcome, ImportOutcome::NewerClientChange);
    assert_eq!(fixture.session.transport().pending(), 1);
}

#[test]
fn move_without_local_range_fails() {
    let transport = MockTransport::new();
    transport.push_reply(opened(CONTEXT));
    transport.push_reply(opened(ServerHandle(40)));
    transport.push_reply(RopReply::success(RopResponse::Properties(
        PropertyList::new().with(
            pid::CHANGE_KEY,
            PropValue::ChangeKey(Xid::new(replica(), counter(SERVER_CN))),
        ),
    )));
    transport.push_reply(RopReply::success(RopResponse::Empty));

    let mut session = session(transport);
    let folder = session.register_handle(FOLDER);
    let collector = session.open_collector(folder, SyncType::Contents).unwrap();
    let request = MoveRequest {
        source_folder: session.register_object(ShortTermId::new(1, counter(1))),
        source_folder_handle: folder,
        source_message: session.register_object(ShortTermId::new(1, counter(2))),
        newer_client_change: true,
    };
    let err = session.import_message_move(collector, request).unwrap_err();
    assert!(matches!(err, SyncError::ExhaustedLocalRange));
}

#[test]
fn identifiers_are_cached_after_first_lookup() {
    let id = ShortTermId::new(1, counter(0x33));
    let long_term = LongTermId::new(replica(), counter(0x33));

    let transport = MockTransport::new();
    transport.push_reply(RopReply::success(RopResponse::LongTermId(long_term)));

    let mut session = session(transport);
    assert_eq!(session.to_long_term(id).unwrap(), long_term);
    assert_eq!(session.to_long_term(id).unwrap(), long_term);
    assert_eq!(session.to_short_term(&long_term).unwrap(), id);
    assert_eq!(session.transport().request_count(), 1);
    assert_eq!(session.transport().requests()[0].1, LOGON);
}

#[test]
fn server_cannot_remap_a_replica_index() {
    let other = ReplicaId::from_bytes([0x6B; 16]);
    let transport = MockTransport::new();
    transport.push_reply(RopReply::success(RopResponse::LongTermId(LongTermId::new(
        replica(),
        counter(0x33),
    ))));
    transport.push_reply(RopReply::success(RopResponse::LongTermId(LongTermId::new(
        other,
        counter(0x34),
    ))));

    let mut session = session(transport);
    session.to_long_term(ShortTermId::new(1, counter(0x33))).unwrap();
    let err = session.to_long_term(ShortTermId::new(1, counter(0x34))).unwrap_err();
    assert!(
        matches!(err, SyncError::Core(CoreError::ReplicaConflict { index: 1, .. })),
        "got {err:?}"
    );
    assert!(!err.is_remote());
    assert_eq!(session.identifiers().len(), 1);
}

#[test]
fn unknown_identifier_is_a_protocol_error() {
    let transport = MockTransport::new();
    transport.push_reply(RopReply::failure(RopResult::NotFound));

    let mut session = session(transport);
    let err = session.to_long_term(ShortTermId::from_raw(0xDEAD)).unwrap_err();
    assert!(matches!(err, SyncError::Protocol { result: RopResult::NotFound, .. }));
}

#[test]
fn identical_downloads_compare_equal() {
    let (_, bytes) = contents_stream(vec![change(10, 1)]);

    let transport = MockTransport::new();
    for _ in 0..2 {
        transport.push_reply(opened(SOURCE));
        transport.push_reply(buffer(TransferStatus::Partial, &bytes[..8]));
        transport.push_reply(buffer(TransferStatus::Done, &bytes[8..]));
    }

    let mut session = session(transport);
    let folder = session.register_handle(FOLDER);
    let source = FastTransferSource::CopyFolder {
        move_subfolders: false,
    };
    let transfer = TransferConfig::new();
    let first = session.fast_transfer_source(folder, &source).unwrap();
    let (_, a) = session.download_buffer(first, &transfer).unwrap();
    let second = session.fast_transfer_source(folder, &source).unwrap();
    let (_, b) = session.download_buffer(second, &transfer).unwrap();
    assert!(session.buffers_equal(a.unwrap(), b.unwrap()).unwrap());
}

#[test]
fn release_and_reset_invalidate_handles() {
    let transport = MockTransport::new();
    transport.push_reply(opened(CONTEXT));
    transport.push_reply(RopReply::success(RopResponse::Empty));

    let mut session = session(transport);
    let folder = session.register_handle(FOLDER);
    let context = session.configure(folder, SyncConfig::contents()).unwrap();
    session.release(context).unwrap();
    assert_eq!(session.phase(), SyncPhase::Idle);
    assert!(session.server_handle(context).is_err());
    assert_eq!(session.transport().requests()[1], (RopRequest::Release, CONTEXT));

    let object = session.register_object(ShortTermId::from_raw(7));
    session.reset();
    assert!(session.server_handle(folder).is_err());
    assert!(session.object(object).is_err());
    let fresh = session.register_handle(FOLDER);
    assert_ne!(fresh, folder);
}
