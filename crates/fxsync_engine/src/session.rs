//! The synchronization session.
//!
//! One [`SyncSession`] drives one server identity. It owns every
//! session-scoped table (handles, object ids, cached states, raw downloads,
//! identifier mappings) and runs at most one synchronization context at a
//! time. All operations take `&mut self`; two sessions share nothing and
//! may run on different threads.

use crate::arena::{Arena, BufferId, HandleId, ObjectId, StateIndex};
use crate::config::{SendOptions, SessionConfig, SyncConfig, SyncType, TransferConfig};
use crate::error::{SyncError, SyncResult};
use crate::rop::{
    DeleteFlags, IcsStateProperty, ImportFlags, MessageMove, ReadStateChange, RopReply,
    RopRequest, RopResponse, RopResult, ServerHandle, SourceOperation,
};
use crate::transfer::{self, TransferOutcome, TransferReport, UploadOutcome};
use crate::transport::RopTransport;
use bytes::Bytes;
use fxsync_codec::{
    decode_stream, encode_stream, pid, verify_contents_order, verify_hierarchy_order,
    verify_parent_order, HierarchySync, PropValue, PropertyList, PropertyTag, StreamObject,
    StreamType, SyncState,
};
use fxsync_core::{
    ConflictVerdict, GlobalCounter, IdSet, IdentifierTable, LocalCounterRange, LongTermId,
    PredecessorChangeList, ReplicaId, ShortTermId, Xid,
};
use std::fmt;
use tracing::{debug, info, warn};

/// Phase of the session's synchronization context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    /// No context is active.
    Idle,
    /// A download context was configured.
    Configured,
    /// An upload context (collector) is open.
    Collecting,
    /// A transfer loop is pulling chunks.
    Downloading,
    /// Chunks or deltas are being pushed.
    Uploading,
}

impl SyncPhase {
    /// Returns true while a transfer is running.
    pub fn is_transferring(&self) -> bool {
        matches!(self, SyncPhase::Downloading | SyncPhase::Uploading)
    }

    /// Returns true if the session may move to `next`.
    pub fn can_transition_to(&self, next: SyncPhase) -> bool {
        use SyncPhase::*;
        matches!(
            (self, next),
            (Idle, Configured)
                | (Idle | Configured, Collecting)
                | (Idle | Configured | Collecting, Downloading | Uploading)
                | (Downloading | Uploading, Idle | Configured | Collecting)
                | (Configured | Collecting, Idle)
        )
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a registered handle refers to.
#[derive(Debug, Clone, PartialEq)]
enum HandleKind {
    /// A logon, folder, message or attachment opened by the caller.
    Object,
    /// A download context.
    Download(SyncConfig),
    /// An upload context.
    Collector(SyncType),
    /// A fast-transfer source producing a stream of this type.
    Source(StreamType),
    /// A fast-transfer destination.
    Destination(SourceOperation),
}

impl HandleKind {
    fn name(&self) -> &'static str {
        match self {
            HandleKind::Object => "object",
            HandleKind::Download(_) => "download context",
            HandleKind::Collector(_) => "upload context",
            HandleKind::Source(_) => "fast-transfer source",
            HandleKind::Destination(_) => "fast-transfer destination",
        }
    }
}

#[derive(Debug, Clone)]
struct HandleEntry {
    server: ServerHandle,
    kind: HandleKind,
}

/// The kind of object a CopyTo source reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyToObject {
    /// A folder; produces folder content.
    Folder,
    /// A message; produces message content.
    Message,
    /// An attachment; produces attachment content.
    Attachment,
}

/// A fast-transfer download that is not part of a synchronization context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastTransferSource {
    /// A whole folder, as a top-folder stream.
    CopyFolder {
        /// Include subfolders.
        move_subfolders: bool,
    },
    /// Properties of one object.
    CopyTo {
        /// Kind of the object behind the handle.
        object: CopyToObject,
        /// Skip sub-objects.
        level: bool,
        /// Tags left out.
        excluded: Vec<PropertyTag>,
    },
    /// A list of messages, as a message-list stream.
    CopyMessages {
        /// The messages.
        messages: Vec<ObjectId>,
    },
}

impl FastTransferSource {
    /// Stream type the source produces.
    pub fn stream_type(&self) -> StreamType {
        match self {
            FastTransferSource::CopyFolder { .. } => StreamType::TopFolder,
            FastTransferSource::CopyTo { object, .. } => match object {
                CopyToObject::Folder => StreamType::FolderContent,
                CopyToObject::Message => StreamType::MessageContent,
                CopyToObject::Attachment => StreamType::AttachmentContent,
            },
            FastTransferSource::CopyMessages { .. } => StreamType::MessageList,
        }
    }
}

/// A decoded download.
#[derive(Debug, Clone, PartialEq)]
pub struct Download {
    /// The raw stream, kept for [`SyncSession::buffers_equal`].
    pub buffer: BufferId,
    /// The decoded stream.
    pub stream: StreamObject,
    /// Cached final state, for synchronization downloads.
    pub state: Option<StateIndex>,
    /// Transfer diagnostics.
    pub report: TransferReport,
}

/// Whether a downloaded checkpoint set was seen before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The state did not carry the set.
    Absent,
    /// The set differs from every cached set of the same kind.
    New,
    /// An equal set of the same kind is already cached.
    Known,
}

/// Freshness of each checkpoint set of a downloaded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateFreshness {
    /// IdsetGiven.
    pub idset_given: Freshness,
    /// CnsetSeen.
    pub cnset_seen: Freshness,
    /// CnsetSeenFAI.
    pub cnset_seen_fai: Freshness,
    /// CnsetRead.
    pub cnset_read: Freshness,
}

impl StateFreshness {
    /// Freshness of one property.
    pub fn get(&self, property: IcsStateProperty) -> Freshness {
        match property {
            IcsStateProperty::IdsetGiven => self.idset_given,
            IcsStateProperty::CnsetSeen => self.cnset_seen,
            IcsStateProperty::CnsetSeenFai => self.cnset_seen_fai,
            IcsStateProperty::CnsetRead => self.cnset_read,
        }
    }

    /// Returns true if any set is new.
    pub fn has_new(&self) -> bool {
        IcsStateProperty::ALL
            .iter()
            .any(|property| self.get(*property) == Freshness::New)
    }
}

/// A checkpoint downloaded with GetTransferState.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferState {
    /// Where the state is cached.
    pub index: StateIndex,
    /// New-versus-known classification against earlier states.
    pub freshness: StateFreshness,
    /// Transfer diagnostics.
    pub report: TransferReport,
}

/// Outcome of an import operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The server accepted the delta.
    Applied {
        /// Object id the server assigned, if any.
        object: Option<ObjectId>,
        /// Handle the server opened, if any.
        handle: Option<HandleId>,
    },
    /// The server already holds a newer version.
    NewerClientChange,
}

impl ImportOutcome {
    /// Returns true if the server accepted the delta.
    pub fn is_applied(&self) -> bool {
        matches!(self, ImportOutcome::Applied { .. })
    }
}

/// Parameters of [`SyncSession::import_message_move`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRequest {
    /// Folder the message currently lives in.
    pub source_folder: ObjectId,
    /// Open handle on the source folder.
    pub source_folder_handle: HandleId,
    /// The message to move.
    pub source_message: ObjectId,
    /// Mint a change key newer than the server's; older otherwise.
    pub newer_client_change: bool,
}

/// Result of [`SyncSession::import_message_move`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    /// What the server did.
    pub outcome: ImportOutcome,
    /// The local PCL compared with the server's change key.
    pub verdict: ConflictVerdict,
    /// Change key the server reported for the source message.
    pub server_change_key: Xid,
    /// Change key sent with the move.
    pub change_key: Xid,
    /// Id minted for the moved message.
    pub destination: LongTermId,
}

/// Result of [`SyncSession::import_hierarchy_conflict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyImport {
    /// What the server did.
    pub outcome: ImportOutcome,
    /// The imported PCL compared with the server's.
    pub verdict: ConflictVerdict,
    /// Source key of the imported folder.
    pub source_key: LongTermId,
    /// History the folder should carry once the server resolved the change.
    pub expected: PredecessorChangeList,
}

impl HierarchyImport {
    /// Checks the folder's PCL in a later hierarchy download.
    ///
    /// The folder is looked up by source key, falling back to the last
    /// folder change that carries a PCL. Returns `None` if no folder change
    /// carries one.
    pub fn resolution(&self, sync: &HierarchySync) -> Option<ConflictResolution> {
        let by_key = sync.folders.iter().find(|folder| {
            folder.get(pid::SOURCE_KEY).and_then(PropValue::as_long_term_id)
                == Some(&self.source_key)
        });
        let server = by_key
            .and_then(folder_pcl)
            .or_else(|| sync.folders.iter().rev().find_map(folder_pcl))?
            .clone();
        let verdict = server.compare(&self.expected);
        Some(ConflictResolution { server, verdict })
    }
}

/// A folder's PCL as downloaded after a conflicting import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictResolution {
    /// The PCL the server reported.
    pub server: PredecessorChangeList,
    /// `server` compared with [`HierarchyImport::expected`].
    pub verdict: ConflictVerdict,
}

impl ConflictResolution {
    /// Returns true if the server holds exactly the merged history.
    pub fn is_expected(&self) -> bool {
        self.verdict == ConflictVerdict::Equal
    }
}

/// Drives synchronization against one server identity.
pub struct SyncSession<T: RopTransport> {
    transport: T,
    config: SessionConfig,
    logon: ServerHandle,
    phase: SyncPhase,
    handles: Arena<HandleId, HandleEntry>,
    context_handles: Vec<HandleId>,
    objects: Arena<ObjectId, ShortTermId>,
    states: Arena<StateIndex, SyncState>,
    buffers: Arena<BufferId, Bytes>,
    ids: IdentifierTable,
    local_range: Option<LocalCounterRange>,
}

impl<T: RopTransport> SyncSession<T> {
    /// Creates a session on an established logon.
    pub fn new(transport: T, logon: ServerHandle, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            logon,
            phase: SyncPhase::Idle,
            handles: Arena::new(),
            context_handles: Vec::new(),
            objects: Arena::new(),
            states: Arena::new(),
            buffers: Arena::new(),
            ids: IdentifierTable::new(),
            local_range: None,
        }
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Identifier mappings learned so far.
    pub fn identifiers(&self) -> &IdentifierTable {
        &self.ids
    }

    /// Registers a server handle opened by the caller (folder, message, ...).
    pub fn register_handle(&mut self, server: ServerHandle) -> HandleId {
        self.handles.insert(HandleEntry {
            server,
            kind: HandleKind::Object,
        })
    }

    /// Server handle behind a registered handle.
    pub fn server_handle(&self, handle: HandleId) -> SyncResult<ServerHandle> {
        Ok(self.handles.get(handle)?.server)
    }

    /// Registers a short-term id and returns its object id.
    pub fn register_object(&mut self, id: ShortTermId) -> ObjectId {
        self.objects.insert(id)
    }

    /// Short-term id behind an object id.
    pub fn object(&self, object: ObjectId) -> SyncResult<ShortTermId> {
        Ok(*self.objects.get(object)?)
    }

    /// A cached synchronization state.
    pub fn state(&self, index: StateIndex) -> SyncResult<&SyncState> {
        self.states.get(index)
    }

    /// A completed raw download.
    pub fn buffer(&self, buffer: BufferId) -> SyncResult<&Bytes> {
        self.buffers.get(buffer)
    }

    // Context setup

    /// Creates a download context on `folder`.
    pub fn configure(&mut self, folder: HandleId, config: SyncConfig) -> SyncResult<HandleId> {
        self.require_transition(SyncPhase::Configured)?;
        let server = self.object_handle(folder, "SynchronizationConfigure")?;
        let request = RopRequest::configure(&config);
        let reply = self.expect_success(&request, server)?;
        let context = self.adopt_handle(&request, &reply, HandleKind::Download(config))?;
        self.phase = SyncPhase::Configured;
        info!(folder = %folder, context = %context, "configured download context");
        Ok(context)
    }

    /// Opens an upload context on `folder`.
    pub fn open_collector(
        &mut self,
        folder: HandleId,
        sync_type: SyncType,
    ) -> SyncResult<HandleId> {
        self.require_transition(SyncPhase::Collecting)?;
        let server = self.object_handle(folder, "SynchronizationOpenCollector")?;
        let request = RopRequest::SynchronizationOpenCollector { sync_type };
        let reply = self.expect_success(&request, server)?;
        let collector = self.adopt_handle(&request, &reply, HandleKind::Collector(sync_type))?;
        self.phase = SyncPhase::Collecting;
        info!(folder = %folder, collector = %collector, %sync_type, "opened collector");
        Ok(collector)
    }

    // Downloads

    /// Downloads and decodes a configured context.
    ///
    /// The change stream is checked against the context's ordering policy
    /// and its final state is cached.
    pub fn download(&mut self, context: HandleId) -> SyncResult<Download> {
        let entry = self.handles.get(context)?.clone();
        let HandleKind::Download(config) = entry.kind else {
            return Err(Self::wrong_kind(context, &entry.kind, "download"));
        };
        let kind = match config.sync_type {
            SyncType::Contents => StreamType::ContentsSync,
            SyncType::Hierarchy => StreamType::HierarchySync,
        };
        let transfer = self.config.transfer;
        let (data, report) = self.run_download(entry.server, &transfer)?.into_complete()?;
        let stream = decode_stream(&data, kind)?;

        let policy = config.ordering_policy();
        let state = match &stream {
            StreamObject::ContentsSync(sync) => {
                verify_contents_order(sync, policy)?;
                sync.state.clone()
            }
            StreamObject::HierarchySync(sync) => {
                verify_hierarchy_order(sync, policy)?;
                if self.config.verify_parent_order {
                    verify_parent_order(sync)?;
                }
                sync.state.clone()
            }
            _ => {
                return Err(SyncError::UnexpectedResponse {
                    rop: "FastTransferSourceGetBuffer",
                })
            }
        };

        let buffer = self.buffers.insert(data);
        let state = self.states.insert(state);
        debug!(context = %context, %buffer, %state, "decoded synchronization download");
        Ok(Download {
            buffer,
            stream,
            state: Some(state),
            report,
        })
    }

    /// Downloads the checkpoint state of a download or upload context.
    ///
    /// Each checkpoint set is classified as new or already known by
    /// comparing it with the sets of earlier cached states.
    pub fn get_transfer_state(&mut self, context: HandleId) -> SyncResult<TransferState> {
        let entry = self.handles.get(context)?.clone();
        if !matches!(entry.kind, HandleKind::Download(_) | HandleKind::Collector(_)) {
            return Err(Self::wrong_kind(context, &entry.kind, "get transfer state"));
        }
        let request = RopRequest::SynchronizationGetTransferState;
        let reply = self.expect_success(&request, entry.server)?;
        let source = self.adopt_handle(&request, &reply, HandleKind::Source(StreamType::State))?;
        let server = self.handles.get(source)?.server;

        let transfer = self.config.transfer;
        let (data, report) = self.run_download(server, &transfer)?.into_complete()?;
        let StreamObject::SyncState(state) = decode_stream(&data, StreamType::State)? else {
            return Err(SyncError::UnexpectedResponse {
                rop: "SynchronizationGetTransferState",
            });
        };

        let freshness = self.classify(&state);
        let index = self.states.insert(state);
        debug!(context = %context, state = %index, ?freshness, "cached transfer state");
        Ok(TransferState {
            index,
            freshness,
            report,
        })
    }

    /// Creates a fast-transfer source on `object`.
    pub fn fast_transfer_source(
        &mut self,
        object: HandleId,
        source: &FastTransferSource,
    ) -> SyncResult<HandleId> {
        let request = match source {
            FastTransferSource::CopyFolder { move_subfolders } => {
                RopRequest::FastTransferSourceCopyFolder {
                    move_subfolders: *move_subfolders,
                    send_options: SendOptions::UNICODE,
                }
            }
            FastTransferSource::CopyTo {
                level, excluded, ..
            } => RopRequest::FastTransferSourceCopyTo {
                level: *level,
                send_options: SendOptions::UNICODE,
                excluded: excluded.clone(),
            },
            FastTransferSource::CopyMessages { messages } => {
                RopRequest::FastTransferSourceCopyMessages {
                    messages: messages
                        .iter()
                        .map(|message| self.object(*message))
                        .collect::<SyncResult<_>>()?,
                    send_options: SendOptions::UNICODE,
                }
            }
        };
        let server = self.object_handle(object, request.name())?;
        let reply = self.expect_success(&request, server)?;
        self.adopt_handle(&request, &reply, HandleKind::Source(source.stream_type()))
    }

    /// Runs the transfer loop on a fast-transfer source without decoding.
    ///
    /// A completed transfer is kept so it can be compared later.
    pub fn download_buffer(
        &mut self,
        source: HandleId,
        transfer: &TransferConfig,
    ) -> SyncResult<(TransferOutcome, Option<BufferId>)> {
        let entry = self.handles.get(source)?.clone();
        if !matches!(entry.kind, HandleKind::Source(_) | HandleKind::Download(_)) {
            return Err(Self::wrong_kind(source, &entry.kind, "get buffer"));
        }
        let outcome = self.run_download(entry.server, transfer)?;
        let buffer = outcome.data().map(|data| self.buffers.insert(data.clone()));
        Ok((outcome, buffer))
    }

    /// Copies an object with a fast-transfer source and decodes the stream.
    pub fn fast_transfer_download(
        &mut self,
        object: HandleId,
        source: FastTransferSource,
    ) -> SyncResult<Download> {
        let handle = self.fast_transfer_source(object, &source)?;
        let transfer = self.config.transfer;
        let (outcome, buffer) = self.download_buffer(handle, &transfer)?;
        let (data, report) = outcome.into_complete()?;
        let buffer = buffer.ok_or(SyncError::UnexpectedResponse {
            rop: "FastTransferSourceGetBuffer",
        })?;
        let stream = decode_stream(&data, source.stream_type())?;
        Ok(Download {
            buffer,
            stream,
            state: None,
            report,
        })
    }

    /// Compares two completed downloads byte for byte.
    pub fn buffers_equal(&self, a: BufferId, b: BufferId) -> SyncResult<bool> {
        Ok(self.buffers.get(a)? == self.buffers.get(b)?)
    }

    // Uploads

    /// Uploads one checkpoint set of a cached state to a context.
    ///
    /// A set missing from the state is uploaded empty.
    pub fn upload_state(
        &mut self,
        context: HandleId,
        state: StateIndex,
        property: IcsStateProperty,
    ) -> SyncResult<UploadOutcome> {
        let entry = self.handles.get(context)?.clone();
        if !matches!(entry.kind, HandleKind::Download(_) | HandleKind::Collector(_)) {
            return Err(Self::wrong_kind(context, &entry.kind, "upload state"));
        }
        let cached = self.states.get(state)?;
        let set = match property {
            IcsStateProperty::IdsetGiven => cached.idset_given.as_ref(),
            IcsStateProperty::CnsetSeen => cached.cnset_seen.as_ref(),
            IcsStateProperty::CnsetSeenFai => cached.cnset_seen_fai.as_ref(),
            IcsStateProperty::CnsetRead => cached.cnset_read.as_ref(),
        };
        let data = set.map(IdSet::encode).unwrap_or_default();
        let size = u32::try_from(data.len())
            .map_err(|_| SyncError::local("checkpoint set larger than 4 GiB"))?;

        let resume = self.enter(SyncPhase::Uploading)?;
        let transfer = self.config.transfer;
        let outcome = self.upload_state_stream(entry.server, property, size, &data, &transfer);
        self.leave(resume, &outcome);
        outcome
    }

    /// Encodes a stream and uploads it to a new fast-transfer destination on `object`.
    pub fn put_stream(
        &mut self,
        object: HandleId,
        operation: SourceOperation,
        stream: &StreamObject,
    ) -> SyncResult<UploadOutcome> {
        let data = encode_stream(stream)?;
        let server = self.object_handle(object, "FastTransferDestinationConfigure")?;
        let request = RopRequest::FastTransferDestinationConfigure { operation };
        let reply = self.expect_success(&request, server)?;
        let destination = self.adopt_handle(&request, &reply, HandleKind::Destination(operation))?;
        let server = self.handles.get(destination)?.server;

        let resume = self.enter(SyncPhase::Uploading)?;
        let transfer = self.config.transfer;
        let outcome = transfer::upload(&self.transport, server, &data, &transfer);
        self.leave(resume, &outcome);
        outcome
    }

    /// Imports a new or changed folder.
    ///
    /// `hierarchy` must carry the folder's parent source key, source key,
    /// last modification time, change key, PCL and display name.
    pub fn import_hierarchy_change(
        &mut self,
        collector: HandleId,
        hierarchy: PropertyList,
        properties: PropertyList,
    ) -> SyncResult<ImportOutcome> {
        let server = self.collector_handle(collector, "import hierarchy change")?;
        for tag in [
            pid::PARENT_SOURCE_KEY,
            pid::SOURCE_KEY,
            pid::LAST_MODIFICATION_TIME,
            pid::DISPLAY_NAME,
        ] {
            require_property(&hierarchy, tag)?;
        }
        check_change_key(&hierarchy)?;
        let request = RopRequest::SynchronizationImportHierarchyChange {
            hierarchy,
            properties,
        };
        self.import(&request, server)
    }

    /// Imports a folder change whose PCL was built against the server's.
    ///
    /// `server_pcl` is the folder's PCL as last downloaded. The imported PCL
    /// may include it, be included by it, or be concurrent with it; in every
    /// case the server should end up holding the merge of the two.
    pub fn import_hierarchy_conflict(
        &mut self,
        collector: HandleId,
        hierarchy: PropertyList,
        properties: PropertyList,
        server_pcl: &PredecessorChangeList,
    ) -> SyncResult<HierarchyImport> {
        self.collector_handle(collector, "import hierarchy change")?;
        require_property(&hierarchy, pid::SOURCE_KEY)?;
        let source_key = hierarchy
            .get(pid::SOURCE_KEY)
            .and_then(PropValue::as_long_term_id)
            .copied()
            .ok_or_else(|| SyncError::local("folder source key is not a long-term id"))?;
        let local = property_pcl(&hierarchy)?;
        let verdict = local.compare(server_pcl);
        let expected = local.merge(server_pcl);

        let outcome = self.import_hierarchy_change(collector, hierarchy, properties)?;
        info!(
            folder = %source_key,
            ?verdict,
            applied = outcome.is_applied(),
            "imported hierarchy change against server history"
        );
        Ok(HierarchyImport {
            outcome,
            verdict,
            source_key,
            expected,
        })
    }

    /// Imports a new or changed message.
    ///
    /// `properties` must carry the message's source key, last modification
    /// time, change key and PCL.
    pub fn import_message_change(
        &mut self,
        collector: HandleId,
        flags: ImportFlags,
        properties: PropertyList,
    ) -> SyncResult<ImportOutcome> {
        let server = self.collector_handle(collector, "import message change")?;
        for tag in [pid::SOURCE_KEY, pid::LAST_MODIFICATION_TIME] {
            require_property(&properties, tag)?;
        }
        check_change_key(&properties)?;
        let request = RopRequest::SynchronizationImportMessageChange { flags, properties };
        self.import(&request, server)
    }

    /// Imports deletions of the given objects.
    pub fn import_deletes(
        &mut self,
        collector: HandleId,
        flags: DeleteFlags,
        objects: &[ObjectId],
    ) -> SyncResult<ImportOutcome> {
        let server = self.collector_handle(collector, "import deletes")?;
        let ids = self.resolve_all(objects)?;
        let request = RopRequest::SynchronizationImportDeletes { flags, ids };
        self.import(&request, server)
    }

    /// Imports read-state changes.
    pub fn import_read_state_changes(
        &mut self,
        collector: HandleId,
        changes: &[(ObjectId, bool)],
    ) -> SyncResult<ImportOutcome> {
        let server = self.collector_handle(collector, "import read state changes")?;
        let mut states = Vec::with_capacity(changes.len());
        for (object, read) in changes {
            let id = self.object(*object)?;
            states.push(ReadStateChange {
                message: self.to_long_term(id)?,
                read: *read,
            });
        }
        let request = RopRequest::SynchronizationImportReadStateChanges { states };
        self.import(&request, server)
    }

    /// Imports a move of one message into the collector's folder.
    ///
    /// The server's current change key for the message is read first. The
    /// move carries a change key one counter newer or older than it, with a
    /// single-entry PCL, so the server either applies the move or reports
    /// [`ImportOutcome::NewerClientChange`].
    pub fn import_message_move(
        &mut self,
        collector: HandleId,
        request: MoveRequest,
    ) -> SyncResult<MoveOutcome> {
        let server = self.collector_handle(collector, "import message move")?;
        let folder_id = self.object(request.source_folder)?;
        let message_id = self.object(request.source_message)?;
        let folder_handle = self.object_handle(request.source_folder_handle, "OpenMessage")?;

        let server_change_key = self.read_change_key(folder_handle, folder_id, message_id)?;
        let counter = if request.newer_client_change {
            server_change_key.counter.checked_add(1)?
        } else {
            server_change_key.counter.checked_sub(1)?
        };
        let change_key = Xid::new(server_change_key.replica, counter);
        let pcl = PredecessorChangeList::from_entries(vec![change_key]);
        let verdict = pcl.compare(&PredecessorChangeList::from_entries(vec![server_change_key]));

        let destination = self.next_local_id()?;
        let rop = RopRequest::SynchronizationImportMessageMove(MessageMove {
            source_folder: self.to_long_term(folder_id)?,
            source_message: self.to_long_term(message_id)?,
            pcl,
            destination_message: destination,
            change_key,
        });
        let mut outcome = self.import(&rop, server)?;
        if let ImportOutcome::Applied { object, .. } = &mut outcome {
            let short_term = self.to_short_term(&destination)?;
            *object = Some(self.objects.insert(short_term));
        }
        info!(
            message = %message_id,
            %change_key,
            ?verdict,
            applied = outcome.is_applied(),
            "imported message move"
        );
        Ok(MoveOutcome {
            outcome,
            verdict,
            server_change_key,
            change_key,
            destination,
        })
    }

    // Identifiers

    /// Reserves `count` counters for client-created objects.
    pub fn allocate_counters(&mut self, count: u32) -> SyncResult<(ReplicaId, GlobalCounter)> {
        let request = RopRequest::GetLocalReplicaIds { count };
        let reply = self.expect_success(&request, self.logon)?;
        let RopResponse::LocalReplicaIds { replica, start } = reply.response else {
            return Err(SyncError::UnexpectedResponse {
                rop: request.name(),
            });
        };
        self.local_range = Some(LocalCounterRange::new(replica, start, count)?);
        debug!(%replica, %start, count, "allocated local counters");
        Ok((replica, start))
    }

    /// Next id from the most recently allocated range.
    pub fn next_local_id(&mut self) -> SyncResult<LongTermId> {
        let range = self
            .local_range
            .as_mut()
            .ok_or(SyncError::ExhaustedLocalRange)?;
        Ok(range.next_long_term()?)
    }

    /// Resolves a short-term id through the server, caching the mapping.
    pub fn to_long_term(&mut self, id: ShortTermId) -> SyncResult<LongTermId> {
        if let Some(long_term) = self.ids.long_term(id) {
            return Ok(long_term);
        }
        let request = RopRequest::LongTermIdFromId { id };
        let reply = self.expect_success(&request, self.logon)?;
        let RopResponse::LongTermId(long_term) = reply.response else {
            return Err(SyncError::UnexpectedResponse {
                rop: request.name(),
            });
        };
        self.remember(id, long_term)?;
        Ok(long_term)
    }

    /// Maps a long-term id to a short-term id through the server, caching the mapping.
    pub fn to_short_term(&mut self, long_term: &LongTermId) -> SyncResult<ShortTermId> {
        if let Some(id) = self.ids.short_term(long_term) {
            return Ok(id);
        }
        let request = RopRequest::IdFromLongTermId { id: *long_term };
        let reply = self.expect_success(&request, self.logon)?;
        let RopResponse::ShortTermId(id) = reply.response else {
            return Err(SyncError::UnexpectedResponse {
                rop: request.name(),
            });
        };
        self.remember(id, *long_term)?;
        Ok(id)
    }

    // Teardown

    /// Releases a handle on the server and forgets it.
    ///
    /// Releasing the active context returns the session to idle.
    pub fn release(&mut self, handle: HandleId) -> SyncResult<()> {
        let server = self.handles.get(handle)?.server;
        self.expect_success(&RopRequest::Release, server)?;
        let entry = self.handles.remove(handle)?;
        self.context_handles.retain(|owned| *owned != handle);
        if matches!(entry.kind, HandleKind::Download(_) | HandleKind::Collector(_)) {
            self.end_context();
        }
        Ok(())
    }

    /// Logs off: clears every session table without contacting the server.
    pub fn reset(&mut self) {
        self.handles.clear();
        self.context_handles.clear();
        self.objects.clear();
        self.states.clear();
        self.buffers.clear();
        self.ids.clear();
        self.local_range = None;
        self.phase = SyncPhase::Idle;
        debug!("session reset");
    }

    // Internals

    fn execute(&mut self, request: &RopRequest, input: ServerHandle) -> SyncResult<RopReply> {
        debug!(rop = request.name(), %input, "executing");
        match self.transport.execute(request, input) {
            Ok(reply) => {
                debug!(rop = request.name(), result = %reply.result, "reply");
                Ok(reply)
            }
            Err(error) => {
                warn!(rop = request.name(), %error, "transport failure");
                self.terminate_context();
                Err(error.into())
            }
        }
    }

    fn expect_success(
        &mut self,
        request: &RopRequest,
        input: ServerHandle,
    ) -> SyncResult<RopReply> {
        let reply = self.execute(request, input)?;
        if !reply.result.is_success() {
            return Err(SyncError::Protocol {
                rop: request.name(),
                result: reply.result,
            });
        }
        Ok(reply)
    }

    fn import(
        &mut self,
        request: &RopRequest,
        collector: ServerHandle,
    ) -> SyncResult<ImportOutcome> {
        let resume = self.enter(SyncPhase::Uploading)?;
        let reply = self.execute(request, collector);
        self.leave(resume, &reply);
        let reply = reply?;
        match reply.result {
            RopResult::Success => {
                let object = match reply.response {
                    RopResponse::Imported(id) => Some(self.objects.insert(id)),
                    _ => None,
                };
                let handle = reply.handles.first().map(|server| {
                    let handle = self.handles.insert(HandleEntry {
                        server: *server,
                        kind: HandleKind::Object,
                    });
                    self.context_handles.push(handle);
                    handle
                });
                debug!(rop = request.name(), "import applied");
                Ok(ImportOutcome::Applied { object, handle })
            }
            RopResult::NewerClientChange => {
                debug!(rop = request.name(), "server holds a newer version");
                Ok(ImportOutcome::NewerClientChange)
            }
            result => Err(SyncError::Protocol {
                rop: request.name(),
                result,
            }),
        }
    }

    fn run_download(
        &mut self,
        source: ServerHandle,
        transfer: &TransferConfig,
    ) -> SyncResult<TransferOutcome> {
        let resume = self.enter(SyncPhase::Downloading)?;
        let outcome = transfer::download(&self.transport, source, transfer);
        self.leave(resume, &outcome);
        outcome
    }

    fn upload_state_stream(
        &mut self,
        context: ServerHandle,
        property: IcsStateProperty,
        size: u32,
        data: &[u8],
        transfer: &TransferConfig,
    ) -> SyncResult<UploadOutcome> {
        let begin = RopRequest::SynchronizationUploadStateStreamBegin {
            property: property.tag(),
            size,
        };
        let mut report = TransferReport::default();
        let reply = self.execute(&begin, context)?;
        if !reply.result.is_success() {
            return Ok(UploadOutcome {
                result: reply.result,
                report,
            });
        }
        report.limit = transfer.upload_chunk;
        for chunk in transfer::chunks(data, transfer) {
            let request = RopRequest::SynchronizationUploadStateStreamContinue {
                data: chunk.to_vec(),
            };
            let reply = self.execute(&request, context)?;
            if !reply.result.is_success() {
                return Ok(UploadOutcome {
                    result: reply.result,
                    report,
                });
            }
            report.chunk_sizes.push(chunk.len());
        }
        let reply = self.execute(&RopRequest::SynchronizationUploadStateStreamEnd, context)?;
        debug!(?property, size, result = %reply.result, "uploaded state stream");
        Ok(UploadOutcome {
            result: reply.result,
            report,
        })
    }

    fn read_change_key(
        &mut self,
        folder_handle: ServerHandle,
        folder: ShortTermId,
        message: ShortTermId,
    ) -> SyncResult<Xid> {
        let open = RopRequest::OpenMessage { folder, message };
        let reply = self.expect_success(&open, folder_handle)?;
        let message_handle = reply
            .handles
            .first()
            .copied()
            .ok_or(SyncError::UnexpectedResponse { rop: open.name() })?;

        let read = RopRequest::GetPropertiesSpecific {
            tags: vec![pid::CHANGE_KEY],
        };
        let reply = self.expect_success(&read, message_handle)?;
        self.expect_success(&RopRequest::Release, message_handle)?;
        let RopResponse::Properties(properties) = reply.response else {
            return Err(SyncError::UnexpectedResponse { rop: read.name() });
        };
        match properties.get(pid::CHANGE_KEY) {
            Some(PropValue::ChangeKey(xid)) => Ok(*xid),
            Some(PropValue::Binary(bytes)) => Ok(Xid::from_slice(bytes)?),
            _ => Err(SyncError::UnexpectedResponse { rop: read.name() }),
        }
    }

    fn adopt_handle(
        &mut self,
        request: &RopRequest,
        reply: &RopReply,
        kind: HandleKind,
    ) -> SyncResult<HandleId> {
        let server = reply
            .handles
            .first()
            .copied()
            .ok_or(SyncError::UnexpectedResponse {
                rop: request.name(),
            })?;
        let handle = self.handles.insert(HandleEntry { server, kind });
        self.context_handles.push(handle);
        Ok(handle)
    }

    fn object_handle(&self, handle: HandleId, operation: &'static str) -> SyncResult<ServerHandle> {
        let entry = self.handles.get(handle)?;
        match entry.kind {
            HandleKind::Object => Ok(entry.server),
            ref other => Err(Self::wrong_kind(handle, other, operation)),
        }
    }

    fn collector_handle(
        &self,
        handle: HandleId,
        operation: &'static str,
    ) -> SyncResult<ServerHandle> {
        let entry = self.handles.get(handle)?;
        match entry.kind {
            HandleKind::Collector(_) => Ok(entry.server),
            ref other => Err(Self::wrong_kind(handle, other, operation)),
        }
    }

    fn wrong_kind(handle: HandleId, kind: &HandleKind, operation: &'static str) -> SyncError {
        SyncError::WrongHandleKind {
            kind: kind.name(),
            index: crate::arena::ArenaIndex::raw(handle),
            operation,
        }
    }

    fn resolve_all(&mut self, objects: &[ObjectId]) -> SyncResult<Vec<LongTermId>> {
        let mut ids = Vec::with_capacity(objects.len());
        for object in objects {
            let id = self.object(*object)?;
            ids.push(self.to_long_term(id)?);
        }
        Ok(ids)
    }

    fn remember(&mut self, id: ShortTermId, long_term: LongTermId) -> SyncResult<()> {
        self.ids.register_replica(id.replica_index(), long_term.replica)?;
        self.ids.record(id, long_term)?;
        Ok(())
    }

    fn classify(&self, state: &SyncState) -> StateFreshness {
        StateFreshness {
            idset_given: self.freshness(state, |s| s.idset_given.as_ref()),
            cnset_seen: self.freshness(state, |s| s.cnset_seen.as_ref()),
            cnset_seen_fai: self.freshness(state, |s| s.cnset_seen_fai.as_ref()),
            cnset_read: self.freshness(state, |s| s.cnset_read.as_ref()),
        }
    }

    fn freshness(&self, state: &SyncState, pick: fn(&SyncState) -> Option<&IdSet>) -> Freshness {
        let Some(set) = pick(state) else {
            return Freshness::Absent;
        };
        let known = self
            .states
            .iter()
            .filter_map(|(_, cached)| pick(cached))
            .any(|cached| cached.equals(set));
        if known {
            Freshness::Known
        } else {
            Freshness::New
        }
    }

    fn require_transition(&self, next: SyncPhase) -> SyncResult<()> {
        if self.phase.can_transition_to(next) {
            Ok(())
        } else {
            Err(SyncError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            })
        }
    }

    fn enter(&mut self, phase: SyncPhase) -> SyncResult<SyncPhase> {
        self.require_transition(phase)?;
        let resume = self.phase;
        self.phase = phase;
        Ok(resume)
    }

    fn leave<R>(&mut self, resume: SyncPhase, result: &SyncResult<R>) {
        match result {
            Err(error) if error.is_transport() => self.terminate_context(),
            _ => self.phase = resume,
        }
    }

    fn end_context(&mut self) {
        for handle in self.context_handles.drain(..) {
            let _ = self.handles.remove(handle);
        }
        self.phase = SyncPhase::Idle;
    }

    fn terminate_context(&mut self) {
        if self.phase != SyncPhase::Idle || !self.context_handles.is_empty() {
            warn!(phase = %self.phase, handles = self.context_handles.len(), "terminating context");
        }
        self.end_context();
    }
}

impl<T: RopTransport> fmt::Debug for SyncSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSession")
            .field("logon", &self.logon)
            .field("phase", &self.phase)
            .field("handles", &self.handles.len())
            .field("objects", &self.objects.len())
            .field("states", &self.states.len())
            .field("buffers", &self.buffers.len())
            .finish()
    }
}

fn require_property(properties: &PropertyList, tag: PropertyTag) -> SyncResult<()> {
    if properties.get(tag).is_none() {
        return Err(SyncError::local(format!("missing required property {tag}")));
    }
    Ok(())
}

fn property_pcl(properties: &PropertyList) -> SyncResult<PredecessorChangeList> {
    match properties.get(pid::PREDECESSOR_CHANGE_LIST) {
        Some(PropValue::Pcl(pcl)) => Ok(pcl.clone()),
        Some(PropValue::Binary(bytes)) => Ok(PredecessorChangeList::decode_body(bytes)?),
        Some(_) => Err(SyncError::local("PCL has the wrong type")),
        None => Err(SyncError::local("missing predecessor change list")),
    }
}

fn folder_pcl(folder: &PropertyList) -> Option<&PredecessorChangeList> {
    folder
        .get(pid::PREDECESSOR_CHANGE_LIST)
        .and_then(PropValue::as_pcl)
}

/// The change key must be present and covered by the PCL.
fn check_change_key(properties: &PropertyList) -> SyncResult<()> {
    let change_key = match properties.get(pid::CHANGE_KEY) {
        Some(PropValue::ChangeKey(xid)) => *xid,
        Some(PropValue::Binary(bytes)) => Xid::from_slice(bytes)?,
        Some(_) => return Err(SyncError::local("change key has the wrong type")),
        None => return Err(SyncError::local("missing change key")),
    };
    let pcl = property_pcl(properties)?;
    match pcl.counter_for(&change_key.replica) {
        Some(counter) if counter >= change_key.counter => Ok(()),
        _ => Err(SyncError::local(format!(
            "change key {change_key} is not covered by the PCL"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_transitions() {
        use SyncPhase::*;
        assert!(Idle.can_transition_to(Configured));
        assert!(Configured.can_transition_to(Collecting));
        assert!(Collecting.can_transition_to(Uploading));
        assert!(Downloading.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Idle));
        assert!(!Collecting.can_transition_to(Configured));
        assert!(!Downloading.can_transition_to(Uploading));
        assert!(Downloading.is_transferring());
        assert!(!Configured.is_transferring());
    }

    #[test]
    fn source_stream_types() {
        assert_eq!(
            FastTransferSource::CopyFolder {
                move_subfolders: true
            }
            .stream_type(),
            StreamType::TopFolder
        );
        let copy_to = FastTransferSource::CopyTo {
            object: CopyToObject::Attachment,
            level: false,
            excluded: vec![],
        };
        assert_eq!(copy_to.stream_type(), StreamType::AttachmentContent);
        assert_eq!(
            FastTransferSource::CopyMessages { messages: vec![] }.stream_type(),
            StreamType::MessageList
        );
    }

    #[test]
    fn change_key_must_be_covered() {
        let replica = ReplicaId::from_bytes([3; 16]);
        let xid = Xid::new(replica, GlobalCounter::new(9).unwrap());
        let older = Xid::new(replica, GlobalCounter::new(8).unwrap());

        let ok = PropertyList::new()
            .with(pid::CHANGE_KEY, PropValue::ChangeKey(xid))
            .with(
                pid::PREDECESSOR_CHANGE_LIST,
                PropValue::Pcl(PredecessorChangeList::from_entries(vec![xid])),
            );
        assert!(check_change_key(&ok).is_ok());

        let stale = PropertyList::new()
            .with(pid::CHANGE_KEY, PropValue::ChangeKey(xid))
            .with(
                pid::PREDECESSOR_CHANGE_LIST,
                PropValue::Pcl(PredecessorChangeList::from_entries(vec![older])),
            );
        assert!(matches!(check_change_key(&stale), Err(SyncError::LocalValidation(_))));

        let missing = PropertyList::new().with(pid::CHANGE_KEY, PropValue::ChangeKey(xid));
        assert!(matches!(check_change_key(&missing), Err(SyncError::LocalValidation(_))));
    }

    #[test]
    fn malformed_pcl_is_not_remote() {
        let replica = ReplicaId::from_bytes([3; 16]);
        let xid = Xid::new(replica, GlobalCounter::new(9).unwrap());
        let properties = PropertyList::new()
            .with(pid::CHANGE_KEY, PropValue::ChangeKey(xid))
            .with(pid::PREDECESSOR_CHANGE_LIST, PropValue::Binary(vec![22, 1, 2]));
        let err = check_change_key(&properties).unwrap_err();
        assert!(!err.is_remote());
        assert!(matches!(err, SyncError::Core(_)));
    }

    fn folder(source: LongTermId, pcl: &PredecessorChangeList) -> PropertyList {
        PropertyList::new()
            .with(pid::SOURCE_KEY, PropValue::LongTermId(source))
            .with(pid::PREDECESSOR_CHANGE_LIST, PropValue::Pcl(pcl.clone()))
    }

    #[test]
    fn resolution_finds_folder_by_source_key() {
        let replica = ReplicaId::from_bytes([3; 16]);
        let at = |value| GlobalCounter::new(value).unwrap();
        let merged = PredecessorChangeList::from_entries(vec![Xid::new(replica, at(9))]);
        let other = PredecessorChangeList::from_entries(vec![Xid::new(replica, at(2))]);
        let imported = HierarchyImport {
            outcome: ImportOutcome::Applied {
                object: None,
                handle: None,
            },
            verdict: ConflictVerdict::Concurrent,
            source_key: LongTermId::new(replica, at(5)),
            expected: merged.clone(),
        };

        let sync = HierarchySync {
            folders: vec![
                folder(LongTermId::new(replica, at(5)), &merged),
                folder(LongTermId::new(replica, at(6)), &other),
            ],
            ..HierarchySync::default()
        };
        let resolution = imported.resolution(&sync).unwrap();
        assert!(resolution.is_expected());

        let sync = HierarchySync {
            folders: vec![folder(LongTermId::new(replica, at(6)), &other)],
            ..HierarchySync::default()
        };
        let resolution = imported.resolution(&sync).unwrap();
        assert_eq!(resolution.server, other);
        assert_eq!(resolution.verdict, ConflictVerdict::BIncludesA);
        assert!(!resolution.is_expected());

        assert!(imported.resolution(&HierarchySync::default()).is_none());
    }
}
