//! An in-memory server for end-to-end tests.
//!
//! [`FakeServer`] answers remote operations from tables the test fills in:
//! streams served per folder, checkpoint states, message change keys and
//! subfolders. It resolves identifiers through its own replica table and
//! records every import and upload it accepts. Folder changes are resolved
//! against the stored subfolder's PCL, and a hierarchy synchronization on
//! a folder without a fixed stream reports the stored subfolders.

use fxsync_codec::{
    encode_stream, pid, HierarchySync, PropValue, PropertyList, PropertyTag, StreamObject,
};
use fxsync_core::{
    ConflictVerdict, GlobalCounter, IdentifierTable, LongTermId, PredecessorChangeList, ReplicaId,
    ReplicaIndex, ShortTermId, Xid,
};
use fxsync_engine::{
    BufferSize, RopReply, RopRequest, RopResponse, RopResult, RopTransport, ServerHandle,
    SyncType, TransferStatus, TransportError,
};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Chunk size the server picks when asked for its default.
pub const SERVER_DEFAULT_BUFFER: u16 = 0x1000;

#[derive(Debug, Clone)]
enum Slot {
    Object,
    Source {
        data: Vec<u8>,
        offset: usize,
        folder: Option<ServerHandle>,
    },
    Collector {
        folder: ServerHandle,
    },
    Destination {
        index: usize,
    },
    Message(ShortTermId),
}

#[derive(Debug)]
struct PendingState {
    context: ServerHandle,
    property: PropertyTag,
    size: u32,
    data: Vec<u8>,
}

#[derive(Debug)]
struct ServerState {
    replica: ReplicaId,
    ids: IdentifierTable,
    next_handle: u32,
    slots: HashMap<ServerHandle, Slot>,
    streams: HashMap<ServerHandle, Vec<u8>>,
    states: HashMap<ServerHandle, Vec<u8>>,
    messages: HashMap<ShortTermId, Xid>,
    folders: HashMap<ServerHandle, Vec<PropertyList>>,
    next_local: u64,
    min_buffer: u16,
    default_buffer: u16,
    pending_state: Option<PendingState>,
    uploaded_states: Vec<(PropertyTag, Vec<u8>)>,
    destinations: Vec<Vec<u8>>,
    imports: Vec<RopRequest>,
    disconnect_after: Option<usize>,
    calls: usize,
}

/// An in-memory server implementing [`RopTransport`].
#[derive(Debug)]
pub struct FakeServer {
    state: Mutex<ServerState>,
}

impl FakeServer {
    /// Replica index the server's own replica is known under.
    pub const SERVER_REPLICA_INDEX: ReplicaIndex = 1;

    /// Creates a server whose objects live on `replica`.
    pub fn new(replica: ReplicaId) -> Self {
        let mut ids = IdentifierTable::new();
        ids.register_replica(Self::SERVER_REPLICA_INDEX, replica)
            .expect("fresh table accepts the server replica");
        Self {
            state: Mutex::new(ServerState {
                replica,
                ids,
                next_handle: 100,
                slots: HashMap::new(),
                streams: HashMap::new(),
                states: HashMap::new(),
                messages: HashMap::new(),
                folders: HashMap::new(),
                next_local: 0x0010_0000,
                min_buffer: 1,
                default_buffer: SERVER_DEFAULT_BUFFER,
                pending_state: None,
                uploaded_states: Vec::new(),
                destinations: Vec::new(),
                imports: Vec::new(),
                disconnect_after: None,
                calls: 0,
            }),
        }
    }

    /// Sets the smallest exact buffer size the server accepts.
    pub fn with_min_buffer(self, size: u16) -> Self {
        self.state.lock().min_buffer = size;
        self
    }

    /// Sets the chunk size used for server-default requests.
    pub fn with_default_buffer(self, size: u16) -> Self {
        self.state.lock().default_buffer = size.max(1);
        self
    }

    /// Fails every call after the first `calls` with a transport error.
    pub fn disconnect_after(&self, calls: usize) {
        let mut state = self.state.lock();
        state.disconnect_after = Some(state.calls + calls);
    }

    /// Opens a logon, folder or other object and returns its handle.
    pub fn open_object(&self) -> ServerHandle {
        let mut state = self.state.lock();
        state.allocate(Slot::Object)
    }

    /// Serves `bytes` from every source or download context on `object`.
    pub fn set_stream(&self, object: ServerHandle, bytes: Vec<u8>) {
        self.state.lock().streams.insert(object, bytes);
    }

    /// Serves `bytes` as the checkpoint state of contexts on `folder`.
    pub fn set_state(&self, folder: ServerHandle, bytes: Vec<u8>) {
        self.state.lock().states.insert(folder, bytes);
    }

    /// Stores a message with its current change key.
    pub fn add_message(&self, id: ShortTermId, change_key: Xid) {
        self.state.lock().messages.insert(id, change_key);
    }

    /// Stores a subfolder of `parent`.
    ///
    /// `hierarchy` is the folder change as a hierarchy download reports it:
    /// source key, PCL, change key and the rest.
    pub fn add_folder(&self, parent: ServerHandle, hierarchy: PropertyList) {
        self.state
            .lock()
            .folders
            .entry(parent)
            .or_default()
            .push(hierarchy);
    }

    /// Current PCL of the subfolder of `parent` with `source_key`.
    pub fn folder_pcl(
        &self,
        parent: ServerHandle,
        source_key: &LongTermId,
    ) -> Option<PredecessorChangeList> {
        let state = self.state.lock();
        let folder = state.folder(parent, source_key)?;
        folder
            .get(pid::PREDECESSOR_CHANGE_LIST)
            .and_then(PropValue::as_pcl)
            .cloned()
    }

    /// Current change key of a message.
    pub fn change_key(&self, id: ShortTermId) -> Option<Xid> {
        self.state.lock().messages.get(&id).copied()
    }

    /// Short-term id of a counter on the server replica.
    pub fn short_term(&self, value: GlobalCounter) -> ShortTermId {
        ShortTermId::new(Self::SERVER_REPLICA_INDEX, value)
    }

    /// Long-term id of a counter on the server replica.
    pub fn long_term(&self, value: GlobalCounter) -> LongTermId {
        LongTermId::new(self.state.lock().replica, value)
    }

    /// Import requests the server accepted, in order.
    pub fn imports(&self) -> Vec<RopRequest> {
        self.state.lock().imports.clone()
    }

    /// Checkpoint properties uploaded so far.
    pub fn uploaded_states(&self) -> Vec<(PropertyTag, Vec<u8>)> {
        self.state.lock().uploaded_states.clone()
    }

    /// Streams written to fast-transfer destinations, in creation order.
    pub fn destinations(&self) -> Vec<Vec<u8>> {
        self.state.lock().destinations.clone()
    }

    /// Number of live server handles.
    pub fn open_handles(&self) -> usize {
        self.state.lock().slots.len()
    }
}

impl ServerState {
    fn allocate(&mut self, slot: Slot) -> ServerHandle {
        let handle = ServerHandle(self.next_handle);
        self.next_handle += 1;
        self.slots.insert(handle, slot);
        handle
    }

    fn open_source(&mut self, data: Vec<u8>, folder: Option<ServerHandle>) -> RopReply {
        let handle = self.allocate(Slot::Source {
            data,
            offset: 0,
            folder,
        });
        RopReply::success(RopResponse::Empty).with_handle(handle)
    }

    fn object_stream(&self, input: ServerHandle) -> Option<Vec<u8>> {
        match self.slots.get(&input) {
            Some(Slot::Object) => Some(self.streams.get(&input).cloned().unwrap_or_default()),
            _ => None,
        }
    }

    /// Fixed stream of `input`, or its stored subfolders as a hierarchy download.
    fn sync_stream(&self, input: ServerHandle, sync_type: SyncType) -> Option<Vec<u8>> {
        if sync_type != SyncType::Hierarchy || self.streams.contains_key(&input) {
            return self.object_stream(input);
        }
        if !matches!(self.slots.get(&input), Some(Slot::Object)) {
            return None;
        }
        let mut folders = self.folders.get(&input).cloned().unwrap_or_default();
        folders.sort_by_key(|folder| {
            let modified = folder
                .get(pid::LAST_MODIFICATION_TIME)
                .and_then(PropValue::as_time);
            std::cmp::Reverse(modified)
        });
        let sync = HierarchySync {
            folders,
            ..HierarchySync::default()
        };
        encode_stream(&StreamObject::HierarchySync(sync)).ok()
    }

    fn folder(&self, parent: ServerHandle, source_key: &LongTermId) -> Option<&PropertyList> {
        self.folders.get(&parent)?.iter().find(|folder| {
            folder.get(pid::SOURCE_KEY).and_then(PropValue::as_long_term_id) == Some(source_key)
        })
    }

    /// Applies a folder change against the stored subfolder's history.
    ///
    /// A change that includes the stored PCL replaces the folder, one the
    /// stored PCL includes is dropped, and a concurrent one is taken with
    /// the two histories merged. Every outcome is a success.
    fn import_folder(&mut self, request: &RopRequest, parent: ServerHandle) -> RopReply {
        let RopRequest::SynchronizationImportHierarchyChange { hierarchy, .. } = request else {
            return RopReply::failure(RopResult::InvalidParameter);
        };
        let Some(source) = hierarchy
            .get(pid::SOURCE_KEY)
            .and_then(PropValue::as_long_term_id)
        else {
            return RopReply::failure(RopResult::InvalidParameter);
        };
        let Some(incoming) = hierarchy
            .get(pid::PREDECESSOR_CHANGE_LIST)
            .and_then(PropValue::as_pcl)
        else {
            return RopReply::failure(RopResult::InvalidParameter);
        };
        self.imports.push(request.clone());

        let folders = self.folders.entry(parent).or_default();
        let position = folders.iter().position(|folder| {
            folder.get(pid::SOURCE_KEY).and_then(PropValue::as_long_term_id) == Some(source)
        });
        let Some(position) = position else {
            folders.push(hierarchy.clone());
            return RopReply::success(RopResponse::Empty);
        };
        let stored = &mut folders[position];
        let current = stored
            .get(pid::PREDECESSOR_CHANGE_LIST)
            .and_then(PropValue::as_pcl)
            .cloned()
            .unwrap_or_default();
        match incoming.compare(&current) {
            ConflictVerdict::AIncludesB | ConflictVerdict::Equal => *stored = hierarchy.clone(),
            ConflictVerdict::BIncludesA => {}
            ConflictVerdict::Concurrent => {
                *stored = hierarchy.clone();
                stored.set(pid::PREDECESSOR_CHANGE_LIST, PropValue::Pcl(incoming.merge(&current)));
            }
        }
        RopReply::success(RopResponse::Empty)
    }

    fn get_buffer(&mut self, input: ServerHandle, size: BufferSize) -> RopReply {
        let limit = match size {
            BufferSize::Exact(size) if size < self.min_buffer => {
                return RopReply::failure(RopResult::BufferTooSmall)
            }
            BufferSize::Exact(size) => usize::from(size),
            BufferSize::ServerDefault { maximum } => {
                usize::from(self.default_buffer.min(maximum))
            }
        };
        let Some(Slot::Source { data, offset, .. }) = self.slots.get_mut(&input) else {
            return RopReply::failure(RopResult::InvalidParameter);
        };
        let end = (*offset + limit).min(data.len());
        let chunk = data[*offset..end].to_vec();
        *offset = end;
        let status = if end == data.len() {
            TransferStatus::Done
        } else {
            TransferStatus::Partial
        };
        RopReply::success(RopResponse::Buffer {
            status,
            data: chunk,
        })
    }

    fn context_folder(&self, input: ServerHandle) -> Option<ServerHandle> {
        match self.slots.get(&input) {
            Some(Slot::Source {
                folder: Some(folder),
                ..
            }) => Some(*folder),
            Some(Slot::Collector { folder }) => Some(*folder),
            _ => None,
        }
    }

    fn import_move(&mut self, request: &RopRequest) -> RopReply {
        let RopRequest::SynchronizationImportMessageMove(details) = request else {
            return RopReply::failure(RopResult::InvalidParameter);
        };
        let Ok(source) = self.ids.derive_short_term(&details.source_message) else {
            return RopReply::failure(RopResult::NotFound);
        };
        let Some(current) = self.messages.get(&source).copied() else {
            return RopReply::failure(RopResult::NotFound);
        };
        let server = PredecessorChangeList::from_entries(vec![current]);
        match details.pcl.compare(&server) {
            ConflictVerdict::AIncludesB | ConflictVerdict::Equal => {
                let Ok(destination) = self.ids.derive_short_term(&details.destination_message)
                else {
                    return RopReply::failure(RopResult::InvalidParameter);
                };
                self.messages.remove(&source);
                self.messages.insert(destination, details.change_key);
                self.imports.push(request.clone());
                RopReply::success(RopResponse::Empty)
            }
            _ => RopReply::failure(RopResult::NewerClientChange),
        }
    }

    fn import_message(&mut self, request: &RopRequest, properties: &PropertyList) -> RopReply {
        let Some(source) = properties.get(pid::SOURCE_KEY).and_then(PropValue::as_long_term_id)
        else {
            return RopReply::failure(RopResult::InvalidParameter);
        };
        let Some(incoming) = properties.get(pid::CHANGE_KEY).and_then(PropValue::as_change_key)
        else {
            return RopReply::failure(RopResult::InvalidParameter);
        };
        let Ok(id) = self.ids.derive_short_term(source) else {
            return RopReply::failure(RopResult::NotFound);
        };
        if let Some(current) = self.messages.get(&id) {
            if current.replica == incoming.replica && current.counter > incoming.counter {
                return RopReply::failure(RopResult::NewerClientChange);
            }
        }
        self.messages.insert(id, *incoming);
        self.imports.push(request.clone());
        let handle = self.allocate(Slot::Message(id));
        RopReply::success(RopResponse::Imported(id)).with_handle(handle)
    }

    fn handle(&mut self, request: &RopRequest, input: ServerHandle) -> RopReply {
        use RopRequest as R;

        if !self.slots.contains_key(&input) {
            return RopReply::failure(RopResult::InvalidParameter);
        }
        match request {
            R::SynchronizationConfigure { sync_type, .. } => {
                match self.sync_stream(input, *sync_type) {
                    Some(data) => self.open_source(data, Some(input)),
                    None => RopReply::failure(RopResult::InvalidParameter),
                }
            }
            R::SynchronizationOpenCollector { .. } => {
                let handle = self.allocate(Slot::Collector { folder: input });
                RopReply::success(RopResponse::Empty).with_handle(handle)
            }
            R::SynchronizationGetTransferState => match self.context_folder(input) {
                Some(folder) => {
                    let data = self.states.get(&folder).cloned().unwrap_or_default();
                    self.open_source(data, None)
                }
                None => RopReply::failure(RopResult::InvalidParameter),
            },
            R::SynchronizationUploadStateStreamBegin { property, size } => {
                if self.context_folder(input).is_none() || self.pending_state.is_some() {
                    return RopReply::failure(RopResult::InvalidParameter);
                }
                self.pending_state = Some(PendingState {
                    context: input,
                    property: *property,
                    size: *size,
                    data: Vec::new(),
                });
                RopReply::success(RopResponse::Empty)
            }
            R::SynchronizationUploadStateStreamContinue { data } => match &mut self.pending_state {
                Some(pending) if pending.context == input => {
                    pending.data.extend_from_slice(data);
                    RopReply::success(RopResponse::Empty)
                }
                _ => RopReply::failure(RopResult::InvalidParameter),
            },
            R::SynchronizationUploadStateStreamEnd => match self.pending_state.take() {
                Some(pending)
                    if pending.context == input && pending.data.len() == pending.size as usize =>
                {
                    self.uploaded_states.push((pending.property, pending.data));
                    RopReply::success(RopResponse::Empty)
                }
                _ => RopReply::failure(RopResult::InvalidParameter),
            },
            R::SynchronizationImportHierarchyChange { .. } => match self.slots.get(&input) {
                Some(Slot::Collector { folder }) => {
                    let folder = *folder;
                    self.import_folder(request, folder)
                }
                _ => RopReply::failure(RopResult::InvalidParameter),
            },
            R::SynchronizationImportDeletes { .. }
            | R::SynchronizationImportReadStateChanges { .. } => {
                if !matches!(self.slots.get(&input), Some(Slot::Collector { .. })) {
                    return RopReply::failure(RopResult::InvalidParameter);
                }
                if let R::SynchronizationImportDeletes { ids, .. } = request {
                    for id in ids {
                        if let Ok(short) = self.ids.derive_short_term(id) {
                            self.messages.remove(&short);
                        }
                    }
                }
                self.imports.push(request.clone());
                RopReply::success(RopResponse::Empty)
            }
            R::SynchronizationImportMessageChange { properties, .. } => {
                self.import_message(request, properties)
            }
            R::SynchronizationImportMessageMove(_) => self.import_move(request),
            R::FastTransferSourceCopyFolder { .. }
            | R::FastTransferSourceCopyTo { .. }
            | R::FastTransferSourceCopyMessages { .. } => match self.object_stream(input) {
                Some(data) => self.open_source(data, None),
                None => RopReply::failure(RopResult::InvalidParameter),
            },
            R::FastTransferSourceGetBuffer { size } => self.get_buffer(input, *size),
            R::FastTransferDestinationConfigure { .. } => {
                self.destinations.push(Vec::new());
                let index = self.destinations.len() - 1;
                let handle = self.allocate(Slot::Destination { index });
                RopReply::success(RopResponse::Empty).with_handle(handle)
            }
            R::FastTransferDestinationPutBuffer { data } => match self.slots.get(&input) {
                Some(Slot::Destination { index }) => {
                    self.destinations[*index].extend_from_slice(data);
                    RopReply::success(RopResponse::PutBuffer {
                        status: TransferStatus::Partial,
                        used: data.len() as u16,
                    })
                }
                _ => RopReply::failure(RopResult::InvalidParameter),
            },
            R::LongTermIdFromId { id } => match self.ids.derive_long_term(*id) {
                Ok(long_term) => RopReply::success(RopResponse::LongTermId(long_term)),
                Err(_) => RopReply::failure(RopResult::NotFound),
            },
            R::IdFromLongTermId { id } => match self.ids.derive_short_term(id) {
                Ok(short_term) => RopReply::success(RopResponse::ShortTermId(short_term)),
                Err(_) => RopReply::failure(RopResult::NotFound),
            },
            R::GetLocalReplicaIds { count } => {
                let Ok(start) = GlobalCounter::new(self.next_local) else {
                    return RopReply::failure(RopResult::GeneralFailure);
                };
                self.next_local += u64::from(*count);
                RopReply::success(RopResponse::LocalReplicaIds {
                    replica: self.replica,
                    start,
                })
            }
            R::OpenMessage { message, .. } => {
                if !self.messages.contains_key(message) {
                    return RopReply::failure(RopResult::NotFound);
                }
                let handle = self.allocate(Slot::Message(*message));
                RopReply::success(RopResponse::Empty).with_handle(handle)
            }
            R::GetPropertiesSpecific { tags } => {
                let Some(Slot::Message(id)) = self.slots.get(&input) else {
                    return RopReply::failure(RopResult::InvalidParameter);
                };
                let properties = match self.messages.get(id) {
                    Some(change_key) if tags.contains(&pid::CHANGE_KEY) => {
                        PropertyList::new().with(pid::CHANGE_KEY, PropValue::ChangeKey(*change_key))
                    }
                    _ => PropertyList::new(),
                };
                RopReply::success(RopResponse::Properties(properties))
            }
            R::Release => {
                self.slots.remove(&input);
                RopReply::success(RopResponse::Empty)
            }
        }
    }
}

impl RopTransport for FakeServer {
    fn execute(
        &self,
        request: &RopRequest,
        input: ServerHandle,
    ) -> Result<RopReply, TransportError> {
        let mut state = self.state.lock();
        state.calls += 1;
        if state.disconnect_after.is_some_and(|limit| state.calls > limit) {
            return Err(TransportError::disconnected("fake server went away"));
        }
        Ok(state.handle(request, input))
    }
}
