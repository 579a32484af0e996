//! Typed remote operations exchanged with a [`RopTransport`](crate::RopTransport).
//!
//! The envelope byte layout belongs to the transport; the engine only
//! builds requests and reads responses.

use crate::config::{PropertyFilter, SendOptions, SyncConfig, SyncExtraFlags, SyncFlags, SyncType};
use fxsync_codec::{pid, PropertyList, PropertyTag};
use fxsync_core::{GlobalCounter, LongTermId, PredecessorChangeList, ReplicaId, ShortTermId, Xid};
use std::fmt;

/// A server-side object handle as returned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerHandle(pub u32);

impl fmt::Display for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Result code of a remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RopResult {
    /// The operation succeeded.
    Success,
    /// A parameter was rejected.
    InvalidParameter,
    /// The server does not implement the operation.
    NotImplemented,
    /// The server holds a newer version than the imported change.
    NewerClientChange,
    /// The request envelope was malformed.
    RpcFormat,
    /// The requested buffer size cannot be served.
    BufferTooSmall,
    /// The operation is not supported on this object.
    NotSupported,
    /// The parent folder does not exist.
    NoParentFolder,
    /// Access was denied.
    AccessDenied,
    /// The object was not found.
    NotFound,
    /// Unspecified server failure.
    GeneralFailure,
    /// Any other code.
    Other(u32),
}

impl RopResult {
    /// Numeric result code.
    pub const fn code(self) -> u32 {
        match self {
            RopResult::Success => 0x0000_0000,
            RopResult::InvalidParameter => 0x8007_0057,
            RopResult::NotImplemented => 0x8004_0FFF,
            RopResult::NewerClientChange => 0x0004_0821,
            RopResult::RpcFormat => 0x0000_04B6,
            RopResult::BufferTooSmall => 0x0000_047D,
            RopResult::NotSupported => 0x8004_0102,
            RopResult::NoParentFolder => 0x8004_0803,
            RopResult::AccessDenied => 0x8007_0005,
            RopResult::NotFound => 0x8004_010F,
            RopResult::GeneralFailure => 0x8000_4005,
            RopResult::Other(code) => code,
        }
    }

    /// Maps a numeric code to a result.
    pub fn from_code(code: u32) -> Self {
        match code {
            0x0000_0000 => RopResult::Success,
            0x8007_0057 => RopResult::InvalidParameter,
            0x8004_0FFF => RopResult::NotImplemented,
            0x0004_0821 => RopResult::NewerClientChange,
            0x0000_04B6 => RopResult::RpcFormat,
            0x0000_047D => RopResult::BufferTooSmall,
            0x8004_0102 => RopResult::NotSupported,
            0x8004_0803 => RopResult::NoParentFolder,
            0x8007_0005 => RopResult::AccessDenied,
            0x8004_010F => RopResult::NotFound,
            0x8000_4005 => RopResult::GeneralFailure,
            other => RopResult::Other(other),
        }
    }

    /// Returns true for [`RopResult::Success`].
    pub const fn is_success(self) -> bool {
        matches!(self, RopResult::Success)
    }
}

impl fmt::Display for RopResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RopResult::Other(code) => write!(f, "{code:#010x}"),
            known => write!(f, "{known:?} ({:#010x})", known.code()),
        }
    }
}

/// Status reported by each get-buffer and put-buffer response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    /// The transfer failed.
    Error,
    /// More data follows.
    Partial,
    /// More data follows; the chunk was cut short to fit the buffer.
    NoRoom,
    /// This was the last chunk.
    Done,
}

impl TransferStatus {
    /// Wire code of the status.
    pub const fn code(self) -> u16 {
        match self {
            TransferStatus::Error => 0x0000,
            TransferStatus::Partial => 0x0001,
            TransferStatus::NoRoom => 0x0002,
            TransferStatus::Done => 0x0003,
        }
    }

    /// Parses a wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0000 => Some(TransferStatus::Error),
            0x0001 => Some(TransferStatus::Partial),
            0x0002 => Some(TransferStatus::NoRoom),
            0x0003 => Some(TransferStatus::Done),
            _ => None,
        }
    }

    /// Returns true if more chunks follow.
    pub const fn has_more(self) -> bool {
        matches!(self, TransferStatus::Partial | TransferStatus::NoRoom)
    }
}

/// Buffer size requested from each get-buffer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSize {
    /// Exactly this many bytes.
    Exact(u16),
    /// Server default, bounded by `maximum`.
    ServerDefault {
        /// Upper bound on the chunk size.
        maximum: u16,
    },
}

impl BufferSize {
    /// Requested size that selects the server default.
    pub const SERVER_DEFAULT: u16 = 0xBABE;

    /// The value sent in the request's size field.
    pub const fn requested(self) -> u16 {
        match self {
            BufferSize::Exact(size) => size,
            BufferSize::ServerDefault { .. } => Self::SERVER_DEFAULT,
        }
    }

    /// Largest chunk the server may return for this request.
    pub const fn limit(self) -> u16 {
        match self {
            BufferSize::Exact(size) => size,
            BufferSize::ServerDefault { maximum } => maximum,
        }
    }
}

/// Checkpoint property uploaded with the state-stream operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IcsStateProperty {
    /// Ids of objects the client already has.
    IdsetGiven,
    /// Change numbers of normal messages or folders already seen.
    CnsetSeen,
    /// Change numbers of FAI messages already seen.
    CnsetSeenFai,
    /// Change numbers of read-state changes already seen.
    CnsetRead,
}

impl IcsStateProperty {
    /// All properties in checkpoint order.
    pub const ALL: [IcsStateProperty; 4] = [
        IcsStateProperty::IdsetGiven,
        IcsStateProperty::CnsetSeen,
        IcsStateProperty::CnsetSeenFai,
        IcsStateProperty::CnsetRead,
    ];

    /// Tag announced in the state-stream begin request.
    pub const fn tag(self) -> PropertyTag {
        match self {
            IcsStateProperty::IdsetGiven => pid::IDSET_GIVEN_BINARY,
            IcsStateProperty::CnsetSeen => pid::CNSET_SEEN,
            IcsStateProperty::CnsetSeenFai => pid::CNSET_SEEN_FAI,
            IcsStateProperty::CnsetRead => pid::CNSET_READ,
        }
    }
}

/// Flags of an imported message change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportFlags {
    /// The message is a FAI message.
    pub associated: bool,
    /// Fail rather than overwrite a newer server version.
    pub fail_on_conflict: bool,
}

impl ImportFlags {
    /// Wire bits of the flags.
    pub const fn bits(self) -> u8 {
        (self.associated as u8 * 0x10) | (self.fail_on_conflict as u8 * 0x40)
    }
}

/// Flags of an import-deletes request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteFlags {
    /// The ids are folders rather than messages.
    pub hierarchy: bool,
    /// Remove the objects permanently.
    pub hard_delete: bool,
}

impl DeleteFlags {
    /// Wire bits of the flags.
    pub const fn bits(self) -> u8 {
        (self.hierarchy as u8 * 0x01) | (self.hard_delete as u8 * 0x02)
    }
}

/// One entry of an import-read-state request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStateChange {
    /// The message.
    pub message: LongTermId,
    /// New read state.
    pub read: bool,
}

/// Payload of an import-message-move request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMove {
    /// Folder the message is moved out of.
    pub source_folder: LongTermId,
    /// The message being moved.
    pub source_message: LongTermId,
    /// Causal history of the moved message.
    pub pcl: PredecessorChangeList,
    /// Id assigned to the message in the destination folder.
    pub destination_message: LongTermId,
    /// Change key of the move.
    pub change_key: Xid,
}

/// Operation a fast-transfer destination is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOperation {
    /// Copy properties of an object.
    CopyTo,
    /// Copy properties of an object, selected by tag.
    CopyProperties,
    /// Copy a list of messages.
    CopyMessages,
    /// Copy a folder with its contents.
    CopyFolder,
}

impl SourceOperation {
    /// Wire code of the operation.
    pub const fn code(self) -> u8 {
        match self {
            SourceOperation::CopyTo => 0x01,
            SourceOperation::CopyProperties => 0x02,
            SourceOperation::CopyMessages => 0x03,
            SourceOperation::CopyFolder => 0x04,
        }
    }
}

/// A remote operation request.
#[derive(Debug, Clone, PartialEq)]
pub enum RopRequest {
    /// Creates a download context on a folder.
    SynchronizationConfigure {
        /// Contents or hierarchy.
        sync_type: SyncType,
        /// Send options.
        send_options: SendOptions,
        /// Synchronization flags.
        flags: SyncFlags,
        /// Extra flags.
        extra_flags: SyncExtraFlags,
        /// Property filter.
        filter: PropertyFilter,
    },
    /// Creates an upload context on a folder.
    SynchronizationOpenCollector {
        /// Contents or hierarchy.
        sync_type: SyncType,
    },
    /// Creates a fast-transfer source for the checkpoint state.
    SynchronizationGetTransferState,
    /// Starts uploading one checkpoint property.
    SynchronizationUploadStateStreamBegin {
        /// The property being uploaded.
        property: PropertyTag,
        /// Total size of the value.
        size: u32,
    },
    /// Uploads part of a checkpoint property.
    SynchronizationUploadStateStreamContinue {
        /// Next part of the value.
        data: Vec<u8>,
    },
    /// Finishes uploading a checkpoint property.
    SynchronizationUploadStateStreamEnd,
    /// Imports a new or changed folder.
    SynchronizationImportHierarchyChange {
        /// Identification properties of the folder.
        hierarchy: PropertyList,
        /// Other properties of the folder.
        properties: PropertyList,
    },
    /// Imports a new or changed message.
    SynchronizationImportMessageChange {
        /// Import flags.
        flags: ImportFlags,
        /// Identification properties of the message.
        properties: PropertyList,
    },
    /// Imports deletions.
    SynchronizationImportDeletes {
        /// Delete flags.
        flags: DeleteFlags,
        /// Source keys of the deleted objects.
        ids: Vec<LongTermId>,
    },
    /// Imports a message move between folders.
    SynchronizationImportMessageMove(MessageMove),
    /// Imports read-state changes.
    SynchronizationImportReadStateChanges {
        /// The changes.
        states: Vec<ReadStateChange>,
    },
    /// Creates a fast-transfer source for a whole folder.
    FastTransferSourceCopyFolder {
        /// Include subfolders.
        move_subfolders: bool,
        /// Send options.
        send_options: SendOptions,
    },
    /// Creates a fast-transfer source for an object's properties.
    FastTransferSourceCopyTo {
        /// Skip sub-objects.
        level: bool,
        /// Send options.
        send_options: SendOptions,
        /// Tags left out.
        excluded: Vec<PropertyTag>,
    },
    /// Creates a fast-transfer source for a list of messages.
    FastTransferSourceCopyMessages {
        /// Messages to copy.
        messages: Vec<ShortTermId>,
        /// Send options.
        send_options: SendOptions,
    },
    /// Reads the next chunk of a fast-transfer source.
    FastTransferSourceGetBuffer {
        /// Requested chunk size.
        size: BufferSize,
    },
    /// Creates a fast-transfer destination.
    FastTransferDestinationConfigure {
        /// Operation the uploaded stream describes.
        operation: SourceOperation,
    },
    /// Writes the next chunk to a fast-transfer destination.
    FastTransferDestinationPutBuffer {
        /// The chunk.
        data: Vec<u8>,
    },
    /// Resolves a short-term id.
    LongTermIdFromId {
        /// The id to resolve.
        id: ShortTermId,
    },
    /// Maps a long-term id to a short-term id.
    IdFromLongTermId {
        /// The id to map.
        id: LongTermId,
    },
    /// Reserves a range of counters for client-created objects.
    GetLocalReplicaIds {
        /// Number of counters.
        count: u32,
    },
    /// Opens a message.
    OpenMessage {
        /// Folder holding the message.
        folder: ShortTermId,
        /// The message.
        message: ShortTermId,
    },
    /// Reads properties of an open object.
    GetPropertiesSpecific {
        /// Tags to read.
        tags: Vec<PropertyTag>,
    },
    /// Releases a server handle.
    Release,
}

impl RopRequest {
    /// Builds a configure request from a context configuration.
    pub fn configure(config: &SyncConfig) -> Self {
        RopRequest::SynchronizationConfigure {
            sync_type: config.sync_type,
            send_options: config.send_options,
            flags: config.flags,
            extra_flags: config.extra_flags,
            filter: config.filter.clone(),
        }
    }

    /// Protocol name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            RopRequest::SynchronizationConfigure { .. } => "SynchronizationConfigure",
            RopRequest::SynchronizationOpenCollector { .. } => "SynchronizationOpenCollector",
            RopRequest::SynchronizationGetTransferState => "SynchronizationGetTransferState",
            RopRequest::SynchronizationUploadStateStreamBegin { .. } => {
                "SynchronizationUploadStateStreamBegin"
            }
            RopRequest::SynchronizationUploadStateStreamContinue { .. } => {
                "SynchronizationUploadStateStreamContinue"
            }
            RopRequest::SynchronizationUploadStateStreamEnd => {
                "SynchronizationUploadStateStreamEnd"
            }
            RopRequest::SynchronizationImportHierarchyChange { .. } => {
                "SynchronizationImportHierarchyChange"
            }
            RopRequest::SynchronizationImportMessageChange { .. } => {
                "SynchronizationImportMessageChange"
            }
            RopRequest::SynchronizationImportDeletes { .. } => "SynchronizationImportDeletes",
            RopRequest::SynchronizationImportMessageMove(_) => "SynchronizationImportMessageMove",
            RopRequest::SynchronizationImportReadStateChanges { .. } => {
                "SynchronizationImportReadStateChanges"
            }
            RopRequest::FastTransferSourceCopyFolder { .. } => "FastTransferSourceCopyFolder",
            RopRequest::FastTransferSourceCopyTo { .. } => "FastTransferSourceCopyTo",
            RopRequest::FastTransferSourceCopyMessages { .. } => "FastTransferSourceCopyMessages",
            RopRequest::FastTransferSourceGetBuffer { .. } => "FastTransferSourceGetBuffer",
            RopRequest::FastTransferDestinationConfigure { .. } => {
                "FastTransferDestinationConfigure"
            }
            RopRequest::FastTransferDestinationPutBuffer { .. } => {
                "FastTransferDestinationPutBuffer"
            }
            RopRequest::LongTermIdFromId { .. } => "LongTermIdFromId",
            RopRequest::IdFromLongTermId { .. } => "IdFromLongTermId",
            RopRequest::GetLocalReplicaIds { .. } => "GetLocalReplicaIds",
            RopRequest::OpenMessage { .. } => "OpenMessage",
            RopRequest::GetPropertiesSpecific { .. } => "GetPropertiesSpecific",
            RopRequest::Release => "Release",
        }
    }
}

/// Payload of a successful response.
#[derive(Debug, Clone, PartialEq)]
pub enum RopResponse {
    /// No payload.
    Empty,
    /// A chunk of a fast-transfer source.
    Buffer {
        /// Transfer status after this chunk.
        status: TransferStatus,
        /// The chunk.
        data: Vec<u8>,
    },
    /// Outcome of a put-buffer call.
    PutBuffer {
        /// Transfer status after this chunk.
        status: TransferStatus,
        /// Bytes the server consumed.
        used: u16,
    },
    /// A resolved long-term id.
    LongTermId(LongTermId),
    /// A mapped short-term id.
    ShortTermId(ShortTermId),
    /// A reserved counter range.
    LocalReplicaIds {
        /// Replica owning the range.
        replica: ReplicaId,
        /// First counter of the range.
        start: GlobalCounter,
    },
    /// Id assigned by an import.
    Imported(ShortTermId),
    /// Property values read from an object.
    Properties(PropertyList),
}

/// A response together with the handles it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RopReply {
    /// Result code reported by the server.
    pub result: RopResult,
    /// Response payload; [`RopResponse::Empty`] on failure.
    pub response: RopResponse,
    /// Output handles, if the operation created objects.
    pub handles: Vec<ServerHandle>,
}

impl RopReply {
    /// A successful reply with a payload.
    pub fn success(response: RopResponse) -> Self {
        Self {
            result: RopResult::Success,
            response,
            handles: Vec::new(),
        }
    }

    /// A failed reply.
    pub fn failure(result: RopResult) -> Self {
        Self {
            result,
            response: RopResponse::Empty,
            handles: Vec::new(),
        }
    }

    /// Adds an output handle.
    pub fn with_handle(mut self, handle: ServerHandle) -> Self {
        self.handles.push(handle);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_roundtrip() {
        for result in [
            RopResult::Success,
            RopResult::InvalidParameter,
            RopResult::NewerClientChange,
            RopResult::BufferTooSmall,
            RopResult::NotFound,
            RopResult::Other(0x1234),
        ] {
            assert_eq!(RopResult::from_code(result.code()), result);
        }
        assert!(RopResult::Success.is_success());
        assert!(!RopResult::NewerClientChange.is_success());
    }

    #[test]
    fn transfer_status_codes() {
        assert_eq!(TransferStatus::from_code(2), Some(TransferStatus::NoRoom));
        assert_eq!(TransferStatus::from_code(9), None);
        assert!(TransferStatus::Partial.has_more());
        assert!(!TransferStatus::Done.has_more());
    }

    #[test]
    fn server_default_buffer_size() {
        let size = BufferSize::ServerDefault { maximum: 0x4000 };
        assert_eq!(size.requested(), 0xBABE);
        assert_eq!(size.limit(), 0x4000);
        assert_eq!(BufferSize::Exact(10).requested(), 10);
    }

    #[test]
    fn flag_bits() {
        let flags = ImportFlags {
            associated: true,
            fail_on_conflict: false,
        };
        assert_eq!(flags.bits(), 0x10);
        let flags = DeleteFlags {
            hierarchy: true,
            hard_delete: true,
        };
        assert_eq!(flags.bits(), 0x03);
    }

    #[test]
    fn state_property_tags() {
        assert_eq!(IcsStateProperty::CnsetSeen.tag().value(), 0x6796_0102);
        assert_eq!(IcsStateProperty::IdsetGiven.tag().value(), 0x4017_0102);
    }
}
