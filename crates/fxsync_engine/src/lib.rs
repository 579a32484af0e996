//! # fxsync engine
//!
//! Client-side synchronization orchestration over remote operations.
//!
//! This crate provides:
//! - Typed remote operation requests and replies behind [`RopTransport`]
//! - The chunked fast-transfer download and upload loops
//! - A [`SyncSession`] that drives download contexts, collectors,
//!   checkpoint states and identifier mappings for one server identity
//!
//! ## Architecture
//!
//! A session owns every session-scoped table. Server objects, short-term
//! ids, cached states and raw downloads are addressed by typed indexes
//! ([`HandleId`], [`ObjectId`], [`StateIndex`], [`BufferId`]) that are never
//! reused within a session.
//!
//! ## Key Invariants
//!
//! - At most one synchronization context is active per session
//! - A transport failure terminates the active context
//! - A newer server version is a typed import outcome, not an error
//! - Local validation failures never reach the server

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod arena;
mod config;
mod error;
mod rop;
mod session;
pub mod transfer;
mod transport;

pub use arena::{Arena, ArenaIndex, BufferId, HandleId, ObjectId, StateIndex};
pub use config::{
    PropertyFilter, SendOptions, SessionConfig, SyncConfig, SyncExtraFlags, SyncFlags, SyncType,
    TransferConfig,
};
pub use error::{SyncError, SyncResult};
pub use rop::{
    BufferSize, DeleteFlags, IcsStateProperty, ImportFlags, MessageMove, ReadStateChange,
    RopReply, RopRequest, RopResponse, RopResult, ServerHandle, SourceOperation, TransferStatus,
};
pub use session::{
    ConflictResolution, CopyToObject, Download, FastTransferSource, Freshness, HierarchyImport,
    ImportOutcome, MoveOutcome, MoveRequest, StateFreshness, SyncPhase, SyncSession,
    TransferState,
};
pub use transfer::{TransferOutcome, TransferReport, UploadOutcome};
pub use transport::{MockTransport, RopTransport, TransportError};
