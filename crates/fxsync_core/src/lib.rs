//! # fxsync core
//!
//! Identifier model and version-vector primitives for FastTransfer
//! synchronization.
//!
//! This crate provides:
//! - Replica GUIDs, 48-bit global counters, long-term and short-term ids
//! - A session-scoped identifier table and local counter ranges
//! - IDSET/CNSET range sets with the compressed GLOBSET wire form
//! - Predecessor change lists (PCL) and conflict classification
//!
//! ## Wire layouts
//!
//! Every byte layout for identifiers lives in [`wire`]. Counters are
//! big-endian so byte order equals numeric order; replica GUIDs use the
//! mixed-endian GUID layout; short-term ids are little-endian `u64`s.
//!
//! ## Usage
//!
//! ```
//! use fxsync_core::{ConflictVerdict, GlobalCounter, PredecessorChangeList, ReplicaId, Xid};
//!
//! let replica = ReplicaId::from_bytes([7; 16]);
//! let change = |counter| Xid::new(replica, GlobalCounter::new(counter).unwrap());
//! let newer = PredecessorChangeList::from_entries(vec![change(5)]);
//! let older = PredecessorChangeList::from_entries(vec![change(3)]);
//! assert_eq!(newer.compare(&older), ConflictVerdict::AIncludesB);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod ids;
pub mod idset;
mod pcl;
pub mod wire;

pub use conflict::ConflictVerdict;
pub use error::{CoreError, CoreResult};
pub use ids::{
    GlobalCounter, IdentifierTable, LocalCounterRange, LongTermId, ReplicaId, ReplicaIndex,
    ShortTermId,
};
pub use idset::{IdRange, IdSet};
pub use pcl::{compare_encoded, PredecessorChangeList, Xid};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
