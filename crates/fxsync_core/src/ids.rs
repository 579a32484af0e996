//! Replica, counter and object identifiers.
//!
//! A long-term id names an object forever: the GUID of the replica that
//! created it plus the 48-bit counter that replica assigned. A short-term
//! id is the 8-byte form used on the wire during one logon; its first two
//! bytes are a session-local replica index instead of the full GUID.

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::wire::{self, WireReader};

/// GUID identifying a mailbox replica.
///
/// Stored in wire order (the mixed-endian GUID layout), so comparing two
/// replica ids compares their encoded bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplicaId([u8; 16]);

impl ReplicaId {
    /// Creates a replica id from its wire bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Creates a new random replica id.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Creates a replica id from a UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid.to_bytes_le())
    }

    /// Returns the wire bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Converts to a UUID.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_bytes_le(self.0)
    }

    /// Creates a replica id from a slice.
    ///
    /// Returns `None` if the slice is not exactly 16 bytes.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        <[u8; 16]>::try_from(slice).ok().map(Self)
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicaId({})", self.to_uuid())
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid())
    }
}

impl From<Uuid> for ReplicaId {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl From<ReplicaId> for Uuid {
    fn from(id: ReplicaId) -> Self {
        id.to_uuid()
    }
}

/// A 48-bit per-replica counter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GlobalCounter(pub(crate) u64);

impl GlobalCounter {
    /// Largest representable counter.
    pub const MAX: u64 = (1 << 48) - 1;

    /// Encoded size in bytes.
    pub const SIZE: usize = 6;

    /// Creates a counter, rejecting values wider than 48 bits.
    pub fn new(value: u64) -> CoreResult<Self> {
        if value > Self::MAX {
            return Err(CoreError::CounterOverflow { value });
        }
        Ok(Self(value))
    }

    /// Decodes the 6-byte big-endian form.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        Self(wire::counter_from_bytes(&bytes))
    }

    /// Encodes to the 6-byte big-endian form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 6] {
        wire::counter_to_bytes(self.0)
    }

    /// Returns the numeric value.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Adds `delta`, failing past 48 bits.
    pub fn checked_add(&self, delta: u64) -> CoreResult<Self> {
        let value = self
            .0
            .checked_add(delta)
            .ok_or(CoreError::CounterOverflow { value: u64::MAX })?;
        Self::new(value)
    }

    /// Subtracts `delta`, failing below zero.
    pub fn checked_sub(&self, delta: u64) -> CoreResult<Self> {
        self.0
            .checked_sub(delta)
            .map(Self)
            .ok_or(CoreError::CounterUnderflow)
    }
}

impl fmt::Debug for GlobalCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalCounter({:#x})", self.0)
    }
}

impl fmt::Display for GlobalCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Stable identifier: replica GUID plus the counter that replica assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LongTermId {
    /// Replica that created the object.
    pub replica: ReplicaId,
    /// Counter assigned by that replica.
    pub counter: GlobalCounter,
}

impl LongTermId {
    /// Encoded size in bytes.
    pub const SIZE: usize = 22;

    /// Creates a long-term id.
    #[must_use]
    pub const fn new(replica: ReplicaId, counter: GlobalCounter) -> Self {
        Self { replica, counter }
    }

    /// Encodes to 22 bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 22] {
        wire::long_term_id_to_bytes(self)
    }

    /// Decodes from exactly 22 bytes.
    pub fn from_slice(slice: &[u8]) -> CoreResult<Self> {
        if slice.len() != Self::SIZE {
            return Err(CoreError::InvalidLength {
                what: "long-term id",
                expected: Self::SIZE,
                found: slice.len(),
            });
        }
        WireReader::new(slice).read_long_term_id()
    }
}

impl fmt::Display for LongTermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.replica, self.counter)
    }
}

/// Session-local 2-byte alias of a replica GUID.
pub type ReplicaIndex = u16;

/// Session-scoped 8-byte object identifier.
///
/// Byte layout: replica index (2 bytes, little-endian) followed by the
/// global counter (6 bytes, big-endian), read as a little-endian `u64`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ShortTermId(u64);

impl ShortTermId {
    /// Wraps a raw wire value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Builds a short-term id from its parts.
    #[must_use]
    pub fn new(index: ReplicaIndex, counter: GlobalCounter) -> Self {
        Self(wire::short_term_id_raw(index, counter))
    }

    /// Returns the raw wire value.
    #[inline]
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Returns the 8 wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Replica index part.
    #[must_use]
    pub fn replica_index(&self) -> ReplicaIndex {
        wire::short_term_id_parts(self.0).0
    }

    /// Counter part.
    #[must_use]
    pub fn counter(&self) -> GlobalCounter {
        GlobalCounter(wire::short_term_id_parts(self.0).1)
    }
}

impl fmt::Debug for ShortTermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortTermId({:#018x})", self.0)
    }
}

impl fmt::Display for ShortTermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Session-scoped identifier tables.
///
/// Holds the replica index map and a cache of short/long id pairs learned
/// from the server. Both maps are one-to-one for the life of the session:
/// a short-term id names exactly one long-term id and the reverse, and a
/// replica index names exactly one GUID and the reverse.
/// [`IdentifierTable::clear`] runs on logoff.
#[derive(Debug, Default, Clone)]
pub struct IdentifierTable {
    replicas: HashMap<ReplicaIndex, ReplicaId>,
    indexes: HashMap<ReplicaId, ReplicaIndex>,
    long_terms: HashMap<ShortTermId, LongTermId>,
    short_terms: HashMap<LongTermId, ShortTermId>,
}

impl IdentifierTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a replica index.
    ///
    /// Re-registering the same pair is a no-op. Binding a known index to
    /// another GUID, or a known GUID to another index, fails.
    pub fn register_replica(&mut self, index: ReplicaIndex, replica: ReplicaId) -> CoreResult<()> {
        let known_replica = self.replicas.get(&index);
        let known_index = self.indexes.get(&replica);
        match (known_replica, known_index) {
            (Some(known), Some(_)) if *known == replica => Ok(()),
            (None, None) => {
                self.replicas.insert(index, replica);
                self.indexes.insert(replica, index);
                Ok(())
            }
            _ => Err(CoreError::ReplicaConflict {
                index,
                replica: replica.to_string(),
            }),
        }
    }

    /// Looks up the GUID behind a replica index.
    #[must_use]
    pub fn replica(&self, index: ReplicaIndex) -> Option<ReplicaId> {
        self.replicas.get(&index).copied()
    }

    /// Looks up the index registered for a replica GUID.
    #[must_use]
    pub fn replica_index(&self, replica: &ReplicaId) -> Option<ReplicaIndex> {
        self.indexes.get(replica).copied()
    }

    /// Records a resolved pair.
    ///
    /// Re-recording the same pair is a no-op. Mapping an already known
    /// short-term id to a different long-term id fails, and so does giving
    /// an already known long-term id a second short-term id.
    pub fn record(&mut self, short_term: ShortTermId, long_term: LongTermId) -> CoreResult<()> {
        let known_long = self.long_terms.get(&short_term);
        let known_short = self.short_terms.get(&long_term);
        match (known_long, known_short) {
            (Some(known), Some(_)) if *known == long_term => Ok(()),
            (None, None) => {
                self.long_terms.insert(short_term, long_term);
                self.short_terms.insert(long_term, short_term);
                Ok(())
            }
            _ => Err(CoreError::MappingConflict {
                short_term: short_term.raw(),
                long_term: long_term.to_string(),
            }),
        }
    }

    /// Cached long-term id for a short-term id.
    #[must_use]
    pub fn long_term(&self, short_term: ShortTermId) -> Option<LongTermId> {
        self.long_terms.get(&short_term).copied()
    }

    /// Cached short-term id for a long-term id.
    #[must_use]
    pub fn short_term(&self, long_term: &LongTermId) -> Option<ShortTermId> {
        self.short_terms.get(long_term).copied()
    }

    /// Derives a long-term id from the registered replica indexes.
    pub fn derive_long_term(&self, short_term: ShortTermId) -> CoreResult<LongTermId> {
        let index = short_term.replica_index();
        let replica = self
            .replica(index)
            .ok_or(CoreError::UnknownReplicaIndex(index))?;
        Ok(LongTermId::new(replica, short_term.counter()))
    }

    /// Derives a short-term id from the registered replica indexes.
    pub fn derive_short_term(&self, long_term: &LongTermId) -> CoreResult<ShortTermId> {
        let index = self
            .replica_index(&long_term.replica)
            .ok_or_else(|| CoreError::UnknownReplica(long_term.replica.to_string()))?;
        Ok(ShortTermId::new(index, long_term.counter))
    }

    /// Number of cached id pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.long_terms.len()
    }

    /// Returns true if no pairs are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.long_terms.is_empty()
    }

    /// Drops every mapping.
    pub fn clear(&mut self) {
        self.replicas.clear();
        self.indexes.clear();
        self.long_terms.clear();
        self.short_terms.clear();
    }
}

/// A contiguous counter range reserved for client-originated objects.
///
/// Counters come out strictly increasing; once the range is used up the
/// caller must allocate a fresh one.
#[derive(Debug, Clone)]
pub struct LocalCounterRange {
    replica: ReplicaId,
    next: u64,
    end: u64,
    allocated: u64,
}

impl LocalCounterRange {
    /// Creates a range of `count` counters starting at `start`.
    pub fn new(replica: ReplicaId, start: GlobalCounter, count: u32) -> CoreResult<Self> {
        let end = start.value() + u64::from(count);
        if end > GlobalCounter::MAX + 1 {
            return Err(CoreError::CounterOverflow { value: end - 1 });
        }
        Ok(Self {
            replica,
            next: start.value(),
            end,
            allocated: 0,
        })
    }

    /// Replica the range belongs to.
    #[must_use]
    pub fn replica(&self) -> ReplicaId {
        self.replica
    }

    /// Counters still available.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.end - self.next
    }

    /// Hands out the next counter.
    pub fn next_counter(&mut self) -> CoreResult<GlobalCounter> {
        if self.next >= self.end {
            return Err(CoreError::ExhaustedLocalRange {
                allocated: self.allocated,
            });
        }
        let counter = GlobalCounter(self.next);
        self.next += 1;
        self.allocated += 1;
        Ok(counter)
    }

    /// Hands out the next counter as a long-term id.
    pub fn next_long_term(&mut self) -> CoreResult<LongTermId> {
        Ok(LongTermId::new(self.replica, self.next_counter()?))
    }
}
