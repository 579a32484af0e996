//! Predecessor change lists.
//!
//! A PCL holds one XID per replica that ever changed an object, in the
//! order the changes were recorded. The last entry is the object's change
//! key. Comparison treats the list as a vector clock: replica to the
//! highest counter seen from it.
//!
//! The byte form is a 2-byte little-endian total length followed by the
//! entries, each a 1-byte size and then the XID:
//!
//! ```text
//! 17 00 | 16 <16-byte GUID> <6-byte counter>
//! ```

use std::collections::BTreeMap;
use std::fmt;

use crate::conflict::ConflictVerdict;
use crate::error::{CoreError, CoreResult};
use crate::ids::{GlobalCounter, LongTermId, ReplicaId};
use crate::wire::{WireReader, WireWriter};

/// A (replica, counter) pair naming one change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Xid {
    /// Replica that made the change.
    pub replica: ReplicaId,
    /// Counter of the change on that replica.
    pub counter: GlobalCounter,
}

impl Xid {
    /// Encoded size with a 6-byte local id.
    pub const SIZE: usize = 22;

    /// Creates an XID.
    #[must_use]
    pub const fn new(replica: ReplicaId, counter: GlobalCounter) -> Self {
        Self { replica, counter }
    }

    /// Decodes a 22-byte change key.
    pub fn from_slice(slice: &[u8]) -> CoreResult<Self> {
        let id = LongTermId::from_slice(slice).map_err(|_| CoreError::InvalidLength {
            what: "change key",
            expected: Self::SIZE,
            found: slice.len(),
        })?;
        Ok(Self::new(id.replica, id.counter))
    }

    /// Encodes to 22 bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 22] {
        LongTermId::new(self.replica, self.counter).to_bytes()
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.replica, self.counter)
    }
}

/// Ordered causal-history stamp of an object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredecessorChangeList {
    entries: Vec<Xid>,
}

impl PredecessorChangeList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps entries as given, keeping their order.
    #[must_use]
    pub fn from_entries(entries: Vec<Xid>) -> Self {
        Self { entries }
    }

    /// Entries in recorded order.
    #[must_use]
    pub fn entries(&self) -> &[Xid] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the list has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent change, if any.
    #[must_use]
    pub fn change_key(&self) -> Option<&Xid> {
        self.entries.last()
    }

    /// Highest counter recorded for `replica`.
    #[must_use]
    pub fn counter_for(&self, replica: &ReplicaId) -> Option<GlobalCounter> {
        self.entries
            .iter()
            .filter(|xid| xid.replica == *replica)
            .map(|xid| xid.counter)
            .max()
    }

    /// Records a new edit.
    ///
    /// The counter must be strictly greater than any counter already held
    /// for the same replica. The new XID becomes the change key.
    pub fn record(&mut self, xid: Xid) -> CoreResult<()> {
        if let Some(previous) = self.counter_for(&xid.replica) {
            if xid.counter <= previous {
                return Err(CoreError::StaleChangeKey {
                    replica: xid.replica.to_string(),
                    previous: previous.value(),
                    proposed: xid.counter.value(),
                });
            }
        }
        self.entries.retain(|entry| entry.replica != xid.replica);
        self.entries.push(xid);
        Ok(())
    }

    /// Compares two histories.
    #[must_use]
    pub fn compare(&self, other: &Self) -> ConflictVerdict {
        let ours = self.knowledge();
        let theirs = other.knowledge();
        ConflictVerdict::from_inclusion(includes(&ours, &theirs), includes(&theirs, &ours))
    }

    /// Merges two histories.
    ///
    /// Each replica keeps the higher of its two counters. Entries follow
    /// `self`'s order, then replicas only `other` knows in `other`'s order.
    /// The result includes both inputs.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let theirs = other.knowledge();
        let mut entries: Vec<Xid> = Vec::with_capacity(self.entries.len() + other.entries.len());
        for xid in self.entries.iter().chain(&other.entries) {
            if entries.iter().any(|seen| seen.replica == xid.replica) {
                continue;
            }
            let ours = self.counter_for(&xid.replica);
            let counter = match (ours, theirs.get(&xid.replica)) {
                (Some(a), Some(b)) => a.max(*b),
                (Some(a), None) => a,
                (None, Some(b)) => *b,
                (None, None) => xid.counter,
            };
            entries.push(Xid::new(xid.replica, counter));
        }
        Self { entries }
    }

    /// Encodes with the 2-byte total length in front.
    ///
    /// Fails if the entries do not fit in that length.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let body = self.encode_body();
        let mut writer = WireWriter::with_capacity(body.len() + 2);
        writer.put_u16_prefixed(&body).map_err(|_| {
            CoreError::invalid_pcl(format!("{} entries overflow the length prefix", self.len()))
        })?;
        Ok(writer.into_bytes())
    }

    /// Encodes the entries alone, for containers that carry their own length.
    #[must_use]
    pub fn encode_body(&self) -> Vec<u8> {
        let mut writer = WireWriter::with_capacity(self.entries.len() * (Xid::SIZE + 1));
        for xid in &self.entries {
            writer.put_sized_xid(xid);
        }
        writer.into_bytes()
    }

    /// Decodes the length-prefixed form.
    ///
    /// The prefix must account for exactly the bytes that follow it.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let mut reader = WireReader::new(bytes);
        let declared = reader.read_u16_le().map_err(|_| {
            CoreError::invalid_pcl(format!("{} bytes cannot hold the length prefix", bytes.len()))
        })?;
        if usize::from(declared) != reader.remaining() {
            return Err(CoreError::invalid_pcl(format!(
                "length prefix {declared} does not match the {} bytes that follow",
                reader.remaining()
            )));
        }
        Self::decode_body(reader.rest())
    }

    /// Decodes a sequence of size-prefixed XIDs with no outer length.
    ///
    /// Input too short to hold a single entry is rejected.
    pub fn decode_body(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < 1 + 17 {
            return Err(CoreError::invalid_pcl(format!(
                "{} bytes cannot hold a change entry",
                bytes.len()
            )));
        }
        let mut reader = WireReader::new(bytes);
        let mut entries = Vec::new();
        while !reader.is_empty() {
            let xid = reader.read_sized_xid().map_err(|err| match err {
                CoreError::Truncated { offset, .. } => {
                    CoreError::invalid_pcl(format!("entry truncated at offset {offset}"))
                }
                other => other,
            })?;
            entries.push(xid);
        }
        Ok(Self { entries })
    }

    fn knowledge(&self) -> BTreeMap<ReplicaId, GlobalCounter> {
        let mut map = BTreeMap::new();
        for xid in &self.entries {
            map.entry(xid.replica)
                .and_modify(|counter: &mut GlobalCounter| *counter = (*counter).max(xid.counter))
                .or_insert(xid.counter);
        }
        map
    }
}

fn includes(
    ours: &BTreeMap<ReplicaId, GlobalCounter>,
    theirs: &BTreeMap<ReplicaId, GlobalCounter>,
) -> bool {
    theirs
        .iter()
        .all(|(replica, counter)| ours.get(replica).is_some_and(|seen| seen >= counter))
}

/// Compares two encoded PCLs.
pub fn compare_encoded(a: &[u8], b: &[u8]) -> CoreResult<ConflictVerdict> {
    let a = PredecessorChangeList::decode(a)?;
    let b = PredecessorChangeList::decode(b)?;
    Ok(a.compare(&b))
}
