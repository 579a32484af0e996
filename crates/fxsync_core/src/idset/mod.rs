//! Range-encoded sets of (replica, counter) pairs.
//!
//! The same structure backs CNSETs (change numbers a client has seen) and
//! IDSETs (object ids a client knows about). Per replica the counters are
//! kept as sorted, merged ranges: no two ranges overlap or touch.

pub mod globset;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::ids::{GlobalCounter, ReplicaId};
use crate::wire::{WireReader, WireWriter};

/// Inclusive range of counters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdRange {
    low: u64,
    high: u64,
}

impl IdRange {
    /// Creates a range, rejecting `low > high`.
    pub fn new(low: GlobalCounter, high: GlobalCounter) -> CoreResult<Self> {
        if low > high {
            return Err(CoreError::InvalidRange {
                low: low.value(),
                high: high.value(),
            });
        }
        Ok(Self {
            low: low.value(),
            high: high.value(),
        })
    }

    /// A range holding one counter.
    #[must_use]
    pub fn single(counter: GlobalCounter) -> Self {
        Self {
            low: counter.value(),
            high: counter.value(),
        }
    }

    /// Low bound.
    #[must_use]
    pub fn low(&self) -> GlobalCounter {
        GlobalCounter(self.low)
    }

    /// High bound.
    #[must_use]
    pub fn high(&self) -> GlobalCounter {
        GlobalCounter(self.high)
    }

    /// Number of counters in the range.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.high - self.low + 1
    }

    /// Always false; ranges hold at least one counter.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns true if `counter` lies in the range.
    #[must_use]
    pub fn contains(&self, counter: GlobalCounter) -> bool {
        (self.low..=self.high).contains(&counter.value())
    }
}

impl fmt::Debug for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}..={:#x}]", self.low, self.high)
    }
}

/// A CNSET or IDSET.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdSet {
    replicas: BTreeMap<ReplicaId, Vec<IdRange>>,
}

impl IdSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the set holds no counters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Replicas with at least one counter, in GUID byte order.
    pub fn replicas(&self) -> impl Iterator<Item = &ReplicaId> {
        self.replicas.keys()
    }

    /// Ranges held for `replica`.
    #[must_use]
    pub fn ranges(&self, replica: &ReplicaId) -> &[IdRange] {
        self.replicas.get(replica).map_or(&[], Vec::as_slice)
    }

    /// Every (replica, range) pair.
    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, &IdRange)> {
        self.replicas
            .iter()
            .flat_map(|(replica, ranges)| ranges.iter().map(move |range| (replica, range)))
    }

    /// Total number of counters across all replicas.
    #[must_use]
    pub fn counter_count(&self) -> u64 {
        self.iter().map(|(_, range)| range.len()).sum()
    }

    /// Adds one counter.
    pub fn insert(&mut self, replica: ReplicaId, counter: GlobalCounter) {
        self.insert_raw(replica, counter.value(), counter.value());
    }

    /// Adds an inclusive range of counters.
    pub fn insert_range(
        &mut self,
        replica: ReplicaId,
        low: GlobalCounter,
        high: GlobalCounter,
    ) -> CoreResult<()> {
        let range = IdRange::new(low, high)?;
        self.insert_raw(replica, range.low, range.high);
        Ok(())
    }

    fn insert_raw(&mut self, replica: ReplicaId, low: u64, high: u64) {
        let ranges = self.replicas.entry(replica).or_default();
        let start = ranges.partition_point(|range| range.high.saturating_add(1) < low);
        let mut end = start;
        let (mut merged_low, mut merged_high) = (low, high);
        while end < ranges.len() && ranges[end].low <= merged_high.saturating_add(1) {
            merged_low = merged_low.min(ranges[end].low);
            merged_high = merged_high.max(ranges[end].high);
            end += 1;
        }
        ranges.splice(
            start..end,
            std::iter::once(IdRange {
                low: merged_low,
                high: merged_high,
            }),
        );
    }

    /// Returns true if the set holds `counter` for `replica`.
    #[must_use]
    pub fn contains(&self, replica: &ReplicaId, counter: GlobalCounter) -> bool {
        let value = counter.value();
        self.ranges(replica)
            .binary_search_by(|range| {
                if range.high < value {
                    std::cmp::Ordering::Less
                } else if range.low > value {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Returns true if every counter of `self` is also in `other`.
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.replicas.iter().all(|(replica, ranges)| {
            let theirs = other.ranges(replica);
            ranges.iter().all(|range| {
                // merged ranges never touch, so coverage means one enclosing range
                let index = theirs.partition_point(|candidate| candidate.high < range.low);
                theirs.get(index).is_some_and(|candidate| {
                    candidate.low <= range.low && candidate.high >= range.high
                })
            })
        })
    }

    /// Set equality as mutual inclusion.
    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        self.is_subset_of(other) && other.is_subset_of(self)
    }

    /// Union of both sets.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (replica, range) in other.iter() {
            merged.insert_raw(*replica, range.low, range.high);
        }
        merged
    }

    /// Encodes as repeated GUID + GLOBSET blocks.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = WireWriter::new();
        self.encode_into(&mut writer);
        writer.into_bytes()
    }

    /// Appends the encoding to `writer`.
    pub fn encode_into(&self, writer: &mut WireWriter) {
        for (replica, ranges) in &self.replicas {
            writer.put_replica_id(replica);
            let raw: Vec<(u64, u64)> = ranges.iter().map(|range| (range.low, range.high)).collect();
            globset::encode(writer, &raw);
        }
    }

    /// Decodes a complete buffer of GUID + GLOBSET blocks.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let mut reader = WireReader::new(bytes);
        let mut set = Self::new();
        while !reader.is_empty() {
            let offset = reader.position();
            let replica = reader.read_replica_id()?;
            if set.replicas.contains_key(&replica) {
                return Err(CoreError::invalid_idset(format!(
                    "replica {replica} repeated at offset {offset}"
                )));
            }
            let ranges = globset::decode(&mut reader)?;
            if ranges.is_empty() {
                return Err(CoreError::invalid_idset(format!(
                    "replica {replica} at offset {offset} has no ranges"
                )));
            }
            for (low, high) in ranges {
                set.insert_raw(replica, low, high);
            }
        }
        Ok(set)
    }
}

impl FromIterator<(ReplicaId, GlobalCounter)> for IdSet {
    fn from_iter<T: IntoIterator<Item = (ReplicaId, GlobalCounter)>>(iter: T) -> Self {
        let mut set = Self::new();
        for (replica, counter) in iter {
            set.insert(replica, counter);
        }
        set
    }
}
