//! Typed arenas for session-scoped tables.
//!
//! Every table hands out a strongly typed index. Indexes are never reused,
//! not even after [`Arena::clear`], so a stale index always fails lookup
//! with [`SyncError::InvalidHandle`].

use crate::error::{SyncError, SyncResult};
use std::fmt;
use std::marker::PhantomData;

/// An index type that names entries of one arena.
pub trait ArenaIndex: Copy {
    /// Table name used in error messages.
    const KIND: &'static str;

    /// Builds the index from its raw value.
    fn from_raw(raw: u32) -> Self;

    /// Raw value of the index.
    fn raw(self) -> u32;
}

macro_rules! arena_index {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl ArenaIndex for $name {
            const KIND: &'static str = $kind;

            fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $kind, self.0)
            }
        }
    };
}

arena_index!(
    /// A server object handle registered with the session.
    HandleId,
    "handle"
);
arena_index!(
    /// A short-term id registered with the session.
    ObjectId,
    "object"
);
arena_index!(
    /// A cached synchronization state.
    StateIndex,
    "state"
);
arena_index!(
    /// A completed raw download.
    BufferId,
    "buffer"
);

/// A growable table of entries addressed by `I`.
#[derive(Debug, Clone)]
pub struct Arena<I, T> {
    base: u32,
    slots: Vec<Option<T>>,
    _index: PhantomData<I>,
}

impl<I: ArenaIndex, T> Arena<I, T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            base: 0,
            slots: Vec::new(),
            _index: PhantomData,
        }
    }

    /// Stores `value` and returns its index.
    pub fn insert(&mut self, value: T) -> I {
        let raw = self.base + self.slots.len() as u32;
        self.slots.push(Some(value));
        I::from_raw(raw)
    }

    /// Looks up an entry.
    pub fn get(&self, index: I) -> SyncResult<&T> {
        self.slot(index)
            .and_then(|slot| self.slots[slot].as_ref())
            .ok_or_else(|| Self::missing(index))
    }

    /// Looks up an entry for mutation.
    pub fn get_mut(&mut self, index: I) -> SyncResult<&mut T> {
        match self.slot(index) {
            Some(slot) => self.slots[slot].as_mut().ok_or_else(|| Self::missing(index)),
            None => Err(Self::missing(index)),
        }
    }

    /// Removes an entry; its index stays invalid afterwards.
    pub fn remove(&mut self, index: I) -> SyncResult<T> {
        match self.slot(index) {
            Some(slot) => self.slots[slot].take().ok_or_else(|| Self::missing(index)),
            None => Err(Self::missing(index)),
        }
    }

    /// Returns true if `index` names a live entry.
    pub fn contains(&self, index: I) -> bool {
        self.get(index).is_ok()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over live entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        let base = self.base;
        self.slots.iter().enumerate().filter_map(move |(offset, slot)| {
            slot.as_ref()
                .map(|value| (I::from_raw(base + offset as u32), value))
        })
    }

    /// Drops every entry. Indexes handed out before stay invalid.
    pub fn clear(&mut self) {
        self.base += self.slots.len() as u32;
        self.slots.clear();
    }

    fn slot(&self, index: I) -> Option<usize> {
        let offset = index.raw().checked_sub(self.base)? as usize;
        (offset < self.slots.len()).then_some(offset)
    }

    fn missing(index: I) -> SyncError {
        SyncError::InvalidHandle {
            kind: I::KIND,
            index: index.raw(),
        }
    }
}

impl<I: ArenaIndex, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let mut arena: Arena<HandleId, &str> = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_ne!(a, b);
        assert_eq!(*arena.get(a).unwrap(), "a");
        assert_eq!(*arena.get(b).unwrap(), "b");
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn removed_index_is_invalid() {
        let mut arena: Arena<ObjectId, u64> = Arena::new();
        let id = arena.insert(7);
        assert_eq!(arena.remove(id).unwrap(), 7);
        let err = arena.get(id).unwrap_err();
        assert!(matches!(err, SyncError::InvalidHandle { kind: "object", index: 0 }));
        assert!(arena.remove(id).is_err());
    }

    #[test]
    fn clear_never_reuses_indexes() {
        let mut arena: Arena<StateIndex, u8> = Arena::new();
        let old = arena.insert(1);
        arena.clear();
        assert!(arena.is_empty());
        let new = arena.insert(2);
        assert_ne!(old, new);
        assert!(arena.get(old).is_err());
        assert_eq!(*arena.get(new).unwrap(), 2);
    }

    #[test]
    fn unknown_index_is_invalid() {
        let arena: Arena<BufferId, Vec<u8>> = Arena::new();
        let err = arena.get(BufferId::from_raw(3)).unwrap_err();
        assert_eq!(err.to_string(), "invalid buffer index 3");
    }

    #[test]
    fn iter_skips_removed() {
        let mut arena: Arena<HandleId, u8> = Arena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        arena.remove(a).unwrap();
        let live: Vec<_> = arena.iter().collect();
        assert_eq!(live, vec![(b, &2)]);
        assert_eq!(b.to_string(), "handle#1");
    }
}
