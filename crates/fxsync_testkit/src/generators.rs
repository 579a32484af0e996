//! Property-based test generators using proptest.
//!
//! Strategies produce values that satisfy the invariants of their types:
//! counters stay within 48 bits, IDSETs are built through `insert_range`,
//! and stream object graphs only carry values that survive a round trip.

use fxsync_codec::{
    pid, FolderChild, FolderContent, Message, MessageChild, MessageContent, PropValue,
    PropertyList,
};
use fxsync_core::{GlobalCounter, IdSet, PredecessorChangeList, ReplicaId, ShortTermId, Xid};
use proptest::prelude::*;

/// Largest counter produced by the small-counter strategies.
pub const SMALL_COUNTER_MAX: u64 = 0x1_0000;

/// Replicas shared by the pooled strategies so generated values overlap.
pub fn replica_pool() -> Vec<ReplicaId> {
    (1..=3u8)
        .map(|n| ReplicaId::from_bytes([n; 16]))
        .collect()
}

/// Strategy for arbitrary replica GUIDs.
pub fn replica_id_strategy() -> impl Strategy<Value = ReplicaId> {
    prop::array::uniform16(any::<u8>()).prop_map(ReplicaId::from_bytes)
}

/// Strategy for one of the [`replica_pool`] replicas.
pub fn pooled_replica_strategy() -> impl Strategy<Value = ReplicaId> {
    prop::sample::select(replica_pool())
}

/// Strategy for any valid 48-bit counter.
pub fn global_counter_strategy() -> impl Strategy<Value = GlobalCounter> {
    (0..=GlobalCounter::MAX).prop_map(|value| GlobalCounter::new(value).expect("48-bit counter"))
}

/// Strategy for counters in `1..SMALL_COUNTER_MAX`.
pub fn small_counter_strategy() -> impl Strategy<Value = GlobalCounter> {
    (1..SMALL_COUNTER_MAX).prop_map(|value| GlobalCounter::new(value).expect("small counter"))
}

/// Strategy for short-term ids.
pub fn short_term_id_strategy() -> impl Strategy<Value = ShortTermId> {
    (any::<u16>(), global_counter_strategy())
        .prop_map(|(index, counter)| ShortTermId::new(index, counter))
}

/// Strategy for IDSETs over the pooled replicas.
///
/// Ranges may overlap or touch; the set merges them.
pub fn idset_strategy() -> impl Strategy<Value = IdSet> {
    prop::collection::vec(
        (pooled_replica_strategy(), 1..SMALL_COUNTER_MAX, 0u64..64),
        0..12,
    )
    .prop_map(|ranges| {
        let mut set = IdSet::new();
        for (replica, low, len) in ranges {
            let high = (low + len).min(GlobalCounter::MAX);
            set.insert_range(
                replica,
                GlobalCounter::new(low).expect("low counter"),
                GlobalCounter::new(high).expect("high counter"),
            )
            .expect("ordered range");
        }
        set
    })
}

/// Strategy for XIDs over the pooled replicas.
pub fn xid_strategy() -> impl Strategy<Value = Xid> {
    (pooled_replica_strategy(), small_counter_strategy())
        .prop_map(|(replica, counter)| Xid::new(replica, counter))
}

/// Strategy for predecessor change lists with at most one entry per replica.
pub fn pcl_strategy() -> impl Strategy<Value = PredecessorChangeList> {
    prop::collection::vec(xid_strategy(), 0..4).prop_map(|xids| {
        let mut pcl = PredecessorChangeList::new();
        for xid in xids {
            // stale entries are skipped; the list keeps the newest per replica
            let _ = pcl.record(xid);
        }
        pcl
    })
}

fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 ]{0,24}").expect("Invalid regex")
}

/// Strategy for plain (non-identifier) property lists.
pub fn property_list_strategy() -> impl Strategy<Value = PropertyList> {
    (
        prop::option::of(text_strategy()),
        prop::option::of(any::<i32>()),
        prop::option::of(0u64..0x01E0_0000_0000_0000),
        prop::option::of(any::<bool>()),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..64)),
    )
        .prop_map(|(subject, size, time, flag, body)| {
            let mut list = PropertyList::new();
            if let Some(subject) = subject {
                list = list.with(pid::SUBJECT, PropValue::String(subject));
            }
            if let Some(size) = size {
                list = list.with(pid::MESSAGE_SIZE, PropValue::Int32(size));
            }
            if let Some(time) = time {
                list = list.with(pid::LAST_MODIFICATION_TIME, PropValue::Time(time));
            }
            if let Some(flag) = flag {
                list = list.with(pid::ASSOCIATED, PropValue::Boolean(flag));
            }
            if let Some(body) = body {
                list = list.with(pid::ATTACH_DATA_BINARY, PropValue::Binary(body));
            }
            list
        })
}

/// Strategy for messages with recipient rows.
pub fn message_strategy() -> impl Strategy<Value = Message> {
    (
        any::<bool>(),
        property_list_strategy(),
        prop::collection::vec(property_list_strategy(), 0..3),
    )
        .prop_map(|(fai, properties, recipients)| Message {
            fai,
            content: MessageContent {
                properties,
                children: recipients.into_iter().map(MessageChild::Recipient).collect(),
            },
        })
}

fn folder_name_strategy() -> impl Strategy<Value = PropertyList> {
    prop::string::string_regex("[A-Z][a-z]{0,11}")
        .expect("Invalid regex")
        .prop_map(|name| PropertyList::new().with(pid::DISPLAY_NAME, PropValue::String(name)))
}

/// Strategy for folder trees up to `depth` levels of subfolders.
pub fn folder_content_strategy(depth: u32) -> impl Strategy<Value = FolderContent> {
    let leaf = (folder_name_strategy(), prop::collection::vec(message_strategy(), 0..3))
        .prop_map(|(properties, messages)| FolderContent {
            properties,
            children: messages.into_iter().map(FolderChild::Message).collect(),
        });
    leaf.prop_recursive(depth, 16, 3, |inner| {
        (
            folder_name_strategy(),
            prop::collection::vec(message_strategy(), 0..2),
            prop::collection::vec(inner, 0..3),
        )
            .prop_map(|(properties, messages, folders)| FolderContent {
                properties,
                children: messages
                    .into_iter()
                    .map(FolderChild::Message)
                    .chain(folders.into_iter().map(FolderChild::Folder))
                    .collect(),
            })
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn counters_fit_in_48_bits(counter in global_counter_strategy()) {
            prop_assert!(counter.value() <= GlobalCounter::MAX);
        }

        #[test]
        fn pcl_keeps_one_entry_per_replica(pcl in pcl_strategy()) {
            let mut replicas: Vec<_> = pcl.entries().iter().map(|xid| xid.replica).collect();
            let total = replicas.len();
            replicas.sort();
            replicas.dedup();
            prop_assert_eq!(replicas.len(), total);
        }

        #[test]
        fn idsets_use_pooled_replicas(set in idset_strategy()) {
            let pool = replica_pool();
            prop_assert!(set.replicas().all(|replica| pool.contains(replica)));
        }
    }
}
