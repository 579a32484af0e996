//! Property tests over the identifier, version-vector and stream layers.

use fxsync_codec::{decode_stream, encode_stream, StreamObject, StreamType};
use fxsync_core::{ConflictVerdict, IdSet, PredecessorChangeList, ShortTermId};
use fxsync_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(PropTestConfig::default().to_proptest_config())]

    #[test]
    fn idset_reencodes_byte_identical(set in idset_strategy()) {
        let bytes = set.encode();
        let decoded = IdSet::decode(&bytes).unwrap();
        prop_assert!(decoded.equals(&set));
        prop_assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn union_covers_both_operands(a in idset_strategy(), b in idset_strategy()) {
        let union = a.union(&b);
        prop_assert!(a.is_subset_of(&union));
        prop_assert!(b.is_subset_of(&union));
        prop_assert!(union.counter_count() <= a.counter_count() + b.counter_count());
    }

    #[test]
    fn subset_is_a_partial_order(
        a in idset_strategy(),
        b in idset_strategy(),
        c in idset_strategy(),
    ) {
        prop_assert!(a.is_subset_of(&a));
        if a.is_subset_of(&b) && b.is_subset_of(&a) {
            prop_assert!(a.equals(&b));
        }
        let ab = a.union(&b);
        let abc = ab.union(&c);
        prop_assert!(a.is_subset_of(&ab) && ab.is_subset_of(&abc) && a.is_subset_of(&abc));
    }

    #[test]
    fn pcl_compare_is_antisymmetric(a in pcl_strategy(), b in pcl_strategy()) {
        prop_assert_eq!(a.compare(&b), b.compare(&a).inverse());
        prop_assert_eq!(a.compare(&a), ConflictVerdict::Equal);
    }

    #[test]
    fn pcl_survives_encoding(pcl in pcl_strategy()) {
        prop_assume!(!pcl.is_empty());
        let decoded = PredecessorChangeList::decode(&pcl.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded.compare(&pcl), ConflictVerdict::Equal);
        prop_assert_eq!(decoded.entries(), pcl.entries());
    }

    #[test]
    fn short_term_id_splits_into_parts(id in short_term_id_strategy()) {
        prop_assert_eq!(ShortTermId::new(id.replica_index(), id.counter()), id);
    }
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn top_folder_stream_round_trips(folder in folder_content_strategy(3)) {
        let object = StreamObject::TopFolder(folder);
        let bytes = encode_stream(&object).unwrap();
        prop_assert_eq!(decode_stream(&bytes, StreamType::TopFolder).unwrap(), object);
    }

    #[test]
    fn message_content_round_trips(message in message_strategy()) {
        let object = StreamObject::MessageContent(message.content);
        let bytes = encode_stream(&object).unwrap();
        prop_assert_eq!(decode_stream(&bytes, StreamType::MessageContent).unwrap(), object);
    }
}

#[test]
fn newer_counter_on_same_replica_includes_older() {
    let a = pcl(&[(fixture_replica(), 5)]);
    let b = pcl(&[(fixture_replica(), 3)]);
    assert_eq!(a.compare(&b), ConflictVerdict::AIncludesB);
    assert_eq!(b.compare(&a), ConflictVerdict::BIncludesA);
}

#[test]
fn disjoint_replicas_are_concurrent() {
    let a = pcl(&[(fixture_replica(), 5)]);
    let b = pcl(&[(other_replica(), 1)]);
    assert_eq!(a.compare(&b), ConflictVerdict::Concurrent);
}

#[test]
fn vectors_export_as_json() {
    let json = all_vectors_json();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    for group in ["idset", "pcl", "short_term_id", "stream"] {
        assert!(!parsed[group].as_array().unwrap().is_empty(), "{group} is empty");
    }
}
