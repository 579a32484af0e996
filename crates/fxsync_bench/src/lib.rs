//! Benchmark utilities.

use fxsync_codec::{
    pid, ContentsSync, FolderChild, FolderContent, Message, MessageChange, MessageChild,
    MessageContent, PropValue, PropertyList, SyncState,
};
use fxsync_core::{GlobalCounter, IdSet, LongTermId, PredecessorChangeList, ReplicaId, Xid};

/// Replica used by every generated value.
pub fn bench_replica(n: u8) -> ReplicaId {
    ReplicaId::from_bytes([n; 16])
}

fn counter(value: u64) -> GlobalCounter {
    GlobalCounter::new(value & GlobalCounter::MAX).unwrap_or_default()
}

/// A message with `recipients` recipient rows and a body of `body` bytes.
pub fn message(index: usize, recipients: usize, body: usize) -> MessageContent {
    let mut content = MessageContent::new(
        PropertyList::new()
            .with(pid::SUBJECT, PropValue::String(format!("message {index}")))
            .with(pid::MESSAGE_SIZE, PropValue::Int32(body as i32))
            .with(pid::ATTACH_DATA_BINARY, PropValue::Binary(vec![0xA5; body])),
    );
    for row in 0..recipients {
        content.children.push(MessageChild::Recipient(
            PropertyList::new().with(pid::RECIPIENT_TYPE, PropValue::Int32(row as i32 + 1)),
        ));
    }
    content
}

/// A folder tree `depth` levels deep, `width` subfolders and messages per level.
pub fn folder_tree(depth: usize, width: usize) -> FolderContent {
    let mut folder = FolderContent::new(
        PropertyList::new().with(pid::DISPLAY_NAME, PropValue::String(format!("depth {depth}"))),
    );
    for index in 0..width {
        folder.children.push(FolderChild::Message(Message {
            fai: false,
            content: message(index, 2, 64),
        }));
    }
    if depth > 0 {
        for _ in 0..width {
            folder
                .children
                .push(FolderChild::Folder(folder_tree(depth - 1, width)));
        }
    }
    folder
}

/// A contents synchronization of `count` changes in descending time order.
pub fn contents_sync(count: usize) -> ContentsSync {
    let replica = bench_replica(1);
    let mut given = IdSet::new();
    let mut seen = IdSet::new();
    let changes = (0..count as u64)
        .map(|index| {
            let change_key = Xid::new(replica, counter(0x1000 + index));
            given.insert(replica, counter(index + 1));
            seen.insert(replica, change_key.counter);
            MessageChange {
                progress: None,
                header: PropertyList::new()
                    .with(
                        pid::SOURCE_KEY,
                        PropValue::LongTermId(LongTermId::new(replica, counter(index + 1))),
                    )
                    .with(pid::LAST_MODIFICATION_TIME, PropValue::Time(u64::MAX / 2 - index))
                    .with(pid::CHANGE_KEY, PropValue::ChangeKey(change_key))
                    .with(
                        pid::PREDECESSOR_CHANGE_LIST,
                        PropValue::Pcl(PredecessorChangeList::from_entries(vec![change_key])),
                    ),
                content: message(index as usize, 1, 32),
            }
        })
        .collect();
    ContentsSync {
        changes,
        state: SyncState {
            idset_given: Some(given),
            cnset_seen: Some(seen),
            ..SyncState::default()
        },
        ..ContentsSync::default()
    }
}

/// An IDSET of `ranges` ranges of `span` counters each, spread over `replicas` replicas.
pub fn sparse_idset(replicas: u8, ranges: u64, span: u64) -> IdSet {
    let mut set = IdSet::new();
    for n in 1..=replicas {
        for index in 0..ranges {
            let low = index * span * 3 + 1;
            // ranges leave gaps so the set stays sparse
            let _ = set.insert_range(bench_replica(n), counter(low), counter(low + span - 1));
        }
    }
    set
}

/// A PCL with one entry per replica.
pub fn wide_pcl(replicas: u8, base: u64) -> PredecessorChangeList {
    PredecessorChangeList::from_entries(
        (1..=replicas)
            .map(|n| Xid::new(bench_replica(n), counter(base + u64::from(n))))
            .collect(),
    )
}
