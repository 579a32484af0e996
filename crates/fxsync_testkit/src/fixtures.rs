//! Test fixtures for replicas, identifiers and common streams.

use fxsync_codec::{
    encode_stream, pid, ContentsSync, FolderChild, FolderContent, MessageChange, MessageContent,
    PropValue, PropertyList, StreamObject, SyncState,
};
use fxsync_core::{
    ConflictVerdict, GlobalCounter, IdSet, IdentifierTable, LongTermId, PredecessorChangeList,
    ReplicaId, ReplicaIndex, ShortTermId, Xid,
};

/// Replica index the fixtures register their replica under.
pub const FIXTURE_REPLICA_INDEX: ReplicaIndex = 1;

/// The replica every fixture is built on.
pub fn fixture_replica() -> ReplicaId {
    ReplicaId::from_bytes([
        0x9B, 0x4E, 0x1F, 0x35, 0x6C, 0x21, 0x4A, 0x8D, 0xB2, 0x07, 0x5E, 0x33, 0xC8, 0x71, 0x0A,
        0xE4,
    ])
}

/// A second replica, for concurrency scenarios.
pub fn other_replica() -> ReplicaId {
    ReplicaId::from_bytes([0x22; 16])
}

/// Builds a counter, panicking outside 48 bits.
pub fn counter(value: u64) -> GlobalCounter {
    GlobalCounter::new(value).expect("counter fits in 48 bits")
}

/// Builds an XID on `replica`.
pub fn xid(replica: ReplicaId, value: u64) -> Xid {
    Xid::new(replica, counter(value))
}

/// Builds a PCL from `(replica, counter)` pairs, in order.
pub fn pcl(entries: &[(ReplicaId, u64)]) -> PredecessorChangeList {
    PredecessorChangeList::from_entries(
        entries
            .iter()
            .map(|(replica, value)| xid(*replica, *value))
            .collect(),
    )
}

/// A PCL that relates to `server` the way `verdict` says.
///
/// `AIncludesB` records one more edit on the change key's replica,
/// `BIncludesA` steps the change key back by one, and `Concurrent` steps it
/// back and adds an edit from [`other_replica`] the server never saw.
pub fn diverged_pcl(
    server: &PredecessorChangeList,
    verdict: ConflictVerdict,
) -> PredecessorChangeList {
    let key = *server.change_key().expect("server PCL has a change key");
    let older = Xid::new(key.replica, key.counter.checked_sub(1).expect("counter above one"));
    match verdict {
        ConflictVerdict::Equal => server.clone(),
        ConflictVerdict::AIncludesB => {
            let mut pcl = server.clone();
            let newer = key.counter.checked_add(1).expect("counter below the 48-bit limit");
            pcl.record(Xid::new(key.replica, newer)).expect("newer counter");
            pcl
        }
        ConflictVerdict::BIncludesA => PredecessorChangeList::from_entries(vec![older]),
        ConflictVerdict::Concurrent => {
            let unseen = server
                .counter_for(&other_replica())
                .map_or(1, |seen| seen.value() + 1);
            PredecessorChangeList::from_entries(vec![older, xid(other_replica(), unseen)])
        }
    }
}

/// A folder change as a hierarchy download carries it.
///
/// The change key is the last entry of `pcl`.
pub fn folder_change(source: u64, pcl: PredecessorChangeList, modified: u64) -> PropertyList {
    let change_key = *pcl.change_key().expect("folder PCL has an entry");
    PropertyList::new()
        .with(pid::PARENT_SOURCE_KEY, PropValue::Binary(Vec::new()))
        .with(
            pid::SOURCE_KEY,
            PropValue::LongTermId(LongTermId::new(fixture_replica(), counter(source))),
        )
        .with(pid::LAST_MODIFICATION_TIME, PropValue::Time(modified))
        .with(pid::CHANGE_KEY, PropValue::ChangeKey(change_key))
        .with(pid::PREDECESSOR_CHANGE_LIST, PropValue::Pcl(pcl))
        .with(pid::DISPLAY_NAME, PropValue::String(format!("folder {source}")))
}

/// An IDSET holding `low..=high` on the fixture replica.
pub fn idset(low: u64, high: u64) -> IdSet {
    let mut set = IdSet::new();
    set.insert_range(fixture_replica(), counter(low), counter(high))
        .expect("ordered range");
    set
}

/// An identifier table with the fixture replica registered.
pub fn identifier_table() -> IdentifierTable {
    let mut table = IdentifierTable::new();
    table
        .register_replica(FIXTURE_REPLICA_INDEX, fixture_replica())
        .expect("fresh table accepts the fixture replica");
    table
}

/// A top-folder stream with one "Inbox" subfolder.
///
/// The subfolder's folder id is the short-term form of
/// [`InboxFixture::inbox`] under [`FIXTURE_REPLICA_INDEX`].
#[derive(Debug, Clone)]
pub struct InboxFixture {
    /// The Inbox's long-term id.
    pub inbox: LongTermId,
    /// The Inbox's short-term id.
    pub inbox_id: ShortTermId,
    /// The decoded form of the stream.
    pub folder: FolderContent,
    /// The encoded stream.
    pub bytes: Vec<u8>,
}

impl InboxFixture {
    /// Counter the Inbox was created with.
    pub const INBOX_COUNTER: u64 = 0x0000_0001_0042;

    /// Builds the fixture.
    pub fn new() -> Self {
        let inbox = LongTermId::new(fixture_replica(), counter(Self::INBOX_COUNTER));
        let inbox_id = identifier_table()
            .derive_short_term(&inbox)
            .expect("fixture replica is registered");

        let child = FolderContent::new(
            PropertyList::new()
                .with(pid::DISPLAY_NAME, PropValue::String("Inbox".into()))
                .with(pid::FOLDER_ID, PropValue::Int64(inbox_id.raw() as i64)),
        );
        let mut folder = FolderContent::new(
            PropertyList::new()
                .with(pid::DISPLAY_NAME, PropValue::String("Top of Information Store".into())),
        );
        folder.children.push(FolderChild::Folder(child));

        let bytes = encode_stream(&StreamObject::TopFolder(folder.clone()))
            .expect("fixture stream encodes");
        Self {
            inbox,
            inbox_id,
            folder,
            bytes,
        }
    }
}

impl Default for InboxFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A message change with the identification header a download carries.
pub fn message_change(source: u64, change: u64, modified: u64) -> MessageChange {
    let change_key = xid(fixture_replica(), change);
    MessageChange {
        progress: None,
        header: PropertyList::new()
            .with(
                pid::SOURCE_KEY,
                PropValue::LongTermId(LongTermId::new(fixture_replica(), counter(source))),
            )
            .with(pid::LAST_MODIFICATION_TIME, PropValue::Time(modified))
            .with(pid::CHANGE_KEY, PropValue::ChangeKey(change_key))
            .with(
                pid::PREDECESSOR_CHANGE_LIST,
                PropValue::Pcl(PredecessorChangeList::from_entries(vec![change_key])),
            )
            .with(pid::ASSOCIATED, PropValue::Boolean(false)),
        content: MessageContent::new(
            PropertyList::new().with(pid::SUBJECT, PropValue::String(format!("message {source}"))),
        ),
    }
}

/// A contents synchronization download.
///
/// `changes` are `(source counter, change counter, modification time)`
/// triples in stream order. The final state covers every source id and
/// change number.
pub fn contents_sync(changes: &[(u64, u64, u64)]) -> ContentsSync {
    let mut given = IdSet::new();
    let mut seen = IdSet::new();
    for (source, change, _) in changes {
        given.insert(fixture_replica(), counter(*source));
        seen.insert(fixture_replica(), counter(*change));
    }
    ContentsSync {
        changes: changes
            .iter()
            .map(|(source, change, modified)| message_change(*source, *change, *modified))
            .collect(),
        state: SyncState {
            idset_given: Some(given),
            cnset_seen: Some(seen),
            ..SyncState::default()
        },
        ..ContentsSync::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_id_resolves_back() {
        let fixture = InboxFixture::new();
        let table = identifier_table();
        assert_eq!(table.derive_long_term(fixture.inbox_id).unwrap(), fixture.inbox);
        assert_eq!(fixture.inbox_id.replica_index(), FIXTURE_REPLICA_INDEX);
    }

    #[test]
    fn diverged_pcl_has_the_requested_relation() {
        let server = pcl(&[(other_replica(), 3), (fixture_replica(), 0x40)]);
        for verdict in [
            ConflictVerdict::AIncludesB,
            ConflictVerdict::BIncludesA,
            ConflictVerdict::Equal,
            ConflictVerdict::Concurrent,
        ] {
            assert_eq!(diverged_pcl(&server, verdict).compare(&server), verdict);
        }
    }

    #[test]
    fn contents_sync_state_covers_changes() {
        let sync = contents_sync(&[(10, 100, 3), (11, 101, 2)]);
        assert_eq!(sync.changes.len(), 2);
        let seen = sync.state.cnset_seen.unwrap();
        assert!(seen.contains(&fixture_replica(), counter(100)));
        assert!(seen.contains(&fixture_replica(), counter(101)));
    }
}
