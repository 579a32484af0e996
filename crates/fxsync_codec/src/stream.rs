//! Decoded stream objects.
//!
//! The variant of [`StreamObject`] is fixed by the [`StreamType`] a decode
//! starts with; callers never need to test what they got back.

use fxsync_core::{IdSet, LongTermId, PredecessorChangeList, Xid};

use crate::markers::MetaProperty;
use crate::tags::pid;
use crate::value::{PropValue, PropertyList};

/// Which grammar production a buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// A folder copy: `StartTopFld folderContent EndFolder`.
    TopFolder,
    /// Folder content without the outer markers.
    FolderContent,
    /// Message content without the outer markers.
    MessageContent,
    /// Attachment content without the outer markers.
    AttachmentContent,
    /// A list of messages.
    MessageList,
    /// Incremental contents synchronization.
    ContentsSync,
    /// Incremental hierarchy synchronization.
    HierarchySync,
    /// A checkpoint state.
    State,
}

impl StreamType {
    /// Every stream type.
    pub const ALL: [StreamType; 8] = [
        Self::TopFolder,
        Self::FolderContent,
        Self::MessageContent,
        Self::AttachmentContent,
        Self::MessageList,
        Self::ContentsSync,
        Self::HierarchySync,
        Self::State,
    ];

    /// Lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TopFolder => "top-folder",
            Self::FolderContent => "folder-content",
            Self::MessageContent => "message-content",
            Self::AttachmentContent => "attachment-content",
            Self::MessageList => "message-list",
            Self::ContentsSync => "contents-sync",
            Self::HierarchySync => "hierarchy-sync",
            Self::State => "state",
        }
    }
}

/// A decoded stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamObject {
    /// Folder copy.
    TopFolder(FolderContent),
    /// Folder content.
    FolderContent(FolderContent),
    /// Message content.
    MessageContent(MessageContent),
    /// Attachment content.
    AttachmentContent(AttachmentContent),
    /// Message list.
    MessageList(MessageList),
    /// Contents synchronization.
    ContentsSync(ContentsSync),
    /// Hierarchy synchronization.
    HierarchySync(HierarchySync),
    /// Checkpoint state.
    SyncState(SyncState),
}

impl StreamObject {
    /// The stream type this object decodes from.
    #[must_use]
    pub fn stream_type(&self) -> StreamType {
        match self {
            Self::TopFolder(_) => StreamType::TopFolder,
            Self::FolderContent(_) => StreamType::FolderContent,
            Self::MessageContent(_) => StreamType::MessageContent,
            Self::AttachmentContent(_) => StreamType::AttachmentContent,
            Self::MessageList(_) => StreamType::MessageList,
            Self::ContentsSync(_) => StreamType::ContentsSync,
            Self::HierarchySync(_) => StreamType::HierarchySync,
            Self::SyncState(_) => StreamType::State,
        }
    }
}

/// Element following a folder's own properties.
#[derive(Debug, Clone, PartialEq)]
pub enum FolderChild {
    /// A subfolder.
    Folder(FolderContent),
    /// A message in the folder.
    Message(Message),
    /// A delimiting meta-property.
    Meta(MetaProperty),
}

/// Properties and children of a folder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FolderContent {
    /// Folder properties.
    pub properties: PropertyList,
    /// Children in stream order.
    pub children: Vec<FolderChild>,
}

impl FolderContent {
    /// Creates a folder with no children.
    #[must_use]
    pub fn new(properties: PropertyList) -> Self {
        Self {
            properties,
            children: Vec::new(),
        }
    }

    /// Subfolders in stream order.
    pub fn subfolders(&self) -> impl Iterator<Item = &FolderContent> {
        self.children.iter().filter_map(|child| match child {
            FolderChild::Folder(folder) => Some(folder),
            _ => None,
        })
    }

    /// Messages in stream order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.children.iter().filter_map(|child| match child {
            FolderChild::Message(message) => Some(message),
            _ => None,
        })
    }

    /// Display name, if present.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.properties
            .get(pid::DISPLAY_NAME)
            .and_then(PropValue::as_str)
    }
}

/// A message and whether it is folder-associated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Folder-associated information message.
    pub fai: bool,
    /// Message body.
    pub content: MessageContent,
}

/// Element following a message's own properties.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageChild {
    /// A recipient row.
    Recipient(PropertyList),
    /// An attachment.
    Attachment(AttachmentContent),
    /// A delimiting meta-property.
    Meta(MetaProperty),
}

/// Properties, recipients and attachments of a message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageContent {
    /// Message properties.
    pub properties: PropertyList,
    /// Children in stream order.
    pub children: Vec<MessageChild>,
}

impl MessageContent {
    /// Creates a message with no children.
    #[must_use]
    pub fn new(properties: PropertyList) -> Self {
        Self {
            properties,
            children: Vec::new(),
        }
    }

    /// Recipient rows in order.
    pub fn recipients(&self) -> impl Iterator<Item = &PropertyList> {
        self.children.iter().filter_map(|child| match child {
            MessageChild::Recipient(row) => Some(row),
            _ => None,
        })
    }

    /// Attachments in order.
    pub fn attachments(&self) -> impl Iterator<Item = &AttachmentContent> {
        self.children.iter().filter_map(|child| match child {
            MessageChild::Attachment(attachment) => Some(attachment),
            _ => None,
        })
    }
}

/// Properties of an attachment and its optional embedded message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentContent {
    /// Attachment properties.
    pub properties: PropertyList,
    /// Embedded message.
    pub embedded: Option<Box<MessageContent>>,
}

/// Element of a message list.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageListItem {
    /// A warning ahead of the next message.
    Warning(u32),
    /// A message.
    Message(Message),
}

/// Messages copied by a message-list transfer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageList {
    /// Items in stream order.
    pub items: Vec<MessageListItem>,
}

impl MessageList {
    /// Messages, skipping warnings.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.items.iter().filter_map(|item| match item {
            MessageListItem::Message(message) => Some(message),
            MessageListItem::Warning(_) => None,
        })
    }
}

/// One message change in a contents synchronization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageChange {
    /// Per-message progress block.
    pub progress: Option<PropertyList>,
    /// Change header.
    pub header: PropertyList,
    /// Changed message.
    pub content: MessageContent,
}

impl MessageChange {
    fn header_or_body(&self, tag: crate::tags::PropertyTag) -> Option<&PropValue> {
        self.header
            .get(tag)
            .or_else(|| self.content.properties.get(tag))
    }

    /// Source key of the changed message.
    #[must_use]
    pub fn source_key(&self) -> Option<&LongTermId> {
        self.header_or_body(pid::SOURCE_KEY)
            .and_then(PropValue::as_long_term_id)
    }

    /// Last modification time.
    #[must_use]
    pub fn last_modification_time(&self) -> Option<u64> {
        self.header_or_body(pid::LAST_MODIFICATION_TIME)
            .and_then(PropValue::as_time)
    }

    /// Change key.
    #[must_use]
    pub fn change_key(&self) -> Option<&Xid> {
        self.header_or_body(pid::CHANGE_KEY)
            .and_then(PropValue::as_change_key)
    }

    /// Predecessor change list.
    #[must_use]
    pub fn pcl(&self) -> Option<&PredecessorChangeList> {
        self.header_or_body(pid::PREDECESSOR_CHANGE_LIST)
            .and_then(PropValue::as_pcl)
    }

    /// Returns true for folder-associated messages.
    #[must_use]
    pub fn is_fai(&self) -> bool {
        self.header_or_body(pid::ASSOCIATED)
            .and_then(PropValue::as_bool)
            .unwrap_or(false)
    }
}

/// A stream of message changes plus the resulting state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentsSync {
    /// Whole-stream progress block.
    pub progress: Option<PropertyList>,
    /// Message changes in stream order.
    pub changes: Vec<MessageChange>,
    /// Deletions block.
    pub deletions: Option<PropertyList>,
    /// Read-state block.
    pub read_state: Option<PropertyList>,
    /// State after the changes are applied.
    pub state: SyncState,
}

impl ContentsSync {
    /// Deleted ids, if reported.
    #[must_use]
    pub fn deleted(&self) -> Option<&IdSet> {
        block_idset(self.deletions.as_ref(), pid::IDSET_DELETED)
    }

    /// Ids that left the synchronization scope.
    #[must_use]
    pub fn no_longer_in_scope(&self) -> Option<&IdSet> {
        block_idset(self.deletions.as_ref(), pid::IDSET_NO_LONGER_IN_SCOPE)
    }

    /// Ids removed by expiry.
    #[must_use]
    pub fn expired(&self) -> Option<&IdSet> {
        block_idset(self.deletions.as_ref(), pid::IDSET_EXPIRED)
    }

    /// Messages marked read.
    #[must_use]
    pub fn read(&self) -> Option<&IdSet> {
        block_idset(self.read_state.as_ref(), pid::IDSET_READ)
    }

    /// Messages marked unread.
    #[must_use]
    pub fn unread(&self) -> Option<&IdSet> {
        block_idset(self.read_state.as_ref(), pid::IDSET_UNREAD)
    }
}

/// A stream of folder changes plus the resulting state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchySync {
    /// Folder change property lists in stream order.
    pub folders: Vec<PropertyList>,
    /// Deletions block.
    pub deletions: Option<PropertyList>,
    /// State after the changes are applied.
    pub state: SyncState,
}

impl HierarchySync {
    /// Deleted folder ids, if reported.
    #[must_use]
    pub fn deleted(&self) -> Option<&IdSet> {
        block_idset(self.deletions.as_ref(), pid::IDSET_DELETED)
    }
}

fn block_idset(block: Option<&PropertyList>, tag: crate::tags::PropertyTag) -> Option<&IdSet> {
    block.and_then(|list| list.get(tag)).and_then(PropValue::as_idset)
}

/// Checkpoint state of a synchronization context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    /// Ids the client already has.
    pub idset_given: Option<IdSet>,
    /// Change numbers of normal messages the client has seen.
    pub cnset_seen: Option<IdSet>,
    /// Change numbers of associated messages the client has seen.
    pub cnset_seen_fai: Option<IdSet>,
    /// Read-state change numbers the client has seen.
    pub cnset_read: Option<IdSet>,
    /// Any other state properties, in stream order.
    pub other: PropertyList,
}

impl SyncState {
    /// Returns true if no state property is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.idset_given.is_none()
            && self.cnset_seen.is_none()
            && self.cnset_seen_fai.is_none()
            && self.cnset_read.is_none()
            && self.other.is_empty()
    }

    pub(crate) fn from_properties(properties: PropertyList) -> Self {
        let mut state = Self::default();
        for property in properties.iter() {
            let slot = match property.tag {
                pid::IDSET_GIVEN | pid::IDSET_GIVEN_BINARY => &mut state.idset_given,
                pid::CNSET_SEEN => &mut state.cnset_seen,
                pid::CNSET_SEEN_FAI => &mut state.cnset_seen_fai,
                pid::CNSET_READ => &mut state.cnset_read,
                _ => {
                    state.other.push(property.clone());
                    continue;
                }
            };
            match &property.value {
                PropValue::IdSet(set) => *slot = Some(set.clone()),
                _ => state.other.push(property.clone()),
            }
        }
        state
    }

    pub(crate) fn to_properties(&self) -> PropertyList {
        let mut list = PropertyList::new();
        let slots = [
            (pid::IDSET_GIVEN, &self.idset_given),
            (pid::CNSET_SEEN, &self.cnset_seen),
            (pid::CNSET_SEEN_FAI, &self.cnset_seen_fai),
            (pid::CNSET_READ, &self.cnset_read),
        ];
        for (tag, slot) in slots {
            if let Some(set) = slot {
                list = list.with(tag, PropValue::IdSet(set.clone()));
            }
        }
        for property in self.other.iter() {
            list.push(property.clone());
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxsync_core::{GlobalCounter, ReplicaId};

    #[test]
    fn folder_helpers_filter_children() {
        let mut folder = FolderContent::new(
            PropertyList::new().with(pid::DISPLAY_NAME, PropValue::String("Root".into())),
        );
        folder.children.push(FolderChild::Folder(FolderContent::default()));
        folder.children.push(FolderChild::Meta(MetaProperty::EcWarning(1)));
        folder.children.push(FolderChild::Message(Message::default()));
        assert_eq!(folder.subfolders().count(), 1);
        assert_eq!(folder.messages().count(), 1);
        assert_eq!(folder.display_name(), Some("Root"));
    }

    #[test]
    fn state_properties_roundtrip() {
        let mut seen = IdSet::new();
        seen.insert(ReplicaId::from_bytes([1; 16]), GlobalCounter::new(3).unwrap());
        let state = SyncState {
            cnset_seen: Some(seen),
            ..SyncState::default()
        };
        let back = SyncState::from_properties(state.to_properties());
        assert_eq!(back, state);
        assert!(!back.is_empty());
        assert!(SyncState::default().is_empty());
    }

    #[test]
    fn change_reads_header_first() {
        let change = MessageChange {
            header: PropertyList::new().with(pid::LAST_MODIFICATION_TIME, PropValue::Time(10)),
            content: MessageContent::new(
                PropertyList::new().with(pid::LAST_MODIFICATION_TIME, PropValue::Time(20)),
            ),
            ..MessageChange::default()
        };
        assert_eq!(change.last_modification_time(), Some(10));
        assert!(!change.is_fai());
    }

    #[test]
    fn stream_type_names_are_distinct() {
        let mut names: Vec<&str> = StreamType::ALL.iter().map(|t| t.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), StreamType::ALL.len());
    }
}
