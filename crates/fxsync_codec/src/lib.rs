//! # fxsync codec
//!
//! Encoding and decoding of FastTransfer streams.
//!
//! A stream is a flat sequence of 4-byte little-endian markers and tagged
//! property records. Markers open and close folders, messages, recipients,
//! attachments and synchronization blocks; property records carry a tag
//! (property id in the high 16 bits, type in the low 16 bits) followed by
//! a value whose width depends on the type.
//!
//! ## Value encoding
//!
//! - Fixed-width scalars are little-endian; booleans take 2 bytes
//! - Strings, binaries and server ids carry a 2-byte length prefix
//! - Multi-valued properties carry a 4-byte count, then the values
//! - Named properties (id 0x8000 and up) carry their name after the tag
//!
//! IDSET, CNSET, source key, change key and predecessor change list
//! properties are resolved into `fxsync_core` types while decoding.
//!
//! ## Usage
//!
//! ```
//! use fxsync_codec::{
//!     decode_stream, encode_stream, pid, FolderContent, PropValue, PropertyList, StreamObject,
//!     StreamType,
//! };
//!
//! let folder = FolderContent::new(
//!     PropertyList::new().with(pid::DISPLAY_NAME, PropValue::String("Inbox".into())),
//! );
//! let bytes = encode_stream(&StreamObject::TopFolder(folder.clone())).unwrap();
//! let decoded = decode_stream(&bytes, StreamType::TopFolder).unwrap();
//! assert_eq!(decoded, StreamObject::TopFolder(folder));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod markers;
mod ordering;
mod stream;
mod tags;
mod value;

pub use decoder::{decode_stream, StreamDecoder, MAX_DEPTH};
pub use encoder::{encode_properties, encode_stream, StreamEncoder};
pub use error::{CodecError, CodecResult};
pub use markers::{is_delimiter, Marker, MetaProperty, MetaTag};
pub use ordering::{
    verify_change_order, verify_contents_order, verify_hierarchy_order, verify_parent_order,
    OrderingPolicy,
};
pub use stream::{
    AttachmentContent, ContentsSync, FolderChild, FolderContent, HierarchySync, Message,
    MessageChange, MessageChild, MessageContent, MessageList, MessageListItem, StreamObject,
    StreamType, SyncState,
};
pub use tags::{pid, NameKind, PropertyName, PropertyTag, PropertyType};
pub use value::{PropValue, PropertyList, TaggedProperty};

/// Types that serialize to a FastTransfer stream.
pub trait Encode {
    /// Encode this value to stream bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Types that deserialize from a FastTransfer stream of a known type.
pub trait Decode: Sized {
    /// Decode a complete buffer.
    fn decode(bytes: &[u8], kind: StreamType) -> CodecResult<Self>;
}

impl Encode for StreamObject {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        encode_stream(self)
    }
}

impl Decode for StreamObject {
    fn decode(bytes: &[u8], kind: StreamType) -> CodecResult<Self> {
        decode_stream(bytes, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxsync_core::{GlobalCounter, PredecessorChangeList, ReplicaId, Xid};

    fn replica() -> ReplicaId {
        ReplicaId::from_bytes([0x11; 16])
    }

    #[test]
    fn roundtrip_contents_sync() {
        let xid = Xid::new(replica(), GlobalCounter::new(7).unwrap());
        let header = PropertyList::new()
            .with(pid::CHANGE_KEY, PropValue::ChangeKey(xid))
            .with(
                pid::PREDECESSOR_CHANGE_LIST,
                PropValue::Pcl(PredecessorChangeList::from_entries(vec![xid])),
            )
            .with(pid::LAST_MODIFICATION_TIME, PropValue::Time(1000))
            .with(pid::ASSOCIATED, PropValue::Boolean(false));
        let mut content = MessageContent::new(
            PropertyList::new().with(pid::SUBJECT, PropValue::String("hi".into())),
        );
        content.children.push(MessageChild::Recipient(
            PropertyList::new().with(pid::RECIPIENT_TYPE, PropValue::Int32(1)),
        ));
        content.children.push(MessageChild::Attachment(AttachmentContent {
            properties: PropertyList::new().with(pid::ATTACH_NUMBER, PropValue::Int32(0)),
            embedded: Some(Box::new(MessageContent::default())),
        }));
        let sync = ContentsSync {
            progress: Some(PropertyList::new()),
            changes: vec![MessageChange {
                progress: Some(PropertyList::new().with(pid::MESSAGE_SIZE, PropValue::Int32(10))),
                header,
                content,
            }],
            deletions: Some(PropertyList::new()),
            read_state: None,
            state: SyncState::default(),
        };
        let object = StreamObject::ContentsSync(sync);
        let bytes = object.encode().unwrap();
        assert_eq!(StreamObject::decode(&bytes, StreamType::ContentsSync).unwrap(), object);
    }

    #[test]
    fn roundtrip_multi_and_named_values() {
        let name = PropertyName {
            guid: uuid::Uuid::from_u128(0x0002_0329_0000_0000_C000_0000_0000_0046),
            kind: NameKind::Lid(0x8501),
        };
        let mut properties = PropertyList::new()
            .with(
                PropertyTag::multi(0x0100, PropertyType::String),
                PropValue::Multiple(vec![
                    PropValue::String("a".into()),
                    PropValue::String("bc".into()),
                ]),
            )
            .with(
                PropertyTag::new(0x0101, PropertyType::Guid),
                PropValue::Guid(uuid::Uuid::from_u128(42)),
            )
            .with(pid::DN_PREFIX, PropValue::String8(b"/o=org".to_vec()));
        properties.push(TaggedProperty::named(
            PropertyTag::new(0x8010, PropertyType::Time),
            name,
            PropValue::Time(5),
        ));
        let object = StreamObject::MessageContent(MessageContent::new(properties));
        let bytes = encode_stream(&object).unwrap();
        assert_eq!(decode_stream(&bytes, StreamType::MessageContent).unwrap(), object);
    }
}
