//! FastTransfer stream encoder.
//!
//! Emits markers and property records in the same structural order the
//! decoder reads them, so `decode(encode(x)) == x` for any object the
//! encoder accepts.

use fxsync_core::wire::WireWriter;

use crate::error::{CodecError, CodecResult};
use crate::markers::{Marker, MetaProperty};
use crate::stream::{
    AttachmentContent, ContentsSync, FolderChild, FolderContent, HierarchySync, Message,
    MessageChild, MessageContent, MessageList, MessageListItem, StreamObject, SyncState,
};
use crate::tags::{special_kind, NameKind, PropertyName, PropertyTag, SpecialKind};
use crate::value::{PropValue, PropertyList, TaggedProperty};

/// Encodes a stream object to bytes.
///
/// # Errors
///
/// Returns `InvalidValue` if a value does not match its tag and
/// `ValueTooLarge` if a variable-width value exceeds its 2-byte length.
pub fn encode_stream(object: &StreamObject) -> CodecResult<Vec<u8>> {
    let mut encoder = StreamEncoder::new();
    encoder.encode(object)?;
    Ok(encoder.into_bytes())
}

/// Encodes a bare property list, as used in state uploads.
pub fn encode_properties(properties: &PropertyList) -> CodecResult<Vec<u8>> {
    let mut encoder = StreamEncoder::new();
    encoder.property_list(properties)?;
    Ok(encoder.into_bytes())
}

/// A FastTransfer stream encoder.
#[derive(Debug, Default)]
pub struct StreamEncoder {
    writer: WireWriter,
}

impl StreamEncoder {
    /// Creates a new encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an encoder with preallocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            writer: WireWriter::with_capacity(capacity),
        }
    }

    /// Consumes the encoder and returns the bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_bytes()
    }

    /// Returns the bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.writer.as_bytes()
    }

    /// Appends one object.
    pub fn encode(&mut self, object: &StreamObject) -> CodecResult<()> {
        match object {
            StreamObject::TopFolder(folder) => {
                self.marker(Marker::StartTopFld);
                self.folder_content(folder)?;
                self.marker(Marker::EndFolder);
                Ok(())
            }
            StreamObject::FolderContent(folder) => self.folder_content(folder),
            StreamObject::MessageContent(message) => self.message_content(message),
            StreamObject::AttachmentContent(attachment) => self.attachment_content(attachment),
            StreamObject::MessageList(list) => self.message_list(list),
            StreamObject::ContentsSync(sync) => self.contents_sync(sync),
            StreamObject::HierarchySync(sync) => self.hierarchy_sync(sync),
            StreamObject::SyncState(state) => self.state(state),
        }
    }

    fn marker(&mut self, marker: Marker) {
        self.writer.put_u32_le(marker.value());
    }

    fn meta(&mut self, meta: MetaProperty) {
        self.writer.put_u32_le(meta.tag().value());
        self.writer.put_u32_le(meta.payload());
    }

    fn folder_content(&mut self, folder: &FolderContent) -> CodecResult<()> {
        self.property_list(&folder.properties)?;
        for child in &folder.children {
            match child {
                FolderChild::Meta(meta) => self.meta(*meta),
                FolderChild::Message(message) => self.message(message)?,
                FolderChild::Folder(sub) => {
                    self.marker(Marker::StartSubFld);
                    self.folder_content(sub)?;
                    self.marker(Marker::EndFolder);
                }
            }
        }
        Ok(())
    }

    fn message(&mut self, message: &Message) -> CodecResult<()> {
        self.marker(if message.fai {
            Marker::StartFAIMsg
        } else {
            Marker::StartMessage
        });
        self.message_content(&message.content)?;
        self.marker(Marker::EndMessage);
        Ok(())
    }

    fn message_content(&mut self, message: &MessageContent) -> CodecResult<()> {
        self.property_list(&message.properties)?;
        self.message_children(&message.children)
    }

    fn message_children(&mut self, children: &[MessageChild]) -> CodecResult<()> {
        for child in children {
            match child {
                MessageChild::Meta(meta @ MetaProperty::DelProp(_)) => self.meta(*meta),
                MessageChild::Meta(meta) => {
                    return Err(CodecError::invalid_value(
                        meta.tag().value(),
                        "only FXDelProp may appear among message children",
                    ))
                }
                MessageChild::Recipient(row) => {
                    self.marker(Marker::StartRecip);
                    self.property_list(row)?;
                    self.marker(Marker::EndToRecip);
                }
                MessageChild::Attachment(attachment) => {
                    self.marker(Marker::NewAttach);
                    self.attachment_content(attachment)?;
                    self.marker(Marker::EndAttach);
                }
            }
        }
        Ok(())
    }

    fn attachment_content(&mut self, attachment: &AttachmentContent) -> CodecResult<()> {
        self.property_list(&attachment.properties)?;
        if let Some(embedded) = &attachment.embedded {
            self.marker(Marker::StartEmbed);
            self.message_content(embedded)?;
            self.marker(Marker::EndEmbed);
        }
        Ok(())
    }

    fn message_list(&mut self, list: &MessageList) -> CodecResult<()> {
        for item in &list.items {
            match item {
                MessageListItem::Warning(code) => self.meta(MetaProperty::EcWarning(*code)),
                MessageListItem::Message(message) => self.message(message)?,
            }
        }
        Ok(())
    }

    fn contents_sync(&mut self, sync: &ContentsSync) -> CodecResult<()> {
        if let Some(progress) = &sync.progress {
            self.marker(Marker::IncrSyncProgressMode);
            self.property_list(progress)?;
        }
        for change in &sync.changes {
            if let Some(progress) = &change.progress {
                self.marker(Marker::IncrSyncProgressPerMsg);
                self.property_list(progress)?;
            }
            self.marker(Marker::IncrSyncChg);
            self.property_list(&change.header)?;
            self.marker(Marker::IncrSyncMessage);
            self.message_content(&change.content)?;
        }
        self.optional_block(Marker::IncrSyncDel, sync.deletions.as_ref())?;
        self.optional_block(Marker::IncrSyncRead, sync.read_state.as_ref())?;
        self.state(&sync.state)?;
        self.marker(Marker::IncrSyncEnd);
        Ok(())
    }

    fn hierarchy_sync(&mut self, sync: &HierarchySync) -> CodecResult<()> {
        for folder in &sync.folders {
            self.marker(Marker::IncrSyncChg);
            self.property_list(folder)?;
        }
        self.optional_block(Marker::IncrSyncDel, sync.deletions.as_ref())?;
        self.state(&sync.state)?;
        self.marker(Marker::IncrSyncEnd);
        Ok(())
    }

    fn optional_block(&mut self, marker: Marker, block: Option<&PropertyList>) -> CodecResult<()> {
        if let Some(properties) = block {
            self.marker(marker);
            self.property_list(properties)?;
        }
        Ok(())
    }

    fn state(&mut self, state: &SyncState) -> CodecResult<()> {
        self.marker(Marker::IncrSyncStateBegin);
        self.property_list(&state.to_properties())?;
        self.marker(Marker::IncrSyncStateEnd);
        Ok(())
    }

    /// Appends every property of `properties`.
    pub fn property_list(&mut self, properties: &PropertyList) -> CodecResult<()> {
        for property in properties {
            self.property(property)?;
        }
        Ok(())
    }

    /// Appends one property record.
    pub fn property(&mut self, property: &TaggedProperty) -> CodecResult<()> {
        let tag = property.tag;
        check_property(property)?;
        self.writer.put_u32_le(tag.value());
        if let Some(name) = &property.name {
            self.property_name(name);
        }
        match &property.value {
            PropValue::Multiple(values) => {
                let count = u32::try_from(values.len()).map_err(|_| CodecError::ValueTooLarge {
                    tag: tag.value(),
                    len: values.len(),
                    max: u32::MAX as usize,
                })?;
                self.writer.put_u32_le(count);
                for value in values {
                    self.single_value(tag, value)?;
                }
                Ok(())
            }
            value => self.single_value(tag, value),
        }
    }

    fn property_name(&mut self, name: &PropertyName) {
        self.writer.put_bytes(&name.guid.to_bytes_le());
        self.writer.put_u8(name.kind.code());
        match &name.kind {
            NameKind::Lid(lid) => self.writer.put_u32_le(*lid),
            NameKind::Name(text) => {
                for unit in text.encode_utf16() {
                    self.writer.put_u16_le(unit);
                }
                self.writer.put_u16_le(0);
            }
        }
    }

    fn variable(&mut self, tag: PropertyTag, bytes: &[u8]) -> CodecResult<()> {
        let len = u16::try_from(bytes.len()).map_err(|_| CodecError::ValueTooLarge {
            tag: tag.value(),
            len: bytes.len(),
            max: usize::from(u16::MAX),
        })?;
        self.writer.put_u16_le(len);
        self.writer.put_bytes(bytes);
        Ok(())
    }

    fn single_value(&mut self, tag: PropertyTag, value: &PropValue) -> CodecResult<()> {
        match value {
            PropValue::Int16(v) => self.writer.put_bytes(&v.to_le_bytes()),
            PropValue::Int32(v) => self.writer.put_bytes(&v.to_le_bytes()),
            PropValue::Float32(v) => self.writer.put_bytes(&v.to_le_bytes()),
            PropValue::Float64(v) | PropValue::FloatingTime(v) => {
                self.writer.put_bytes(&v.to_le_bytes());
            }
            PropValue::Currency(v) | PropValue::Int64(v) => {
                self.writer.put_bytes(&v.to_le_bytes());
            }
            PropValue::ErrorCode(v) => self.writer.put_u32_le(*v),
            PropValue::Boolean(v) => self.writer.put_u16_le(u16::from(*v)),
            PropValue::Time(v) => self.writer.put_u64_le(*v),
            PropValue::Guid(v) => self.writer.put_bytes(&v.to_bytes_le()),
            PropValue::String(text) => {
                let mut bytes: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
                bytes.extend_from_slice(&[0, 0]);
                return self.variable(tag, &bytes);
            }
            PropValue::String8(text) => {
                let mut bytes = text.clone();
                bytes.push(0);
                return self.variable(tag, &bytes);
            }
            PropValue::Binary(bytes) | PropValue::ServerId(bytes) | PropValue::Object(bytes) => {
                return self.variable(tag, bytes);
            }
            PropValue::IdSet(set) => return self.variable(tag, &set.encode()),
            PropValue::LongTermId(id) => return self.variable(tag, &id.to_bytes()),
            PropValue::ChangeKey(xid) => return self.variable(tag, &xid.to_bytes()),
            PropValue::Pcl(pcl) => return self.variable(tag, &pcl.encode_body()),
            PropValue::Multiple(_) => {
                return Err(CodecError::invalid_value(
                    tag.value(),
                    "multi-valued values cannot nest",
                ))
            }
        }
        Ok(())
    }
}

/// Rejects properties the decoder would not read back unchanged.
fn check_property(property: &TaggedProperty) -> CodecResult<()> {
    let tag = property.tag;
    if tag.is_named() != property.name.is_some() {
        return Err(CodecError::invalid_value(
            tag.value(),
            "property names are required exactly for ids at or above 0x8000",
        ));
    }
    if !property.value.fits(tag) {
        return Err(CodecError::invalid_value(
            tag.value(),
            "value does not match the tag type",
        ));
    }
    let resolved_ok = match (special_kind(tag), &property.value) {
        (Some(SpecialKind::IdSet), PropValue::IdSet(_))
        | (Some(SpecialKind::ChangeKey), PropValue::ChangeKey(_))
        | (Some(SpecialKind::Pcl), PropValue::Pcl(_))
        | (Some(SpecialKind::SourceKey), PropValue::LongTermId(_)) => true,
        (Some(SpecialKind::SourceKey), PropValue::Binary(bytes)) => bytes.is_empty(),
        (Some(_), _) => false,
        (None, value) => !matches!(
            value,
            PropValue::IdSet(_)
                | PropValue::LongTermId(_)
                | PropValue::ChangeKey(_)
                | PropValue::Pcl(_)
        ),
    };
    if !resolved_ok {
        return Err(CodecError::invalid_value(
            tag.value(),
            "value is not the resolved form this tag decodes to",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_stream;
    use crate::stream::StreamType;
    use crate::tags::{pid, PropertyType};
    use fxsync_core::{GlobalCounter, IdSet, LongTermId, PredecessorChangeList, ReplicaId, Xid};

    #[test]
    fn top_folder_layout() {
        let folder = FolderContent::new(
            PropertyList::new().with(pid::DISPLAY_NAME, PropValue::String("A".into())),
        );
        let bytes = encode_stream(&StreamObject::TopFolder(folder)).unwrap();
        let mut expected = Marker::StartTopFld.value().to_le_bytes().to_vec();
        expected.extend_from_slice(&0x3001_001Fu32.to_le_bytes());
        expected.extend_from_slice(&4u16.to_le_bytes());
        expected.extend_from_slice(&[0x41, 0, 0, 0]);
        expected.extend_from_slice(&Marker::EndFolder.value().to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn pcl_value_carries_its_total_length() {
        let pcl = PredecessorChangeList::from_entries(vec![Xid::new(
            ReplicaId::from_bytes([0xAB; 16]),
            GlobalCounter::new(6).unwrap(),
        )]);
        let properties =
            PropertyList::new().with(pid::PREDECESSOR_CHANGE_LIST, PropValue::Pcl(pcl.clone()));
        let bytes =
            encode_stream(&StreamObject::MessageContent(MessageContent::new(properties))).unwrap();
        assert_eq!(&bytes[..4], &pid::PREDECESSOR_CHANGE_LIST.value().to_le_bytes());
        assert_eq!(&bytes[4..7], &[23, 0, 22]);
        assert_eq!(&bytes[4..], pcl.encode().unwrap().as_slice());
    }

    #[test]
    fn state_roundtrip() {
        let mut given = IdSet::new();
        let replica = ReplicaId::from_bytes([4; 16]);
        given
            .insert_range(replica, GlobalCounter::new(1).unwrap(), GlobalCounter::new(50).unwrap())
            .unwrap();
        let state = SyncState {
            idset_given: Some(given.clone()),
            cnset_seen: Some(given),
            ..SyncState::default()
        };
        let object = StreamObject::SyncState(state);
        let bytes = encode_stream(&object).unwrap();
        assert_eq!(decode_stream(&bytes, StreamType::State).unwrap(), object);
    }

    #[test]
    fn rejects_mismatched_value() {
        let properties = PropertyList::new().with(pid::DISPLAY_NAME, PropValue::Int32(3));
        assert!(matches!(
            encode_properties(&properties),
            Err(CodecError::InvalidValue { tag: 0x3001_001F, .. })
        ));
    }

    #[test]
    fn rejects_unresolved_special_value() {
        let properties = PropertyList::new().with(pid::CHANGE_KEY, PropValue::Binary(vec![1, 2]));
        assert!(encode_properties(&properties).is_err());
        let id = LongTermId::new(ReplicaId::from_bytes([1; 16]), GlobalCounter::default());
        let properties =
            PropertyList::new().with(pid::ATTACH_DATA_BINARY, PropValue::LongTermId(id));
        assert!(encode_properties(&properties).is_err());
    }

    #[test]
    fn rejects_missing_name() {
        let tag = PropertyTag::new(0x8001, PropertyType::Int32);
        let properties = PropertyList::new().with(tag, PropValue::Int32(1));
        assert!(encode_properties(&properties).is_err());
    }

    #[test]
    fn rejects_oversized_binary() {
        let properties = PropertyList::new().with(
            pid::ATTACH_DATA_BINARY,
            PropValue::Binary(vec![0; usize::from(u16::MAX) + 1]),
        );
        assert!(matches!(
            encode_properties(&properties),
            Err(CodecError::ValueTooLarge { len: 65536, .. })
        ));
    }

    #[test]
    fn fai_messages_use_their_marker() {
        let list = MessageList {
            items: vec![
                MessageListItem::Warning(0x0004_0380),
                MessageListItem::Message(Message {
                    fai: true,
                    content: MessageContent::default(),
                }),
            ],
        };
        let bytes = encode_stream(&StreamObject::MessageList(list.clone())).unwrap();
        assert_eq!(&bytes[8..12], &Marker::StartFAIMsg.value().to_le_bytes());
        assert_eq!(
            decode_stream(&bytes, StreamType::MessageList).unwrap(),
            StreamObject::MessageList(list)
        );
    }
}
