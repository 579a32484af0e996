//! FastTransfer stream decoder.

use fxsync_core::wire::WireReader;
use fxsync_core::{CoreError, IdSet, LongTermId, PredecessorChangeList, Xid};
use uuid::Uuid;

use crate::error::{CodecError, CodecResult};
use crate::markers::{is_delimiter, Marker, MetaProperty, MetaTag};
use crate::stream::{
    AttachmentContent, ContentsSync, FolderChild, FolderContent, HierarchySync, Message,
    MessageChange, MessageChild, MessageContent, MessageList, MessageListItem, StreamObject,
    StreamType, SyncState,
};
use crate::tags::{special_kind, NameKind, PropertyName, PropertyTag, PropertyType, SpecialKind};
use crate::value::{PropValue, PropertyList, TaggedProperty};

/// Maximum nesting of folders, messages and attachments.
pub const MAX_DEPTH: usize = 64;

/// Decodes a complete buffer as `kind`.
///
/// # Errors
///
/// Returns `TruncatedStream` when a read passes the end of the buffer,
/// `UnknownMarker` for a 4-byte value that is neither a marker nor a
/// property tag, and `TrailingBytes` when input remains after the object.
pub fn decode_stream(bytes: &[u8], kind: StreamType) -> CodecResult<StreamObject> {
    let mut decoder = StreamDecoder::new(bytes);
    let object = decoder.decode(kind)?;
    decoder.finish()?;
    Ok(object)
}

/// What sits at the decoder's position.
enum Next {
    End,
    Marker(Marker),
    Meta(MetaTag),
    Property,
}

/// A sequential, depth-tracked stream decoder.
pub struct StreamDecoder<'a> {
    reader: WireReader<'a>,
    depth: usize,
}

impl<'a> StreamDecoder<'a> {
    /// Creates a decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: WireReader::new(data),
            depth: 0,
        }
    }

    /// Decodes one object of the given type.
    pub fn decode(&mut self, kind: StreamType) -> CodecResult<StreamObject> {
        Ok(match kind {
            StreamType::TopFolder => {
                self.expect(Marker::StartTopFld)?;
                let folder = self.folder_content()?;
                self.expect(Marker::EndFolder)?;
                StreamObject::TopFolder(folder)
            }
            StreamType::FolderContent => StreamObject::FolderContent(self.folder_content()?),
            StreamType::MessageContent => StreamObject::MessageContent(self.message_content()?),
            StreamType::AttachmentContent => {
                StreamObject::AttachmentContent(self.attachment_content()?)
            }
            StreamType::MessageList => StreamObject::MessageList(self.message_list()?),
            StreamType::ContentsSync => StreamObject::ContentsSync(self.contents_sync()?),
            StreamType::HierarchySync => StreamObject::HierarchySync(self.hierarchy_sync()?),
            StreamType::State => StreamObject::SyncState(self.state()?),
        })
    }

    /// Checks that the whole buffer was consumed.
    pub fn finish(&self) -> CodecResult<()> {
        if self.reader.is_empty() {
            return Ok(());
        }
        let offset = self.reader.position();
        match self.reader.peek_u32_le() {
            Ok(value) if is_delimiter(value) => {
                Err(CodecError::unexpected_marker("end of stream", value, offset))
            }
            Ok(value) if PropertyTag::from_u32(value).is_none() => {
                Err(CodecError::UnknownMarker { value, offset })
            }
            _ => Err(CodecError::TrailingBytes {
                offset,
                count: self.reader.remaining(),
            }),
        }
    }

    /// Current offset into the buffer.
    pub fn position(&self) -> usize {
        self.reader.position()
    }

    fn peek(&self) -> CodecResult<Next> {
        if self.reader.is_empty() {
            return Ok(Next::End);
        }
        let value = self.reader.peek_u32_le()?;
        if let Some(marker) = Marker::from_u32(value) {
            return Ok(Next::Marker(marker));
        }
        if let Some(meta) = MetaTag::from_u32(value) {
            return Ok(Next::Meta(meta));
        }
        Ok(Next::Property)
    }

    fn at(&self, marker: Marker) -> CodecResult<bool> {
        Ok(matches!(self.peek()?, Next::Marker(found) if found == marker))
    }

    fn take_if(&mut self, marker: Marker) -> CodecResult<bool> {
        if self.at(marker)? {
            self.reader.read_u32_le()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect(&mut self, marker: Marker) -> CodecResult<()> {
        let offset = self.reader.position();
        let value = self.reader.read_u32_le()?;
        if value == marker.value() {
            return Ok(());
        }
        if is_delimiter(value) || PropertyTag::from_u32(value).is_some() {
            return Err(CodecError::unexpected_marker(marker.name(), value, offset));
        }
        Err(CodecError::UnknownMarker { value, offset })
    }

    fn enter(&mut self) -> CodecResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CodecError::NestingTooDeep { max: MAX_DEPTH });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn meta(&mut self, tag: MetaTag) -> CodecResult<MetaProperty> {
        self.reader.read_u32_le()?;
        let payload = self.reader.read_u32_le()?;
        Ok(MetaProperty::new(tag, payload))
    }

    fn unsupported_partial(&self) -> CodecError {
        CodecError::Unsupported(format!(
            "partial item change at offset {}",
            self.reader.position()
        ))
    }

    // -- grammar ------------------------------------------------------------

    fn folder_content(&mut self) -> CodecResult<FolderContent> {
        let properties = self.property_list()?;
        let mut children = Vec::new();
        loop {
            match self.peek()? {
                Next::Meta(tag) => children.push(FolderChild::Meta(self.meta(tag)?)),
                Next::Marker(Marker::StartMessage | Marker::StartFAIMsg) => {
                    children.push(FolderChild::Message(self.message()?));
                }
                Next::Marker(Marker::StartSubFld) => {
                    self.reader.read_u32_le()?;
                    self.enter()?;
                    let folder = self.folder_content()?;
                    self.expect(Marker::EndFolder)?;
                    self.leave();
                    children.push(FolderChild::Folder(folder));
                }
                _ => break,
            }
        }
        Ok(FolderContent {
            properties,
            children,
        })
    }

    fn message(&mut self) -> CodecResult<Message> {
        let offset = self.reader.position();
        let value = self.reader.read_u32_le()?;
        let fai = match Marker::from_u32(value) {
            Some(Marker::StartMessage) => false,
            Some(Marker::StartFAIMsg) => true,
            _ => return Err(CodecError::unexpected_marker("StartMessage", value, offset)),
        };
        self.enter()?;
        let content = self.message_content()?;
        self.expect(Marker::EndMessage)?;
        self.leave();
        Ok(Message { fai, content })
    }

    fn message_content(&mut self) -> CodecResult<MessageContent> {
        let properties = self.property_list()?;
        let children = self.message_children()?;
        Ok(MessageContent {
            properties,
            children,
        })
    }

    fn message_children(&mut self) -> CodecResult<Vec<MessageChild>> {
        let mut children = Vec::new();
        loop {
            match self.peek()? {
                Next::Meta(MetaTag::FxDelProp) => {
                    children.push(MessageChild::Meta(self.meta(MetaTag::FxDelProp)?));
                }
                Next::Marker(Marker::StartRecip) => {
                    self.reader.read_u32_le()?;
                    let row = self.property_list()?;
                    self.expect(Marker::EndToRecip)?;
                    children.push(MessageChild::Recipient(row));
                }
                Next::Marker(Marker::NewAttach) => {
                    self.reader.read_u32_le()?;
                    self.enter()?;
                    let attachment = self.attachment_content()?;
                    self.expect(Marker::EndAttach)?;
                    self.leave();
                    children.push(MessageChild::Attachment(attachment));
                }
                _ => break,
            }
        }
        Ok(children)
    }

    fn attachment_content(&mut self) -> CodecResult<AttachmentContent> {
        let properties = self.property_list()?;
        let embedded = if self.take_if(Marker::StartEmbed)? {
            self.enter()?;
            let message = self.message_content()?;
            self.expect(Marker::EndEmbed)?;
            self.leave();
            Some(Box::new(message))
        } else {
            None
        };
        Ok(AttachmentContent {
            properties,
            embedded,
        })
    }

    fn message_list(&mut self) -> CodecResult<MessageList> {
        let mut items = Vec::new();
        loop {
            match self.peek()? {
                Next::Meta(MetaTag::EcWarning) => {
                    let warning = self.meta(MetaTag::EcWarning)?;
                    items.push(MessageListItem::Warning(warning.payload()));
                }
                Next::Marker(Marker::StartMessage | Marker::StartFAIMsg) => {
                    items.push(MessageListItem::Message(self.message()?));
                }
                _ => break,
            }
        }
        Ok(MessageList { items })
    }

    fn contents_sync(&mut self) -> CodecResult<ContentsSync> {
        let progress = if self.take_if(Marker::IncrSyncProgressMode)? {
            Some(self.property_list()?)
        } else {
            None
        };

        let mut changes = Vec::new();
        loop {
            let per_message = if self.take_if(Marker::IncrSyncProgressPerMsg)? {
                Some(self.property_list()?)
            } else {
                None
            };
            match self.peek()? {
                Next::Marker(Marker::IncrSyncChg) => {
                    self.reader.read_u32_le()?;
                    let header = self.property_list()?;
                    self.expect(Marker::IncrSyncMessage)?;
                    let content = self.message_content()?;
                    changes.push(MessageChange {
                        progress: per_message,
                        header,
                        content,
                    });
                }
                Next::Marker(Marker::IncrSyncChgPartial | Marker::IncrSyncGroupInfo) => {
                    return Err(self.unsupported_partial());
                }
                _ if per_message.is_some() => self.expect(Marker::IncrSyncChg)?,
                _ => break,
            }
        }

        let deletions = self.optional_block(Marker::IncrSyncDel)?;
        let read_state = self.optional_block(Marker::IncrSyncRead)?;
        let state = self.state()?;
        self.expect(Marker::IncrSyncEnd)?;
        Ok(ContentsSync {
            progress,
            changes,
            deletions,
            read_state,
            state,
        })
    }

    fn hierarchy_sync(&mut self) -> CodecResult<HierarchySync> {
        let mut folders = Vec::new();
        while self.take_if(Marker::IncrSyncChg)? {
            folders.push(self.property_list()?);
        }
        let deletions = self.optional_block(Marker::IncrSyncDel)?;
        let state = self.state()?;
        self.expect(Marker::IncrSyncEnd)?;
        Ok(HierarchySync {
            folders,
            deletions,
            state,
        })
    }

    fn optional_block(&mut self, marker: Marker) -> CodecResult<Option<PropertyList>> {
        if self.take_if(marker)? {
            return Ok(Some(self.property_list()?));
        }
        Ok(None)
    }

    fn state(&mut self) -> CodecResult<SyncState> {
        self.expect(Marker::IncrSyncStateBegin)?;
        let properties = self.property_list()?;
        self.expect(Marker::IncrSyncStateEnd)?;
        Ok(SyncState::from_properties(properties))
    }

    // -- properties ---------------------------------------------------------

    fn property_list(&mut self) -> CodecResult<PropertyList> {
        let mut list = PropertyList::new();
        while let Next::Property = self.peek()? {
            list.push(self.property()?);
        }
        Ok(list)
    }

    fn property(&mut self) -> CodecResult<TaggedProperty> {
        let offset = self.reader.position();
        let value = self.reader.read_u32_le()?;
        let tag =
            PropertyTag::from_u32(value).ok_or(CodecError::UnknownMarker { value, offset })?;
        let name = if tag.is_named() {
            Some(self.property_name(tag)?)
        } else {
            None
        };
        let value = match special_kind(tag) {
            Some(kind) => self.special_value(tag, kind)?,
            None if tag.multi => self.multi_value(tag)?,
            None => self.single_value(tag, tag.ptype)?,
        };
        Ok(TaggedProperty { tag, name, value })
    }

    fn property_name(&mut self, tag: PropertyTag) -> CodecResult<PropertyName> {
        let guid = Uuid::from_bytes_le(self.reader.read_array()?);
        let kind = match self.reader.read_u8()? {
            0 => NameKind::Lid(self.reader.read_u32_le()?),
            1 => {
                let mut units = Vec::new();
                loop {
                    let unit = self.reader.read_u16_le()?;
                    if unit == 0 {
                        break;
                    }
                    units.push(unit);
                }
                let name = String::from_utf16(&units).map_err(|_| {
                    CodecError::invalid_value(tag.value(), "property name is not valid UTF-16")
                })?;
                NameKind::Name(name)
            }
            other => {
                return Err(CodecError::invalid_value(
                    tag.value(),
                    format!("unknown name kind {other}"),
                ))
            }
        };
        Ok(PropertyName { guid, kind })
    }

    fn variable_bytes(&mut self) -> CodecResult<&'a [u8]> {
        Ok(self.reader.read_u16_prefixed()?)
    }

    fn special_value(&mut self, tag: PropertyTag, kind: SpecialKind) -> CodecResult<PropValue> {
        let bytes = self.variable_bytes()?;
        let invalid = |err: CoreError| CodecError::invalid_value(tag.value(), err.to_string());
        Ok(match kind {
            SpecialKind::IdSet => PropValue::IdSet(IdSet::decode(bytes).map_err(invalid)?),
            SpecialKind::SourceKey if bytes.is_empty() => PropValue::Binary(Vec::new()),
            SpecialKind::SourceKey => {
                PropValue::LongTermId(LongTermId::from_slice(bytes).map_err(invalid)?)
            }
            SpecialKind::ChangeKey => {
                PropValue::ChangeKey(Xid::from_slice(bytes).map_err(invalid)?)
            }
            SpecialKind::Pcl => {
                PropValue::Pcl(PredecessorChangeList::decode_body(bytes).map_err(invalid)?)
            }
        })
    }

    fn multi_value(&mut self, tag: PropertyTag) -> CodecResult<PropValue> {
        let offset = self.reader.position();
        let count = self.reader.read_u32_le()? as usize;
        let min_width = tag.ptype.fixed_width().unwrap_or(2);
        let needed = count.saturating_mul(min_width);
        if needed > self.reader.remaining() {
            return Err(CodecError::TruncatedStream {
                offset,
                needed,
                available: self.reader.remaining(),
            });
        }
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.single_value(tag, tag.ptype)?);
        }
        Ok(PropValue::Multiple(values))
    }

    fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        Ok(self.reader.read_array()?)
    }

    fn single_value(&mut self, tag: PropertyTag, ptype: PropertyType) -> CodecResult<PropValue> {
        Ok(match ptype {
            PropertyType::Int16 => PropValue::Int16(i16::from_le_bytes(self.array()?)),
            PropertyType::Int32 => PropValue::Int32(i32::from_le_bytes(self.array()?)),
            PropertyType::Float32 => PropValue::Float32(f32::from_le_bytes(self.array()?)),
            PropertyType::Float64 => PropValue::Float64(f64::from_le_bytes(self.array()?)),
            PropertyType::Currency => PropValue::Currency(i64::from_le_bytes(self.array()?)),
            PropertyType::FloatingTime => {
                PropValue::FloatingTime(f64::from_le_bytes(self.array()?))
            }
            PropertyType::ErrorCode => PropValue::ErrorCode(u32::from_le_bytes(self.array()?)),
            PropertyType::Boolean => PropValue::Boolean(u16::from_le_bytes(self.array()?) != 0),
            PropertyType::Int64 => PropValue::Int64(i64::from_le_bytes(self.array()?)),
            PropertyType::Time => PropValue::Time(u64::from_le_bytes(self.array()?)),
            PropertyType::Guid => PropValue::Guid(Uuid::from_bytes_le(self.array()?)),
            PropertyType::String => {
                let bytes = self.variable_bytes()?;
                PropValue::String(utf16_string(tag, bytes)?)
            }
            PropertyType::String8 => {
                let bytes = self.variable_bytes()?;
                let text = bytes.strip_suffix(&[0]).unwrap_or(bytes);
                PropValue::String8(text.to_vec())
            }
            PropertyType::Binary => PropValue::Binary(self.variable_bytes()?.to_vec()),
            PropertyType::ServerId => PropValue::ServerId(self.variable_bytes()?.to_vec()),
            PropertyType::Object => PropValue::Object(self.variable_bytes()?.to_vec()),
        })
    }
}

fn utf16_string(tag: PropertyTag, bytes: &[u8]) -> CodecResult<String> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::invalid_value(
            tag.value(),
            format!("odd UTF-16 byte length {}", bytes.len()),
        ));
    }
    let mut units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    if units.last() == Some(&0) {
        units.pop();
    }
    String::from_utf16(&units)
        .map_err(|_| CodecError::invalid_value(tag.value(), "string is not valid UTF-16"))
}
