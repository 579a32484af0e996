//! Property tags, types and names.

use std::fmt;

use uuid::Uuid;

/// Flag OR-ed into a type code for multi-valued properties.
pub const MULTI_VALUE_FLAG: u16 = 0x1000;

/// First property id that refers to a named property.
pub const NAMED_PROPERTY_BASE: u16 = 0x8000;

/// Property value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    /// 2-byte signed integer.
    Int16,
    /// 4-byte signed integer.
    Int32,
    /// 4-byte float.
    Float32,
    /// 8-byte float.
    Float64,
    /// 8-byte fixed-point currency.
    Currency,
    /// 8-byte float encoding a date.
    FloatingTime,
    /// 4-byte error code.
    ErrorCode,
    /// Boolean, 2 bytes on the wire.
    Boolean,
    /// 8-byte signed integer.
    Int64,
    /// 8-bit string.
    String8,
    /// UTF-16LE string.
    String,
    /// FILETIME.
    Time,
    /// 16-byte GUID.
    Guid,
    /// Server id blob.
    ServerId,
    /// Embedded object blob.
    Object,
    /// Byte array.
    Binary,
}

impl PropertyType {
    /// Type code without the multi-value flag.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Int16 => 0x0002,
            Self::Int32 => 0x0003,
            Self::Float32 => 0x0004,
            Self::Float64 => 0x0005,
            Self::Currency => 0x0006,
            Self::FloatingTime => 0x0007,
            Self::ErrorCode => 0x000A,
            Self::Boolean => 0x000B,
            Self::Object => 0x000D,
            Self::Int64 => 0x0014,
            Self::String8 => 0x001E,
            Self::String => 0x001F,
            Self::Time => 0x0040,
            Self::Guid => 0x0048,
            Self::ServerId => 0x00FB,
            Self::Binary => 0x0102,
        }
    }

    /// Looks up a single-valued type code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x0002 => Self::Int16,
            0x0003 => Self::Int32,
            0x0004 => Self::Float32,
            0x0005 => Self::Float64,
            0x0006 => Self::Currency,
            0x0007 => Self::FloatingTime,
            0x000A => Self::ErrorCode,
            0x000B => Self::Boolean,
            0x000D => Self::Object,
            0x0014 => Self::Int64,
            0x001E => Self::String8,
            0x001F => Self::String,
            0x0040 => Self::Time,
            0x0048 => Self::Guid,
            0x00FB => Self::ServerId,
            0x0102 => Self::Binary,
            _ => return None,
        })
    }

    /// Encoded width of a fixed-size value, `None` for length-prefixed types.
    #[must_use]
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Int16 | Self::Boolean => Some(2),
            Self::Int32 | Self::Float32 | Self::ErrorCode => Some(4),
            Self::Float64 | Self::Currency | Self::FloatingTime | Self::Int64 | Self::Time => {
                Some(8)
            }
            Self::Guid => Some(16),
            Self::String8 | Self::String | Self::ServerId | Self::Object | Self::Binary => None,
        }
    }

    /// Returns true if the type may carry the multi-value flag.
    #[must_use]
    pub const fn allows_multiple(self) -> bool {
        !matches!(
            self,
            Self::Boolean | Self::ErrorCode | Self::ServerId | Self::Object
        )
    }
}

/// A property tag: 16-bit id in the high half, type code in the low half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyTag {
    /// Property id.
    pub id: u16,
    /// Element type.
    pub ptype: PropertyType,
    /// Multi-valued flag.
    pub multi: bool,
}

impl PropertyTag {
    /// Creates a single-valued tag.
    #[must_use]
    pub const fn new(id: u16, ptype: PropertyType) -> Self {
        Self {
            id,
            ptype,
            multi: false,
        }
    }

    /// Creates a multi-valued tag.
    #[must_use]
    pub const fn multi(id: u16, ptype: PropertyType) -> Self {
        Self {
            id,
            ptype,
            multi: true,
        }
    }

    /// Wire value.
    #[must_use]
    pub const fn value(self) -> u32 {
        let code = if self.multi {
            self.ptype.code() | MULTI_VALUE_FLAG
        } else {
            self.ptype.code()
        };
        ((self.id as u32) << 16) | code as u32
    }

    /// Parses a wire value, `None` if the type code is not understood.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        let id = (value >> 16) as u16;
        let code = (value & 0xFFFF) as u16;
        let multi = code & MULTI_VALUE_FLAG != 0;
        let Some(ptype) = PropertyType::from_code(code & !MULTI_VALUE_FLAG) else {
            return None;
        };
        if multi && !ptype.allows_multiple() {
            return None;
        }
        Some(Self { id, ptype, multi })
    }

    /// Returns true if a property name follows the tag on the wire.
    #[must_use]
    pub const fn is_named(self) -> bool {
        self.id >= NAMED_PROPERTY_BASE
    }
}

impl fmt::Display for PropertyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.value())
    }
}

/// Identity of a named property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyName {
    /// Property set GUID.
    pub guid: Uuid,
    /// Numeric or string name within the set.
    pub kind: NameKind,
}

/// How a named property is identified within its set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NameKind {
    /// Numeric long id.
    Lid(u32),
    /// String name.
    Name(String),
}

impl NameKind {
    /// Wire discriminator.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Lid(_) => 0,
            Self::Name(_) => 1,
        }
    }
}

/// Well-known tags.
pub mod pid {
    use super::{PropertyTag, PropertyType};

    /// PidTagDisplayName.
    pub const DISPLAY_NAME: PropertyTag = PropertyTag::new(0x3001, PropertyType::String);
    /// PidTagSubject.
    pub const SUBJECT: PropertyTag = PropertyTag::new(0x0037, PropertyType::String);
    /// PidTagFolderId.
    pub const FOLDER_ID: PropertyTag = PropertyTag::new(0x6748, PropertyType::Int64);
    /// PidTagParentFolderId.
    pub const PARENT_FOLDER_ID: PropertyTag = PropertyTag::new(0x6749, PropertyType::Int64);
    /// PidTagMid.
    pub const MID: PropertyTag = PropertyTag::new(0x674A, PropertyType::Int64);
    /// PidTagChangeNumber.
    pub const CHANGE_NUMBER: PropertyTag = PropertyTag::new(0x67A4, PropertyType::Int64);
    /// PidTagAssociated.
    pub const ASSOCIATED: PropertyTag = PropertyTag::new(0x67AA, PropertyType::Boolean);
    /// PidTagLastModificationTime.
    pub const LAST_MODIFICATION_TIME: PropertyTag = PropertyTag::new(0x3008, PropertyType::Time);
    /// PidTagMessageDeliveryTime.
    pub const MESSAGE_DELIVERY_TIME: PropertyTag = PropertyTag::new(0x0E06, PropertyType::Time);
    /// PidTagMessageSize.
    pub const MESSAGE_SIZE: PropertyTag = PropertyTag::new(0x0E08, PropertyType::Int32);
    /// PidTagContainerClass.
    pub const CONTAINER_CLASS: PropertyTag = PropertyTag::new(0x3613, PropertyType::String);
    /// PidTagRowid.
    pub const ROW_ID: PropertyTag = PropertyTag::new(0x3000, PropertyType::Int32);
    /// PidTagRecipientType.
    pub const RECIPIENT_TYPE: PropertyTag = PropertyTag::new(0x0C15, PropertyType::Int32);
    /// PidTagEmailAddress.
    pub const EMAIL_ADDRESS: PropertyTag = PropertyTag::new(0x3003, PropertyType::String);
    /// PidTagAttachNumber.
    pub const ATTACH_NUMBER: PropertyTag = PropertyTag::new(0x0E21, PropertyType::Int32);
    /// PidTagAttachMethod.
    pub const ATTACH_METHOD: PropertyTag = PropertyTag::new(0x3705, PropertyType::Int32);
    /// PidTagAttachDataBinary.
    pub const ATTACH_DATA_BINARY: PropertyTag = PropertyTag::new(0x3701, PropertyType::Binary);
    /// PidTagMessageFlags.
    pub const MESSAGE_FLAGS: PropertyTag = PropertyTag::new(0x0E07, PropertyType::Int32);

    /// PidTagSourceKey.
    pub const SOURCE_KEY: PropertyTag = PropertyTag::new(0x65E0, PropertyType::Binary);
    /// PidTagParentSourceKey.
    pub const PARENT_SOURCE_KEY: PropertyTag = PropertyTag::new(0x65E1, PropertyType::Binary);
    /// PidTagChangeKey.
    pub const CHANGE_KEY: PropertyTag = PropertyTag::new(0x65E2, PropertyType::Binary);
    /// PidTagPredecessorChangeList.
    pub const PREDECESSOR_CHANGE_LIST: PropertyTag =
        PropertyTag::new(0x65E3, PropertyType::Binary);

    /// MetaTagIdsetGiven. Declared as a 4-byte integer, carries an IDSET.
    pub const IDSET_GIVEN: PropertyTag = PropertyTag::new(0x4017, PropertyType::Int32);
    /// MetaTagIdsetGiven with the binary type some producers use.
    pub const IDSET_GIVEN_BINARY: PropertyTag = PropertyTag::new(0x4017, PropertyType::Binary);
    /// MetaTagCnsetSeen.
    pub const CNSET_SEEN: PropertyTag = PropertyTag::new(0x6796, PropertyType::Binary);
    /// MetaTagCnsetSeenFAI.
    pub const CNSET_SEEN_FAI: PropertyTag = PropertyTag::new(0x67DA, PropertyType::Binary);
    /// MetaTagCnsetRead.
    pub const CNSET_READ: PropertyTag = PropertyTag::new(0x67D2, PropertyType::Binary);
    /// MetaTagIdsetDeleted.
    pub const IDSET_DELETED: PropertyTag = PropertyTag::new(0x67E5, PropertyType::Binary);
    /// MetaTagIdsetNoLongerInScope.
    pub const IDSET_NO_LONGER_IN_SCOPE: PropertyTag =
        PropertyTag::new(0x4021, PropertyType::Binary);
    /// MetaTagIdsetExpired.
    pub const IDSET_EXPIRED: PropertyTag = PropertyTag::new(0x6793, PropertyType::Binary);
    /// MetaTagIdsetRead.
    pub const IDSET_READ: PropertyTag = PropertyTag::new(0x402D, PropertyType::Binary);
    /// MetaTagIdsetUnread.
    pub const IDSET_UNREAD: PropertyTag = PropertyTag::new(0x402E, PropertyType::Binary);

    /// MetaTagNewFXFolder.
    pub const NEW_FX_FOLDER: PropertyTag = PropertyTag::new(0x4011, PropertyType::Binary);
    /// MetaTagDnPrefix.
    pub const DN_PREFIX: PropertyTag = PropertyTag::new(0x4008, PropertyType::String8);
    /// MetaTagIncrSyncGroupId.
    pub const INCR_SYNC_GROUP_ID: PropertyTag = PropertyTag::new(0x407C, PropertyType::Int32);
    /// MetaTagIncrementalSyncMessagePartial.
    pub const INCREMENTAL_SYNC_MESSAGE_PARTIAL: PropertyTag =
        PropertyTag::new(0x407A, PropertyType::Int32);
}

/// How the decoder resolves a property's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpecialKind {
    IdSet,
    SourceKey,
    ChangeKey,
    Pcl,
}

pub(crate) fn special_kind(tag: PropertyTag) -> Option<SpecialKind> {
    use pid::*;
    if tag.multi {
        return None;
    }
    match tag {
        IDSET_GIVEN | IDSET_GIVEN_BINARY | CNSET_SEEN | CNSET_SEEN_FAI | CNSET_READ
        | IDSET_DELETED | IDSET_NO_LONGER_IN_SCOPE | IDSET_EXPIRED | IDSET_READ
        | IDSET_UNREAD => Some(SpecialKind::IdSet),
        SOURCE_KEY | PARENT_SOURCE_KEY => Some(SpecialKind::SourceKey),
        CHANGE_KEY => Some(SpecialKind::ChangeKey),
        PREDECESSOR_CHANGE_LIST => Some(SpecialKind::Pcl),
        _ => None,
    }
}
