//! Typed property values and property lists.

use fxsync_core::{IdSet, LongTermId, PredecessorChangeList, Xid};
use uuid::Uuid;

use crate::tags::{pid, PropertyName, PropertyTag, PropertyType};

/// A decoded property value.
///
/// Identifier-carrying binary properties are resolved into their typed
/// forms (`IdSet`, `LongTermId`, `ChangeKey`, `Pcl`) during decode.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    /// 2-byte integer.
    Int16(i16),
    /// 4-byte integer.
    Int32(i32),
    /// 4-byte float.
    Float32(f32),
    /// 8-byte float.
    Float64(f64),
    /// Currency in ten-thousandths.
    Currency(i64),
    /// OLE automation date.
    FloatingTime(f64),
    /// Error code.
    ErrorCode(u32),
    /// Boolean.
    Boolean(bool),
    /// 8-byte integer.
    Int64(i64),
    /// 8-bit string, without its terminator.
    String8(Vec<u8>),
    /// Unicode string, without its terminator.
    String(String),
    /// FILETIME ticks.
    Time(u64),
    /// GUID.
    Guid(Uuid),
    /// Server id blob.
    ServerId(Vec<u8>),
    /// Embedded object blob.
    Object(Vec<u8>),
    /// Byte array.
    Binary(Vec<u8>),
    /// Values of a multi-valued property.
    Multiple(Vec<PropValue>),
    /// Resolved IDSET or CNSET.
    IdSet(IdSet),
    /// Resolved source key.
    LongTermId(LongTermId),
    /// Resolved change key.
    ChangeKey(Xid),
    /// Resolved predecessor change list.
    Pcl(PredecessorChangeList),
}

impl PropValue {
    /// Returns true if this value can be written under `tag`.
    #[must_use]
    pub fn fits(&self, tag: PropertyTag) -> bool {
        if tag.multi {
            return match self {
                Self::Multiple(values) => values
                    .iter()
                    .all(|value| value.fits(PropertyTag::new(tag.id, tag.ptype))),
                _ => false,
            };
        }
        if let Self::IdSet(_) = self {
            return tag == pid::IDSET_GIVEN || tag.ptype == PropertyType::Binary;
        }
        matches!(
            (tag.ptype, self),
            (PropertyType::Int16, Self::Int16(_))
                | (PropertyType::Int32, Self::Int32(_))
                | (PropertyType::Float32, Self::Float32(_))
                | (PropertyType::Float64, Self::Float64(_))
                | (PropertyType::Currency, Self::Currency(_))
                | (PropertyType::FloatingTime, Self::FloatingTime(_))
                | (PropertyType::ErrorCode, Self::ErrorCode(_))
                | (PropertyType::Boolean, Self::Boolean(_))
                | (PropertyType::Int64, Self::Int64(_))
                | (PropertyType::String8, Self::String8(_))
                | (PropertyType::String, Self::String(_))
                | (PropertyType::Time, Self::Time(_))
                | (PropertyType::Guid, Self::Guid(_))
                | (PropertyType::ServerId, Self::ServerId(_))
                | (PropertyType::Object, Self::Object(_))
                | (PropertyType::Binary, Self::Binary(_))
                | (PropertyType::Binary, Self::LongTermId(_))
                | (PropertyType::Binary, Self::ChangeKey(_))
                | (PropertyType::Binary, Self::Pcl(_))
        )
    }

    /// The integer value of an `Int16`, `Int32` or `Int64`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// The string of a `String` value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Time value.
    #[must_use]
    pub fn as_time(&self) -> Option<u64> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// Boolean value.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Resolved id set.
    #[must_use]
    pub fn as_idset(&self) -> Option<&IdSet> {
        match self {
            Self::IdSet(set) => Some(set),
            _ => None,
        }
    }

    /// Resolved long-term id.
    #[must_use]
    pub fn as_long_term_id(&self) -> Option<&LongTermId> {
        match self {
            Self::LongTermId(id) => Some(id),
            _ => None,
        }
    }

    /// Resolved change key.
    #[must_use]
    pub fn as_change_key(&self) -> Option<&Xid> {
        match self {
            Self::ChangeKey(xid) => Some(xid),
            _ => None,
        }
    }

    /// Resolved PCL.
    #[must_use]
    pub fn as_pcl(&self) -> Option<&PredecessorChangeList> {
        match self {
            Self::Pcl(pcl) => Some(pcl),
            _ => None,
        }
    }

    /// Raw bytes of a `Binary` value.
    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// One property record.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedProperty {
    /// Tag as it appears on the wire.
    pub tag: PropertyTag,
    /// Name, present for named property ids.
    pub name: Option<PropertyName>,
    /// Value.
    pub value: PropValue,
}

impl TaggedProperty {
    /// Creates an unnamed property.
    #[must_use]
    pub fn new(tag: PropertyTag, value: PropValue) -> Self {
        Self {
            tag,
            name: None,
            value,
        }
    }

    /// Creates a named property.
    #[must_use]
    pub fn named(tag: PropertyTag, name: PropertyName, value: PropValue) -> Self {
        Self {
            tag,
            name: Some(name),
            value,
        }
    }
}

/// Properties in stream order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyList {
    properties: Vec<TaggedProperty>,
}

impl PropertyList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a property.
    pub fn push(&mut self, property: TaggedProperty) {
        self.properties.push(property);
    }

    /// Appends an unnamed property, builder style.
    #[must_use]
    pub fn with(mut self, tag: PropertyTag, value: PropValue) -> Self {
        self.push(TaggedProperty::new(tag, value));
        self
    }

    /// Replaces the first value under `tag`, appending if there is none.
    pub fn set(&mut self, tag: PropertyTag, value: PropValue) {
        match self.properties.iter_mut().find(|property| property.tag == tag) {
            Some(property) => property.value = value,
            None => self.push(TaggedProperty::new(tag, value)),
        }
    }

    /// First value recorded under `tag`.
    #[must_use]
    pub fn get(&self, tag: PropertyTag) -> Option<&PropValue> {
        self.properties
            .iter()
            .find(|property| property.tag == tag)
            .map(|property| &property.value)
    }

    /// First value whose property id matches, regardless of type.
    #[must_use]
    pub fn get_by_id(&self, id: u16) -> Option<&PropValue> {
        self.properties
            .iter()
            .find(|property| property.tag.id == id)
            .map(|property| &property.value)
    }

    /// Properties in order.
    pub fn iter(&self) -> impl Iterator<Item = &TaggedProperty> {
        self.properties.iter()
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns true if there are no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl FromIterator<TaggedProperty> for PropertyList {
    fn from_iter<T: IntoIterator<Item = TaggedProperty>>(iter: T) -> Self {
        Self {
            properties: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PropertyList {
    type Item = &'a TaggedProperty;
    type IntoIter = std::slice::Iter<'a, TaggedProperty>;

    fn into_iter(self) -> Self::IntoIter {
        self.properties.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_tag_and_id() {
        let list = PropertyList::new()
            .with(pid::DISPLAY_NAME, PropValue::String("Inbox".into()))
            .with(pid::FOLDER_ID, PropValue::Int64(42));
        assert_eq!(list.get(pid::DISPLAY_NAME).and_then(PropValue::as_str), Some("Inbox"));
        assert_eq!(list.get_by_id(0x6748).and_then(PropValue::as_i64), Some(42));
        assert!(list.get(pid::SUBJECT).is_none());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn set_replaces_in_place() {
        let mut list = PropertyList::new()
            .with(pid::DISPLAY_NAME, PropValue::String("Inbox".into()))
            .with(pid::FOLDER_ID, PropValue::Int64(42));
        list.set(pid::DISPLAY_NAME, PropValue::String("Outbox".into()));
        list.set(pid::SUBJECT, PropValue::String("new".into()));
        assert_eq!(list.len(), 3);
        assert_eq!(list.iter().next().map(|property| property.tag), Some(pid::DISPLAY_NAME));
        assert_eq!(list.get(pid::DISPLAY_NAME).and_then(PropValue::as_str), Some("Outbox"));
        assert_eq!(list.get(pid::SUBJECT).and_then(PropValue::as_str), Some("new"));
    }

    #[test]
    fn values_fit_their_tags() {
        assert!(PropValue::Int32(1).fits(pid::MESSAGE_SIZE));
        assert!(!PropValue::Int64(1).fits(pid::MESSAGE_SIZE));
        assert!(PropValue::IdSet(IdSet::new()).fits(pid::IDSET_GIVEN));
        assert!(PropValue::IdSet(IdSet::new()).fits(pid::CNSET_SEEN));
        assert!(!PropValue::IdSet(IdSet::new()).fits(pid::MESSAGE_SIZE));
        let multi = PropertyTag::multi(0x1000, PropertyType::Int32);
        assert!(PropValue::Multiple(vec![PropValue::Int32(1), PropValue::Int32(2)]).fits(multi));
        assert!(!PropValue::Multiple(vec![PropValue::Int64(1)]).fits(multi));
        assert!(!PropValue::Int32(1).fits(multi));
    }
}
