//! Stream markers and delimiting meta-properties.

use std::fmt;

macro_rules! markers {
    ($( $(#[$doc:meta])* $name:ident = $value:literal, )*) => {
        /// A 4-byte marker that opens or closes a stream element.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Marker {
            $( $(#[$doc])* $name, )*
        }

        impl Marker {
            /// Every marker.
            pub const ALL: &'static [Marker] = &[$(Marker::$name,)*];

            /// Wire value.
            #[must_use]
            pub const fn value(self) -> u32 {
                match self {
                    $( Marker::$name => $value, )*
                }
            }

            /// Looks up a marker by wire value.
            #[must_use]
            pub const fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $( $value => Some(Marker::$name), )*
                    _ => None,
                }
            }

            /// Marker name.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $( Marker::$name => stringify!($name), )*
                }
            }
        }
    };
}

markers! {
    /// Opens the folder passed to a folder copy.
    StartTopFld = 0x4009_0003,
    /// Opens a subfolder.
    StartSubFld = 0x400A_0003,
    /// Closes a folder.
    EndFolder = 0x400B_0003,
    /// Opens a normal message.
    StartMessage = 0x400C_0003,
    /// Opens a folder-associated message.
    StartFAIMsg = 0x4010_0003,
    /// Closes a message.
    EndMessage = 0x400D_0003,
    /// Opens an embedded message inside an attachment.
    StartEmbed = 0x4001_0003,
    /// Closes an embedded message.
    EndEmbed = 0x4002_0003,
    /// Opens a recipient.
    StartRecip = 0x4003_0003,
    /// Closes a recipient.
    EndToRecip = 0x4004_0003,
    /// Opens an attachment.
    NewAttach = 0x4000_0003,
    /// Closes an attachment.
    EndAttach = 0x400E_0003,
    /// Opens a change header.
    IncrSyncChg = 0x4012_0003,
    /// Opens a partial change header.
    IncrSyncChgPartial = 0x407D_0003,
    /// Opens the deletions block.
    IncrSyncDel = 0x4013_0003,
    /// Ends a synchronization stream.
    IncrSyncEnd = 0x4014_0003,
    /// Opens the read-state block.
    IncrSyncRead = 0x402F_0003,
    /// Opens the checkpoint state.
    IncrSyncStateBegin = 0x403A_0003,
    /// Closes the checkpoint state.
    IncrSyncStateEnd = 0x403B_0003,
    /// Opens the whole-stream progress block.
    IncrSyncProgressMode = 0x4074_000B,
    /// Opens the per-message progress block.
    IncrSyncProgressPerMsg = 0x4075_000B,
    /// Separates a change header from the message body.
    IncrSyncMessage = 0x4015_0003,
    /// Carries property group information for partial changes.
    IncrSyncGroupInfo = 0x407B_0102,
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#010x})", self.name(), self.value())
    }
}

/// Meta-properties that sit between child elements and carry a 4-byte value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaTag {
    /// Names a subobject property the receiver should clear.
    FxDelProp,
    /// A warning code from the producer.
    EcWarning,
}

impl MetaTag {
    /// Wire value of the tag.
    #[must_use]
    pub const fn value(self) -> u32 {
        match self {
            Self::FxDelProp => 0x4016_0003,
            Self::EcWarning => 0x400F_0003,
        }
    }

    /// Looks up a meta tag by wire value.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x4016_0003 => Some(Self::FxDelProp),
            0x400F_0003 => Some(Self::EcWarning),
            _ => None,
        }
    }
}

/// A meta-property as it appears between children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaProperty {
    /// Clear the property with this tag on the receiver.
    DelProp(u32),
    /// Warning code.
    EcWarning(u32),
}

impl MetaProperty {
    /// The tag that introduces this meta-property.
    #[must_use]
    pub const fn tag(self) -> MetaTag {
        match self {
            Self::DelProp(_) => MetaTag::FxDelProp,
            Self::EcWarning(_) => MetaTag::EcWarning,
        }
    }

    /// The 4-byte payload.
    #[must_use]
    pub const fn payload(self) -> u32 {
        match self {
            Self::DelProp(value) | Self::EcWarning(value) => value,
        }
    }

    pub(crate) const fn new(tag: MetaTag, payload: u32) -> Self {
        match tag {
            MetaTag::FxDelProp => Self::DelProp(payload),
            MetaTag::EcWarning => Self::EcWarning(payload),
        }
    }
}

/// Returns true if `value` is a marker or a delimiting meta tag.
#[must_use]
pub fn is_delimiter(value: u32) -> bool {
    Marker::from_u32(value).is_some() || MetaTag::from_u32(value).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_unique_and_roundtrip() {
        for marker in Marker::ALL {
            assert_eq!(Marker::from_u32(marker.value()), Some(*marker));
            assert!(MetaTag::from_u32(marker.value()).is_none());
        }
        let mut values: Vec<u32> = Marker::ALL.iter().map(|m| m.value()).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), Marker::ALL.len());
    }

    #[test]
    fn display_includes_name() {
        assert_eq!(Marker::StartTopFld.to_string(), "StartTopFld(0x40090003)");
    }

    #[test]
    fn meta_tags() {
        assert_eq!(MetaTag::from_u32(0x4016_0003), Some(MetaTag::FxDelProp));
        assert!(is_delimiter(0x400F_0003));
        assert!(!is_delimiter(0x3001_001F));
        assert_eq!(MetaProperty::EcWarning(7).tag(), MetaTag::EcWarning);
    }
}
