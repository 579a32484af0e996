//! Configuration for synchronization contexts, transfers and sessions.

use crate::rop::BufferSize;
use fxsync_codec::{OrderingPolicy, PropertyTag};
use std::fmt;

/// What a synchronization context walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncType {
    /// Messages of one folder.
    Contents,
    /// The folder tree below one folder.
    Hierarchy,
}

impl SyncType {
    /// Wire code of the synchronization type.
    pub const fn code(self) -> u8 {
        match self {
            SyncType::Contents => 0x01,
            SyncType::Hierarchy => 0x02,
        }
    }

    /// Parses a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(SyncType::Contents),
            0x02 => Some(SyncType::Hierarchy),
            _ => None,
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncType::Contents => write!(f, "contents"),
            SyncType::Hierarchy => write!(f, "hierarchy"),
        }
    }
}

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $name:ident($repr:ty) {
            $($(#[$flag_meta:meta])* $flag:ident = $value:expr,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name($repr);

        impl $name {
            $($(#[$flag_meta])* pub const $flag: Self = Self($value);)*

            /// No flags set.
            pub const fn empty() -> Self {
                Self(0)
            }

            /// Builds a set from raw bits, keeping unknown bits.
            pub const fn from_bits(bits: $repr) -> Self {
                Self(bits)
            }

            /// Raw bits.
            pub const fn bits(self) -> $repr {
                self.0
            }

            /// Returns true if every flag of `other` is set.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Returns the union of both sets.
            #[must_use]
            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            /// Returns this set without the flags of `other`.
            #[must_use]
            pub const fn difference(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }
    };
}

flag_set! {
    /// Send options controlling string encoding and stream flavour.
    SendOptions(u8) {
        /// Strings are sent as UTF-16.
        UNICODE = 0x01,
        /// Strings use the code page of the property.
        USE_CPID = 0x02,
        /// The stream will be uploaded to another server.
        FOR_UPLOAD = 0x03,
        /// Skip unreadable items instead of failing.
        RECOVER_MODE = 0x04,
        /// Force UTF-16 even for String8 properties.
        FORCE_UNICODE = 0x08,
        /// Allow partial-item changes.
        PARTIAL_ITEM = 0x10,
    }
}

flag_set! {
    /// Behaviour flags of a synchronization context.
    SyncFlags(u16) {
        /// Client supports UTF-16 strings.
        UNICODE = 0x0001,
        /// Do not report deletions.
        NO_DELETIONS = 0x0002,
        /// Do not report items that left the scope.
        IGNORE_NO_LONGER_IN_SCOPE = 0x0004,
        /// Report read-state changes.
        READ_STATE = 0x0008,
        /// Include folder associated information messages.
        FAI = 0x0010,
        /// Include normal messages.
        NORMAL = 0x0020,
        /// The property filter is an include list.
        ONLY_SPECIFIED_PROPERTIES = 0x0080,
        /// Do not send identifiers of foreign replicas.
        NO_FOREIGN_IDENTIFIERS = 0x0100,
        /// Send the best body format only.
        BEST_BODY = 0x2000,
        /// Ignore the include list for FAI messages.
        IGNORE_SPECIFIED_ON_FAI = 0x4000,
        /// Emit progress information.
        PROGRESS = 0x8000,
    }
}

flag_set! {
    /// Extra properties requested per change header.
    SyncExtraFlags(u32) {
        /// Send the folder or message id.
        EID = 0x0000_0001,
        /// Send the message size.
        MESSAGE_SIZE = 0x0000_0002,
        /// Send the change number.
        CN = 0x0000_0004,
        /// Order changes by delivery time.
        ORDER_BY_DELIVERY_TIME = 0x0000_0008,
    }
}

/// Which properties a synchronization context transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyFilter {
    /// Everything except these tags.
    Exclude(Vec<PropertyTag>),
    /// Only these tags.
    Include(Vec<PropertyTag>),
}

impl PropertyFilter {
    /// The listed tags.
    pub fn tags(&self) -> &[PropertyTag] {
        match self {
            PropertyFilter::Exclude(tags) | PropertyFilter::Include(tags) => tags,
        }
    }
}

impl Default for PropertyFilter {
    fn default() -> Self {
        PropertyFilter::Exclude(Vec::new())
    }
}

/// Scope and flags of one synchronization download context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Contents or hierarchy.
    pub sync_type: SyncType,
    /// String and stream options.
    pub send_options: SendOptions,
    /// Synchronization flags.
    pub flags: SyncFlags,
    /// Extra per-change properties.
    pub extra_flags: SyncExtraFlags,
    /// Property filter.
    pub filter: PropertyFilter,
    /// Explicit ordering policy; derived from the extra flags when unset.
    pub ordering: Option<OrderingPolicy>,
}

impl SyncConfig {
    /// Creates a configuration with Unicode strings and no filter.
    pub fn new(sync_type: SyncType) -> Self {
        let flags = match sync_type {
            SyncType::Contents => SyncFlags::UNICODE | SyncFlags::NORMAL | SyncFlags::FAI,
            SyncType::Hierarchy => SyncFlags::UNICODE,
        };
        Self {
            sync_type,
            send_options: SendOptions::UNICODE,
            flags,
            extra_flags: SyncExtraFlags::empty(),
            filter: PropertyFilter::default(),
            ordering: None,
        }
    }

    /// Contents synchronization of normal and FAI messages.
    pub fn contents() -> Self {
        Self::new(SyncType::Contents)
    }

    /// Hierarchy synchronization.
    pub fn hierarchy() -> Self {
        Self::new(SyncType::Hierarchy)
    }

    /// Sets the send options.
    pub fn with_send_options(mut self, options: SendOptions) -> Self {
        self.send_options = options;
        self
    }

    /// Sets the synchronization flags.
    pub fn with_flags(mut self, flags: SyncFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the extra flags.
    pub fn with_extra_flags(mut self, extra_flags: SyncExtraFlags) -> Self {
        self.extra_flags = extra_flags;
        self
    }

    /// Transfers only the given tags.
    pub fn with_included(mut self, tags: Vec<PropertyTag>) -> Self {
        self.flags = self.flags | SyncFlags::ONLY_SPECIFIED_PROPERTIES;
        self.filter = PropertyFilter::Include(tags);
        self
    }

    /// Transfers everything except the given tags.
    pub fn with_excluded(mut self, tags: Vec<PropertyTag>) -> Self {
        self.flags = self.flags.difference(SyncFlags::ONLY_SPECIFIED_PROPERTIES);
        self.filter = PropertyFilter::Exclude(tags);
        self
    }

    /// Overrides the ordering policy.
    pub fn with_ordering_policy(mut self, policy: OrderingPolicy) -> Self {
        self.ordering = Some(policy);
        self
    }

    /// Ordering policy applied to downloaded change streams.
    ///
    /// Enforced when OrderByDeliveryTime was requested, unless overridden.
    pub fn ordering_policy(&self) -> OrderingPolicy {
        match self.ordering {
            Some(policy) => policy,
            None if self.extra_flags.contains(SyncExtraFlags::ORDER_BY_DELIVERY_TIME) => {
                OrderingPolicy::Enforced
            }
            None => OrderingPolicy::Unenforced,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::contents()
    }
}

/// Sizes used by the chunked transfer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Size requested from each get-buffer call.
    pub buffer_size: BufferSize,
    /// Largest chunk sent per put-buffer or state-stream call.
    pub upload_chunk: usize,
}

impl TransferConfig {
    /// Largest chunk the protocol allows in one buffer.
    pub const MAX_BUFFER: u16 = 0x7FFF;

    /// Creates a configuration that asks for the server default size.
    pub fn new() -> Self {
        Self {
            buffer_size: BufferSize::ServerDefault {
                maximum: Self::MAX_BUFFER,
            },
            upload_chunk: usize::from(Self::MAX_BUFFER),
        }
    }

    /// Requests exactly `size` bytes per chunk.
    pub fn with_buffer_size(mut self, size: u16) -> Self {
        self.buffer_size = BufferSize::Exact(size);
        self
    }

    /// Lets the server pick the chunk size, bounded by `maximum`.
    pub fn with_server_default(mut self, maximum: u16) -> Self {
        self.buffer_size = BufferSize::ServerDefault { maximum };
        self
    }

    /// Sets the upload chunk size. Zero is treated as one byte.
    pub fn with_upload_chunk(mut self, size: usize) -> Self {
        self.upload_chunk = size.max(1);
        self
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration of a [`SyncSession`](crate::SyncSession).
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Transfer sizes.
    pub transfer: TransferConfig,
    /// Check that hierarchy downloads list parents before children.
    pub verify_parent_order: bool,
}

impl SessionConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transfer configuration.
    pub fn with_transfer(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Enables or disables parent-before-child verification.
    pub fn with_parent_order_check(mut self, enabled: bool) -> Self {
        self.verify_parent_order = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxsync_codec::pid;

    #[test]
    fn ordering_follows_delivery_time_flag() {
        let config = SyncConfig::contents();
        assert_eq!(config.ordering_policy(), OrderingPolicy::Unenforced);

        let config = config.with_extra_flags(SyncExtraFlags::ORDER_BY_DELIVERY_TIME);
        assert_eq!(config.ordering_policy(), OrderingPolicy::Enforced);

        let config = config.with_ordering_policy(OrderingPolicy::Unenforced);
        assert_eq!(config.ordering_policy(), OrderingPolicy::Unenforced);
    }

    #[test]
    fn include_filter_sets_flag() {
        let config = SyncConfig::contents().with_included(vec![pid::SUBJECT]);
        assert!(config.flags.contains(SyncFlags::ONLY_SPECIFIED_PROPERTIES));
        assert_eq!(config.filter.tags(), &[pid::SUBJECT]);

        let config = config.with_excluded(vec![]);
        assert!(!config.flags.contains(SyncFlags::ONLY_SPECIFIED_PROPERTIES));
    }

    #[test]
    fn flag_sets_combine() {
        let flags = SyncExtraFlags::EID | SyncExtraFlags::CN;
        assert_eq!(flags.bits(), 0x5);
        assert!(flags.contains(SyncExtraFlags::CN));
        assert!(!flags.contains(SyncExtraFlags::MESSAGE_SIZE));
        assert_eq!(SyncType::from_code(SyncType::Hierarchy.code()), Some(SyncType::Hierarchy));
    }

    #[test]
    fn transfer_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.buffer_size.limit(), TransferConfig::MAX_BUFFER);
        assert_eq!(config.with_upload_chunk(0).upload_chunk, 1);
    }
}
