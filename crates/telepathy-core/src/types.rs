use std::{
    collections::BTreeMap,
    fmt,
    ops::{BitAnd, BitOr, Not},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{constants::details_keys, error::TpError};

/// Numeric handle assigned by the connection manager. `0` means "no handle".
pub type Handle = u32;

/// Handle owner mapping (channel-specific handle -> globally valid handle).
pub type HandleOwnerMap = BTreeMap<Handle, Handle>;

/// Identifier hints keyed by handle, forwarded to the contact resolver.
pub type HandleIdentifierMap = BTreeMap<Handle, String>;

/// Loosely typed property bag as returned by `Properties.GetAll`.
pub type PropertyMap = BTreeMap<String, Variant>;

/// Kind of entity a handle refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum HandleType {
    /// No handle (anonymous channels, conferences without a target).
    #[default]
    None,
    /// A single contact.
    Contact,
    /// A named chat room.
    Room,
    /// A server-side contact list (deprecated).
    List,
    /// A user-defined contact group (deprecated).
    Group,
    /// A value this client does not know about.
    Unknown(u32),
}

impl HandleType {
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Contact,
            2 => Self::Room,
            3 => Self::List,
            4 => Self::Group,
            other => Self::Unknown(other),
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Contact => 1,
            Self::Room => 2,
            Self::List => 3,
            Self::Group => 4,
            Self::Unknown(other) => other,
        }
    }
}

/// Reason attached to a group membership change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ChangeReason {
    #[default]
    None,
    Offline,
    Kicked,
    Busy,
    Invited,
    Banned,
    Error,
    InvalidContact,
    NoAnswer,
    /// The contact's handle changed (for example an IRC nick change).
    Renamed,
    PermissionDenied,
    Separated,
    Unknown(u32),
}

impl ChangeReason {
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Offline,
            2 => Self::Kicked,
            3 => Self::Busy,
            4 => Self::Invited,
            5 => Self::Banned,
            6 => Self::Error,
            7 => Self::InvalidContact,
            8 => Self::NoAnswer,
            9 => Self::Renamed,
            10 => Self::PermissionDenied,
            11 => Self::Separated,
            other => Self::Unknown(other),
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Offline => 1,
            Self::Kicked => 2,
            Self::Busy => 3,
            Self::Invited => 4,
            Self::Banned => 5,
            Self::Error => 6,
            Self::InvalidContact => 7,
            Self::NoAnswer => 8,
            Self::Renamed => 9,
            Self::PermissionDenied => 10,
            Self::Separated => 11,
            Self::Unknown(other) => other,
        }
    }
}

/// Bit set of `Channel.Interface.Group` flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(transparent)]
pub struct GroupFlags(u32);

impl GroupFlags {
    pub const CAN_ADD: Self = Self(1);
    pub const CAN_REMOVE: Self = Self(2);
    pub const CAN_RESCIND: Self = Self(4);
    pub const MESSAGE_ADD: Self = Self(8);
    pub const MESSAGE_REMOVE: Self = Self(16);
    pub const MESSAGE_ACCEPT: Self = Self(32);
    pub const MESSAGE_REJECT: Self = Self(64);
    pub const MESSAGE_RESCIND: Self = Self(128);
    pub const CHANNEL_SPECIFIC_HANDLES: Self = Self(256);
    pub const ONLY_ONE_GROUP: Self = Self(512);
    pub const HANDLE_OWNERS_NOT_AVAILABLE: Self = Self(1024);
    /// The Group interface exposes its state as D-Bus properties.
    pub const PROPERTIES: Self = Self(2048);
    /// The channel emits `MembersChangedDetailed` instead of `MembersChanged`.
    pub const MEMBERS_CHANGED_DETAILED: Self = Self(4096);
    pub const MESSAGE_DEPART: Self = Self(8192);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for GroupFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for GroupFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for GroupFlags {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

/// D-Bus object path of a remote object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(transparent)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One entry of the `LocalPendingMembers` list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalPendingInfo {
    /// Handle waiting for local approval.
    pub to_be_added: Handle,
    /// Handle of whoever put the contact into local-pending (0 if unknown).
    pub actor: Handle,
    pub reason: ChangeReason,
    pub message: String,
}

/// Untyped value of a D-Bus property or details map entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Variant {
    Bool(bool),
    U32(u32),
    Str(String),
    StrList(Vec<String>),
    U32List(Vec<u32>),
    ObjectPath(ObjectPath),
    ObjectPathList(Vec<ObjectPath>),
    /// `a{uu}`, for example `HandleOwners`.
    HandleMap(BTreeMap<Handle, Handle>),
    /// `a{us}`, for example the `contact-ids` detail.
    HandleIdentifiers(HandleIdentifierMap),
    /// `a(uuus)`, the `LocalPendingMembers` property.
    LocalPendingList(Vec<LocalPendingInfo>),
    /// `a{uo}`, the `OriginalChannels` property.
    ChannelOriginators(BTreeMap<Handle, ObjectPath>),
    Map(PropertyMap),
}

impl Variant {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            Self::StrList(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_u32_list(&self) -> Option<&[u32]> {
        match self {
            Self::U32List(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_object_path_list(&self) -> Option<&[ObjectPath]> {
        match self {
            Self::ObjectPathList(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_handle_map(&self) -> Option<&BTreeMap<Handle, Handle>> {
        match self {
            Self::HandleMap(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_handle_identifiers(&self) -> Option<&HandleIdentifierMap> {
        match self {
            Self::HandleIdentifiers(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_local_pending_list(&self) -> Option<&[LocalPendingInfo]> {
        match self {
            Self::LocalPendingList(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_channel_originators(&self) -> Option<&BTreeMap<Handle, ObjectPath>> {
        match self {
            Self::ChannelOriginators(value) => Some(value),
            _ => None,
        }
    }
}

/// Contact as produced by the contact resolver.
///
/// Contacts are shared between channels; the channel only ever reads the
/// handle and identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    handle: Handle,
    id: String,
}

impl Contact {
    pub fn new(handle: Handle, id: impl Into<String>) -> Self {
        Self {
            handle,
            id: id.into(),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Shared contact reference.
pub type ContactPtr = Arc<Contact>;

/// Contacts resolved for one resolution request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedContacts {
    /// Successfully resolved contacts.
    pub contacts: Vec<ContactPtr>,
    /// Handles the resolver rejected.
    pub invalid_handles: Vec<Handle>,
}

/// Details of a group membership change as seen by listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMemberChangeDetails {
    actor: Option<ContactPtr>,
    details: PropertyMap,
}

impl GroupMemberChangeDetails {
    pub fn new(actor: Option<ContactPtr>, details: PropertyMap) -> Self {
        Self { actor, details }
    }

    pub fn has_actor(&self) -> bool {
        self.actor.is_some()
    }

    pub fn actor(&self) -> Option<&ContactPtr> {
        self.actor.as_ref()
    }

    /// Actor handle from the raw details, even when the actor contact is unknown.
    pub fn actor_handle(&self) -> Handle {
        detail_u32(&self.details, details_keys::ACTOR).unwrap_or(0)
    }

    pub fn has_reason(&self) -> bool {
        self.details.contains_key(details_keys::CHANGE_REASON)
    }

    pub fn reason(&self) -> ChangeReason {
        detail_u32(&self.details, details_keys::CHANGE_REASON)
            .map(ChangeReason::from_raw)
            .unwrap_or_default()
    }

    pub fn has_message(&self) -> bool {
        self.details.contains_key(details_keys::MESSAGE)
    }

    pub fn message(&self) -> &str {
        detail_str(&self.details, details_keys::MESSAGE)
    }

    pub fn has_error(&self) -> bool {
        self.details.contains_key(details_keys::ERROR)
    }

    pub fn error(&self) -> &str {
        detail_str(&self.details, details_keys::ERROR)
    }

    pub fn has_debug_message(&self) -> bool {
        self.details.contains_key(details_keys::DEBUG_MESSAGE)
    }

    pub fn debug_message(&self) -> &str {
        detail_str(&self.details, details_keys::DEBUG_MESSAGE)
    }

    /// The raw details map, including protocol-specific extensions.
    pub fn all_details(&self) -> &PropertyMap {
        &self.details
    }
}

fn detail_u32(details: &PropertyMap, key: &str) -> Option<u32> {
    details.get(key).and_then(Variant::as_u32)
}

fn detail_str<'a>(details: &'a PropertyMap, key: &str) -> &'a str {
    details.get(key).and_then(Variant::as_str).unwrap_or_default()
}

/// Notification emitted by a channel to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Group membership changed. At least one of the four sets is non-empty.
    GroupMembersChanged {
        added: Vec<ContactPtr>,
        local_pending: Vec<ContactPtr>,
        remote_pending: Vec<ContactPtr>,
        removed: Vec<ContactPtr>,
        details: GroupMemberChangeDetails,
    },
    /// The contact representing the local user in this group changed.
    GroupSelfContactChanged,
    GroupFlagsChanged {
        flags: GroupFlags,
        added: GroupFlags,
        removed: GroupFlags,
    },
    GroupCanAddContactsChanged(bool),
    GroupCanRemoveContactsChanged(bool),
    GroupCanRescindContactsChanged(bool),
    GroupHandleOwnersChanged {
        owners: HandleOwnerMap,
        added: Vec<Handle>,
        removed: Vec<Handle>,
    },
    ConferenceChannelMerged {
        channel: ObjectPath,
    },
    ConferenceChannelRemoved {
        channel: ObjectPath,
        details: GroupMemberChangeDetails,
    },
    /// The channel became permanently unusable.
    Invalidated { error: TpError },
}

/// Lifecycle of a channel proxy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelLifecycleState {
    /// Waiting for the owning connection to become ready.
    Constructing,
    /// Core introspection is running.
    Introspecting,
    /// Core feature is ready.
    Ready,
    /// Terminal; the channel is closed or its connection is gone.
    Invalidated,
}

/// Serializable view of a channel's cached state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub object_path: ObjectPath,
    pub state: ChannelLifecycleState,
    pub channel_type: String,
    pub interfaces: Vec<String>,
    pub target_handle_type: HandleType,
    pub target_handle: Handle,
    pub target_id: String,
    pub requested: bool,
    pub initiator_handle: Handle,
    pub group_flags: GroupFlags,
    pub self_handle: Handle,
    pub members: Vec<Contact>,
    pub local_pending: Vec<Contact>,
    pub remote_pending: Vec<Contact>,
    pub handle_owners: HandleOwnerMap,
    pub conference_channels: Vec<ObjectPath>,
    pub invalidation: Option<TpError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_flag_helpers_behave_like_bit_sets() {
        let flags = GroupFlags::CAN_ADD | GroupFlags::PROPERTIES;
        assert!(flags.contains(GroupFlags::CAN_ADD));
        assert!(!flags.contains(GroupFlags::CAN_REMOVE));
        assert_eq!((flags & !GroupFlags::PROPERTIES), GroupFlags::CAN_ADD);
        assert_eq!(GroupFlags::MEMBERS_CHANGED_DETAILED.bits(), 4096);
    }

    #[test]
    fn unknown_wire_values_survive_conversion() {
        assert_eq!(HandleType::from_raw(42).as_raw(), 42);
        assert_eq!(ChangeReason::from_raw(9), ChangeReason::Renamed);
        assert_eq!(ChangeReason::from_raw(77).as_raw(), 77);
    }

    #[test]
    fn change_details_read_typed_values_from_raw_map() {
        let mut raw = PropertyMap::new();
        raw.insert(details_keys::ACTOR.to_owned(), Variant::U32(5));
        raw.insert(details_keys::CHANGE_REASON.to_owned(), Variant::U32(2));
        raw.insert(details_keys::MESSAGE.to_owned(), Variant::Str("bye".into()));

        let details = GroupMemberChangeDetails::new(None, raw);
        assert!(!details.has_actor());
        assert_eq!(details.actor_handle(), 5);
        assert!(details.has_reason());
        assert_eq!(details.reason(), ChangeReason::Kicked);
        assert_eq!(details.message(), "bye");
        assert!(!details.has_error());
        assert_eq!(details.error(), "");
    }
}
