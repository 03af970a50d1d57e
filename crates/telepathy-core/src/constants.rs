//! Well-known Telepathy interface names, property keys and detail keys.

/// `org.freedesktop.Telepathy.Channel`
pub const IFACE_CHANNEL: &str = "org.freedesktop.Telepathy.Channel";
/// `org.freedesktop.Telepathy.Channel.Interface.Group`
pub const IFACE_CHANNEL_GROUP: &str = "org.freedesktop.Telepathy.Channel.Interface.Group";
/// `org.freedesktop.Telepathy.Channel.Interface.Conference`
pub const IFACE_CHANNEL_CONFERENCE: &str =
    "org.freedesktop.Telepathy.Channel.Interface.Conference";
/// Draft interface advertising that other channels can be merged into this one.
pub const IFACE_CHANNEL_MERGEABLE_CONFERENCE: &str =
    "org.freedesktop.Telepathy.Channel.Interface.MergeableConference.DRAFT";
/// Draft interface advertising that this channel can be split from its conference.
pub const IFACE_CHANNEL_SPLITTABLE: &str =
    "org.freedesktop.Telepathy.Channel.Interface.Splittable.DRAFT";

/// `org.freedesktop.Telepathy.Channel.Type.Text`
pub const CHANNEL_TYPE_TEXT: &str = "org.freedesktop.Telepathy.Channel.Type.Text";
/// `org.freedesktop.Telepathy.Channel.Type.StreamedMedia`
pub const CHANNEL_TYPE_STREAMED_MEDIA: &str =
    "org.freedesktop.Telepathy.Channel.Type.StreamedMedia";

/// Unqualified keys returned by `GetAll(Channel)`.
pub mod channel_props {
    pub const CHANNEL_TYPE: &str = "ChannelType";
    pub const INTERFACES: &str = "Interfaces";
    pub const TARGET_HANDLE_TYPE: &str = "TargetHandleType";
    pub const TARGET_HANDLE: &str = "TargetHandle";
    pub const TARGET_ID: &str = "TargetID";
    pub const REQUESTED: &str = "Requested";
    pub const INITIATOR_HANDLE: &str = "InitiatorHandle";
    pub const INITIATOR_ID: &str = "InitiatorID";

    /// Keys that, fully qualified, make up the immutable property set.
    pub const IMMUTABLE: [&str; 8] = [
        CHANNEL_TYPE,
        INTERFACES,
        TARGET_HANDLE_TYPE,
        TARGET_HANDLE,
        TARGET_ID,
        REQUESTED,
        INITIATOR_HANDLE,
        INITIATOR_ID,
    ];
}

/// Unqualified keys returned by `GetAll(Channel.Interface.Group)`.
pub mod group_props {
    pub const GROUP_FLAGS: &str = "GroupFlags";
    pub const HANDLE_OWNERS: &str = "HandleOwners";
    pub const LOCAL_PENDING_MEMBERS: &str = "LocalPendingMembers";
    pub const MEMBERS: &str = "Members";
    pub const REMOTE_PENDING_MEMBERS: &str = "RemotePendingMembers";
    pub const SELF_HANDLE: &str = "SelfHandle";
}

/// Unqualified keys returned by `GetAll(Channel.Interface.Conference)`.
pub mod conference_props {
    pub const CHANNELS: &str = "Channels";
    pub const INITIAL_CHANNELS: &str = "InitialChannels";
    pub const INITIAL_INVITEE_HANDLES: &str = "InitialInviteeHandles";
    pub const INITIAL_INVITEE_IDS: &str = "InitialInviteeIDs";
    pub const INVITATION_MESSAGE: &str = "InvitationMessage";
    pub const ORIGINAL_CHANNELS: &str = "OriginalChannels";
}

/// Keys of the details map carried by `MembersChangedDetailed` and `ChannelRemoved`.
pub mod details_keys {
    pub const ACTOR: &str = "actor";
    pub const CHANGE_REASON: &str = "change-reason";
    pub const MESSAGE: &str = "message";
    pub const CONTACT_IDS: &str = "contact-ids";
    pub const ERROR: &str = "error";
    pub const DEBUG_MESSAGE: &str = "debug-message";
}

/// Qualify a property name with its interface (`Interface.Property`).
pub fn qualified(interface: &str, property: &str) -> String {
    format!("{interface}.{property}")
}
