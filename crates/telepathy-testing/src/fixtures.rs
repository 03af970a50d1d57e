//! Canned remote channels used across integration tests and the smoke binary.

use std::collections::BTreeMap;

use telepathy_core::{
    GroupFlags, Handle, HandleType, ObjectPath, PropertyMap, RemoteReply, RemoteRequest, Variant,
    constants::{
        CHANNEL_TYPE_TEXT, IFACE_CHANNEL, IFACE_CHANNEL_CONFERENCE, IFACE_CHANNEL_GROUP,
        IFACE_CHANNEL_MERGEABLE_CONFERENCE, channel_props, conference_props, group_props,
    },
};

use crate::FakeChannelRemote;

/// Handle of the local user on fixture connections.
pub const SELF_HANDLE: Handle = 7;
/// Handle of the contact that initiated fixture channels.
pub const INITIATOR_HANDLE: Handle = 3;

pub const TEXT_CHANNEL_PATH: &str = "/org/freedesktop/Telepathy/Connection/fake/jabber/text0";
pub const ROOM_CHANNEL_PATH: &str = "/org/freedesktop/Telepathy/Connection/fake/jabber/muc0";
pub const CONFERENCE_CHANNEL_PATH: &str =
    "/org/freedesktop/Telepathy/Connection/fake/jabber/conference0";

pub fn get_all(interface: &str) -> RemoteRequest {
    RemoteRequest::GetAll {
        interface: interface.to_owned(),
    }
}

/// `GetAll(Channel)` answer for a requested text channel.
pub fn main_properties(
    interfaces: &[&str],
    target_handle_type: HandleType,
    target_handle: Handle,
) -> PropertyMap {
    PropertyMap::from([
        (
            channel_props::CHANNEL_TYPE.to_owned(),
            Variant::Str(CHANNEL_TYPE_TEXT.to_owned()),
        ),
        (
            channel_props::INTERFACES.to_owned(),
            Variant::StrList(interfaces.iter().map(|s| (*s).to_owned()).collect()),
        ),
        (
            channel_props::TARGET_HANDLE.to_owned(),
            Variant::U32(target_handle),
        ),
        (
            channel_props::TARGET_HANDLE_TYPE.to_owned(),
            Variant::U32(target_handle_type.as_raw()),
        ),
        (channel_props::REQUESTED.to_owned(), Variant::Bool(true)),
        (
            channel_props::INITIATOR_HANDLE.to_owned(),
            Variant::U32(INITIATOR_HANDLE),
        ),
    ])
}

/// `GetAll(Group)` answer of a server exposing Group state as properties.
pub fn batched_group_properties(members: &[Handle], flags: GroupFlags) -> PropertyMap {
    PropertyMap::from([
        (
            group_props::GROUP_FLAGS.to_owned(),
            Variant::U32((flags | GroupFlags::PROPERTIES).bits()),
        ),
        (
            group_props::HANDLE_OWNERS.to_owned(),
            Variant::HandleMap(BTreeMap::new()),
        ),
        (
            group_props::MEMBERS.to_owned(),
            Variant::U32List(members.to_vec()),
        ),
        (
            group_props::LOCAL_PENDING_MEMBERS.to_owned(),
            Variant::LocalPendingList(Vec::new()),
        ),
        (
            group_props::REMOTE_PENDING_MEMBERS.to_owned(),
            Variant::U32List(Vec::new()),
        ),
        (group_props::SELF_HANDLE.to_owned(), Variant::U32(SELF_HANDLE)),
    ])
}

/// One-to-one text channel with handle 7 as target, whose Group interface
/// predates the property-based API.
///
/// The Group `GetAll` answer lacks the `PROPERTIES` flag, so introspection
/// takes the legacy per-method path.
pub fn legacy_group_channel() -> FakeChannelRemote {
    let members = vec![INITIATOR_HANDLE, SELF_HANDLE];
    FakeChannelRemote::new(TEXT_CHANNEL_PATH)
        .with_reply(
            get_all(IFACE_CHANNEL),
            Ok(RemoteReply::Properties(main_properties(
                &[IFACE_CHANNEL_GROUP],
                HandleType::Contact,
                SELF_HANDLE,
            ))),
        )
        .with_reply(
            get_all(IFACE_CHANNEL_GROUP),
            Ok(RemoteReply::Properties(PropertyMap::from([
                (
                    group_props::MEMBERS.to_owned(),
                    Variant::U32List(members.clone()),
                ),
                (
                    group_props::LOCAL_PENDING_MEMBERS.to_owned(),
                    Variant::LocalPendingList(Vec::new()),
                ),
                (
                    group_props::REMOTE_PENDING_MEMBERS.to_owned(),
                    Variant::U32List(Vec::new()),
                ),
                (group_props::SELF_HANDLE.to_owned(), Variant::U32(SELF_HANDLE)),
                (group_props::GROUP_FLAGS.to_owned(), Variant::U32(0)),
            ]))),
        )
        .with_reply(
            RemoteRequest::GetGroupFlags,
            Ok(RemoteReply::GroupFlags(GroupFlags::empty())),
        )
        .with_reply(
            RemoteRequest::GetAllMembers,
            Ok(RemoteReply::AllMembers {
                members,
                local_pending: Vec::new(),
                remote_pending: Vec::new(),
            }),
        )
        .with_reply(
            RemoteRequest::GetLocalPendingMembersWithInfo,
            Ok(RemoteReply::LocalPendingMembersWithInfo(Vec::new())),
        )
        .with_reply(
            RemoteRequest::GetSelfHandle,
            Ok(RemoteReply::SelfHandle(SELF_HANDLE)),
        )
}

/// Chat room whose Group interface emits `MembersChangedDetailed`.
pub fn detailed_group_channel(members: &[Handle], flags: GroupFlags) -> FakeChannelRemote {
    FakeChannelRemote::new(ROOM_CHANNEL_PATH)
        .with_reply(
            get_all(IFACE_CHANNEL),
            Ok(RemoteReply::Properties(main_properties(
                &[IFACE_CHANNEL_GROUP],
                HandleType::Room,
                1,
            ))),
        )
        .with_reply(
            get_all(IFACE_CHANNEL_GROUP),
            Ok(RemoteReply::Properties(batched_group_properties(
                members,
                flags | GroupFlags::MEMBERS_CHANGED_DETAILED,
            ))),
        )
}

/// Mergeable conference currently made of `channels`.
pub fn conference_channel(channels: &[ObjectPath]) -> FakeChannelRemote {
    FakeChannelRemote::new(CONFERENCE_CHANNEL_PATH)
        .with_reply(
            get_all(IFACE_CHANNEL),
            Ok(RemoteReply::Properties(main_properties(
                &[IFACE_CHANNEL_CONFERENCE, IFACE_CHANNEL_MERGEABLE_CONFERENCE],
                HandleType::None,
                0,
            ))),
        )
        .with_reply(
            get_all(IFACE_CHANNEL_CONFERENCE),
            Ok(RemoteReply::Properties(PropertyMap::from([
                (
                    conference_props::CHANNELS.to_owned(),
                    Variant::ObjectPathList(channels.to_vec()),
                ),
                (
                    conference_props::INITIAL_CHANNELS.to_owned(),
                    Variant::ObjectPathList(channels.to_vec()),
                ),
                (
                    conference_props::INVITATION_MESSAGE.to_owned(),
                    Variant::Str(String::new()),
                ),
            ]))),
        )
}
