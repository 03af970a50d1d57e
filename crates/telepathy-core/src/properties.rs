//! Cached remote properties and the rules for extracting them from
//! `Properties.GetAll` replies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    constants::{IFACE_CHANNEL, channel_props, conference_props, group_props, qualified},
    types::{
        GroupFlags, Handle, HandleIdentifierMap, HandleOwnerMap, HandleType, LocalPendingInfo,
        ObjectPath, PropertyMap, Variant,
    },
};

/// Cached `org.freedesktop.Telepathy.Channel` properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelProperties {
    pub channel_type: String,
    pub interfaces: Vec<String>,
    pub target_handle_type: HandleType,
    pub target_handle: Handle,
    pub target_id: String,
    pub requested: bool,
    pub initiator_handle: Handle,
}

impl ChannelProperties {
    pub fn has_interface(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|iface| iface == interface)
    }

    /// Target handle if the channel targets a single contact, else 0.
    pub fn contact_target(&self) -> Handle {
        if self.target_handle_type == HandleType::Contact {
            self.target_handle
        } else {
            0
        }
    }

    /// Take `Requested` and `InitiatorHandle` from the immutable properties.
    ///
    /// Returns the initiator identifier hint, if one was supplied.
    pub fn seed_from_immutable(&mut self, immutable: &PropertyMap) -> HandleIdentifierMap {
        let requested = qualified(IFACE_CHANNEL, channel_props::REQUESTED);
        let initiator = qualified(IFACE_CHANNEL, channel_props::INITIATOR_HANDLE);
        let initiator_id = qualified(IFACE_CHANNEL, channel_props::INITIATOR_ID);

        self.requested = prop_bool(immutable, &requested);
        self.initiator_handle = prop_u32(immutable, &initiator);

        let mut hints = HandleIdentifierMap::new();
        if let Some(id) = immutable.get(&initiator_id).and_then(Variant::as_str)
            && self.initiator_handle != 0
        {
            hints.insert(self.initiator_handle, id.to_owned());
        }
        hints
    }

    /// Store a `GetAll(Channel)` result that passed [`has_mandatory_channel_properties`].
    ///
    /// Returns identifier hints for the target and initiator.
    pub fn apply_main(&mut self, props: &PropertyMap) -> HandleIdentifierMap {
        self.interfaces = prop_str_list(props, channel_props::INTERFACES);
        self.channel_type = prop_string(props, channel_props::CHANNEL_TYPE);
        self.target_handle = prop_u32(props, channel_props::TARGET_HANDLE);
        self.target_handle_type =
            HandleType::from_raw(prop_u32(props, channel_props::TARGET_HANDLE_TYPE));

        let mut hints = HandleIdentifierMap::new();
        if props.contains_key(channel_props::TARGET_ID) {
            self.target_id = prop_string(props, channel_props::TARGET_ID);
            if self.target_handle_type == HandleType::Contact && self.target_handle != 0 {
                hints.insert(self.target_handle, self.target_id.clone());
            }
        }
        if let Some(requested) = props.get(channel_props::REQUESTED).and_then(Variant::as_bool) {
            self.requested = requested;
        }
        if let Some(initiator) = props
            .get(channel_props::INITIATOR_HANDLE)
            .and_then(Variant::as_u32)
        {
            self.initiator_handle = initiator;
        }
        if let Some(id) = props
            .get(channel_props::INITIATOR_ID)
            .and_then(Variant::as_str)
            && self.initiator_handle != 0
        {
            hints.insert(self.initiator_handle, id.to_owned());
        }
        hints
    }

    /// Fill in the qualified main keys an immutable property map lacks.
    pub fn complete_immutable(&self, immutable: &mut PropertyMap, initiator_id: Option<&str>) {
        let mut insert = |key: &str, value: Variant| {
            immutable
                .entry(qualified(IFACE_CHANNEL, key))
                .or_insert(value);
        };
        insert(
            channel_props::CHANNEL_TYPE,
            Variant::Str(self.channel_type.clone()),
        );
        insert(
            channel_props::INTERFACES,
            Variant::StrList(self.interfaces.clone()),
        );
        insert(
            channel_props::TARGET_HANDLE_TYPE,
            Variant::U32(self.target_handle_type.as_raw()),
        );
        insert(channel_props::TARGET_HANDLE, Variant::U32(self.target_handle));
        insert(channel_props::TARGET_ID, Variant::Str(self.target_id.clone()));
        insert(channel_props::REQUESTED, Variant::Bool(self.requested));
        insert(
            channel_props::INITIATOR_HANDLE,
            Variant::U32(self.initiator_handle),
        );
        if let Some(id) = initiator_id {
            insert(channel_props::INITIATOR_ID, Variant::Str(id.to_owned()));
        }
    }
}

/// Unqualified main properties, if all eight are present in the immutable set.
pub fn immutable_main_properties(immutable: &PropertyMap) -> Option<PropertyMap> {
    channel_props::IMMUTABLE
        .iter()
        .map(|key| {
            immutable
                .get(&qualified(IFACE_CHANNEL, key))
                .map(|value| ((*key).to_owned(), value.clone()))
        })
        .collect()
}

/// A `GetAll(Channel)` reply is usable when it has the keys older services lack.
pub fn has_mandatory_channel_properties(props: &PropertyMap) -> bool {
    props.len() >= 4
        && !prop_string(props, channel_props::CHANNEL_TYPE).is_empty()
        && props.contains_key(channel_props::INTERFACES)
        && props.contains_key(channel_props::TARGET_HANDLE)
        && props.contains_key(channel_props::TARGET_HANDLE_TYPE)
}

/// Group state as reported by a complete `GetAll(Channel.Interface.Group)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupProperties {
    pub flags: GroupFlags,
    pub handle_owners: HandleOwnerMap,
    pub members: Vec<Handle>,
    pub local_pending: Vec<LocalPendingInfo>,
    pub remote_pending: Vec<Handle>,
    pub self_handle: Handle,
}

/// Extract group properties, or `None` if the service predates the Group properties.
pub fn extract_group_properties(props: &PropertyMap) -> Option<GroupProperties> {
    let flags = GroupFlags::from_bits(prop_u32(props, group_props::GROUP_FLAGS));
    let complete = props.len() >= 6
        && props.contains_key(group_props::GROUP_FLAGS)
        && flags.contains(GroupFlags::PROPERTIES)
        && props.contains_key(group_props::HANDLE_OWNERS)
        && props.contains_key(group_props::LOCAL_PENDING_MEMBERS)
        && props.contains_key(group_props::MEMBERS)
        && props.contains_key(group_props::REMOTE_PENDING_MEMBERS)
        && props.contains_key(group_props::SELF_HANDLE);
    if !complete {
        return None;
    }

    Some(GroupProperties {
        flags,
        handle_owners: props
            .get(group_props::HANDLE_OWNERS)
            .and_then(Variant::as_handle_map)
            .cloned()
            .unwrap_or_default(),
        members: prop_u32_list(props, group_props::MEMBERS),
        local_pending: props
            .get(group_props::LOCAL_PENDING_MEMBERS)
            .and_then(Variant::as_local_pending_list)
            .map(<[LocalPendingInfo]>::to_vec)
            .unwrap_or_default(),
        remote_pending: prop_u32_list(props, group_props::REMOTE_PENDING_MEMBERS),
        self_handle: prop_u32(props, group_props::SELF_HANDLE),
    })
}

/// `GetAll(Channel.Interface.Conference)` contents; absent keys read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConferenceProperties {
    pub channels: Vec<ObjectPath>,
    pub initial_channels: Vec<ObjectPath>,
    pub initial_invitee_handles: Vec<Handle>,
    pub initial_invitee_ids: Vec<String>,
    pub invitation_message: String,
    pub original_channels: BTreeMap<Handle, ObjectPath>,
}

impl ConferenceProperties {
    pub fn from_map(props: &PropertyMap) -> Self {
        Self {
            channels: prop_path_list(props, conference_props::CHANNELS),
            initial_channels: prop_path_list(props, conference_props::INITIAL_CHANNELS),
            initial_invitee_handles: prop_u32_list(props, conference_props::INITIAL_INVITEE_HANDLES),
            initial_invitee_ids: prop_str_list(props, conference_props::INITIAL_INVITEE_IDS),
            invitation_message: prop_string(props, conference_props::INVITATION_MESSAGE),
            original_channels: props
                .get(conference_props::ORIGINAL_CHANNELS)
                .and_then(Variant::as_channel_originators)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Invitee identifier hints, only when handles and identifiers line up.
    pub fn invitee_hints(&self) -> HandleIdentifierMap {
        if self.initial_invitee_handles.len() != self.initial_invitee_ids.len() {
            return HandleIdentifierMap::new();
        }
        self.initial_invitee_handles
            .iter()
            .copied()
            .zip(self.initial_invitee_ids.iter().cloned())
            .collect()
    }
}

/// Everything the channel caches from remote properties.
#[derive(Debug, Clone, Default)]
pub struct PropertyCache {
    pub main: ChannelProperties,
    pub immutable: PropertyMap,
    pub group_flags: GroupFlags,
    pub handle_owners: HandleOwnerMap,
    pub handle_owners_available: bool,
}

impl PropertyCache {
    pub fn new(immutable: PropertyMap) -> Self {
        Self {
            immutable,
            ..Self::default()
        }
    }
}

pub fn prop_u32(props: &PropertyMap, key: &str) -> u32 {
    props.get(key).and_then(Variant::as_u32).unwrap_or(0)
}

pub fn prop_bool(props: &PropertyMap, key: &str) -> bool {
    props.get(key).and_then(Variant::as_bool).unwrap_or(false)
}

pub fn prop_string(props: &PropertyMap, key: &str) -> String {
    props
        .get(key)
        .and_then(Variant::as_str)
        .unwrap_or_default()
        .to_owned()
}

pub fn prop_str_list(props: &PropertyMap, key: &str) -> Vec<String> {
    props
        .get(key)
        .and_then(Variant::as_str_list)
        .map(<[String]>::to_vec)
        .unwrap_or_default()
}

pub fn prop_u32_list(props: &PropertyMap, key: &str) -> Vec<u32> {
    props
        .get(key)
        .and_then(Variant::as_u32_list)
        .map(<[u32]>::to_vec)
        .unwrap_or_default()
}

fn prop_path_list(props: &PropertyMap, key: &str) -> Vec<ObjectPath> {
    props
        .get(key)
        .and_then(Variant::as_object_path_list)
        .map(<[ObjectPath]>::to_vec)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CHANNEL_TYPE_TEXT, IFACE_CHANNEL_GROUP};

    fn main_props() -> PropertyMap {
        PropertyMap::from([
            (
                channel_props::CHANNEL_TYPE.to_owned(),
                Variant::Str(CHANNEL_TYPE_TEXT.to_owned()),
            ),
            (
                channel_props::INTERFACES.to_owned(),
                Variant::StrList(vec![IFACE_CHANNEL_GROUP.to_owned()]),
            ),
            (channel_props::TARGET_HANDLE.to_owned(), Variant::U32(7)),
            (channel_props::TARGET_HANDLE_TYPE.to_owned(), Variant::U32(1)),
            (
                channel_props::TARGET_ID.to_owned(),
                Variant::Str("bob@example.com".into()),
            ),
            (channel_props::REQUESTED.to_owned(), Variant::Bool(true)),
            (channel_props::INITIATOR_HANDLE.to_owned(), Variant::U32(3)),
        ])
    }

    #[test]
    fn accepts_complete_main_properties() {
        let props = main_props();
        assert!(has_mandatory_channel_properties(&props));

        let mut cache = ChannelProperties::default();
        let hints = cache.apply_main(&props);
        assert_eq!(cache.channel_type, CHANNEL_TYPE_TEXT);
        assert_eq!(cache.target_handle_type, HandleType::Contact);
        assert_eq!(cache.target_handle, 7);
        assert!(cache.requested);
        assert_eq!(cache.initiator_handle, 3);
        assert_eq!(hints.get(&7).map(String::as_str), Some("bob@example.com"));
        assert!(cache.has_interface(IFACE_CHANNEL_GROUP));
    }

    #[test]
    fn rejects_main_properties_with_empty_channel_type() {
        let mut props = main_props();
        props.insert(
            channel_props::CHANNEL_TYPE.to_owned(),
            Variant::Str(String::new()),
        );
        assert!(!has_mandatory_channel_properties(&props));

        let mut props = main_props();
        props.remove(channel_props::TARGET_HANDLE_TYPE);
        assert!(!has_mandatory_channel_properties(&props));
        assert!(!has_mandatory_channel_properties(&PropertyMap::new()));
    }

    #[test]
    fn immutable_properties_need_all_eight_keys() {
        let mut immutable: PropertyMap = main_props()
            .into_iter()
            .map(|(k, v)| (qualified(IFACE_CHANNEL, &k), v))
            .collect();
        assert!(immutable_main_properties(&immutable).is_none());

        immutable.insert(
            qualified(IFACE_CHANNEL, channel_props::INITIATOR_ID),
            Variant::Str("alice@example.com".into()),
        );
        let props = immutable_main_properties(&immutable).expect("all keys present");
        assert_eq!(props.len(), 8);
        assert_eq!(props.get(channel_props::TARGET_HANDLE), Some(&Variant::U32(7)));

        let mut cache = ChannelProperties::default();
        let hints = cache.seed_from_immutable(&immutable);
        assert!(cache.requested);
        assert_eq!(cache.initiator_handle, 3);
        assert_eq!(hints.get(&3).map(String::as_str), Some("alice@example.com"));
    }

    #[test]
    fn group_properties_require_the_properties_flag() {
        let mut props = PropertyMap::from([
            (group_props::GROUP_FLAGS.to_owned(), Variant::U32(0)),
            (
                group_props::HANDLE_OWNERS.to_owned(),
                Variant::HandleMap(BTreeMap::new()),
            ),
            (
                group_props::LOCAL_PENDING_MEMBERS.to_owned(),
                Variant::LocalPendingList(Vec::new()),
            ),
            (group_props::MEMBERS.to_owned(), Variant::U32List(vec![3, 7])),
            (
                group_props::REMOTE_PENDING_MEMBERS.to_owned(),
                Variant::U32List(Vec::new()),
            ),
            (group_props::SELF_HANDLE.to_owned(), Variant::U32(7)),
        ]);
        assert!(extract_group_properties(&props).is_none());

        props.insert(
            group_props::GROUP_FLAGS.to_owned(),
            Variant::U32(GroupFlags::PROPERTIES.bits()),
        );
        let group = extract_group_properties(&props).expect("complete group props");
        assert_eq!(group.members, vec![3, 7]);
        assert_eq!(group.self_handle, 7);
    }

    #[test]
    fn invitee_hints_need_matching_lengths() {
        let mut conference = ConferenceProperties {
            initial_invitee_handles: vec![4, 5],
            initial_invitee_ids: vec!["a".into()],
            ..ConferenceProperties::default()
        };
        assert!(conference.invitee_hints().is_empty());

        conference.initial_invitee_ids.push("b".into());
        assert_eq!(conference.invitee_hints().len(), 2);
    }
}
