use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use telepathy_core::{
    ChangeReason, ChannelCore, ChannelLifecycleState, ChannelSnapshot, ContactPtr, Feature,
    GroupFlags, GroupMemberChangeDetails, Handle, HandleOwnerMap, HandleType, ObjectPath, OpId,
    PropertyMap, TpError,
};
use crate::{
    bus::{CommandKind, CommandQueue, EventBus, EventStream},
    config::ClientConfig,
    connection::Connection,
    pending::PendingOperation,
    remote::ChannelRemote,
    runtime::{ChannelRuntime, ProxyMap, SharedCore},
};

struct ChannelShared {
    object_path: ObjectPath,
    connection: Arc<Connection>,
    core: SharedCore,
    proxies: ProxyMap,
    commands: CommandQueue,
    events: EventBus,
    next_op: AtomicU64,
}

/// Client-side proxy for a remote Telepathy channel.
///
/// Cloning is cheap and every clone refers to the same channel. The channel's
/// runtime task stops once the last clone is dropped. Must be created from
/// inside a tokio runtime.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<ChannelShared>,
}

impl Channel {
    /// Main properties, group membership and conference details.
    pub const FEATURE_CORE: Feature = ChannelCore::FEATURE_CORE;
    /// Contacts for the conference's initial invitees.
    pub const FEATURE_CONFERENCE_INITIAL_INVITEE_CONTACTS: Feature =
        ChannelCore::FEATURE_CONFERENCE_INITIAL_INVITEE_CONTACTS;

    pub fn new(
        connection: Arc<Connection>,
        remote: Arc<dyn ChannelRemote>,
        immutable_properties: PropertyMap,
    ) -> Self {
        Self::with_config(
            connection,
            remote,
            immutable_properties,
            &ClientConfig::default(),
        )
    }

    pub fn with_config(
        connection: Arc<Connection>,
        remote: Arc<dyn ChannelRemote>,
        immutable_properties: PropertyMap,
        config: &ClientConfig,
    ) -> Self {
        let object_path = remote.object_path().clone();
        let core = Arc::new(RwLock::new(ChannelCore::with_options(
            object_path.clone(),
            immutable_properties,
            config.core_options(),
        )));
        let proxies: ProxyMap = Arc::new(RwLock::new(HashMap::new()));
        let (commands, command_rx) = CommandQueue::new();
        let events = EventBus::new(config.event_buffer);

        let runtime = ChannelRuntime::new(
            Arc::clone(&core),
            Arc::clone(&proxies),
            Arc::clone(&connection),
            remote,
            command_rx,
            events.clone(),
        );
        tokio::spawn(runtime.run());

        Self {
            shared: Arc::new(ChannelShared {
                object_path,
                connection,
                core,
                proxies,
                commands,
                events,
                next_op: AtomicU64::new(0),
            }),
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.shared.connection
    }

    pub fn object_path(&self) -> &ObjectPath {
        &self.shared.object_path
    }

    /// Subscribe to channel notifications.
    pub fn subscribe(&self) -> EventStream {
        self.shared.events.subscribe()
    }

    // Operations

    /// Introspect `features`; completes once all are ready or one failed.
    pub fn become_ready(&self, features: &[Feature]) -> PendingOperation {
        self.submit(CommandKind::BecomeReady {
            features: features.to_vec(),
        })
    }

    pub fn request_close(&self) -> PendingOperation {
        self.submit(CommandKind::Close)
    }

    /// Leave the channel, closing it if leaving is not possible.
    pub fn request_leave(&self, message: &str, reason: ChangeReason) -> PendingOperation {
        self.submit(CommandKind::Leave {
            message: message.to_owned(),
            reason,
        })
    }

    pub fn group_add_contacts(&self, contacts: &[ContactPtr], message: &str) -> PendingOperation {
        self.submit(CommandKind::AddContacts {
            contacts: contacts.to_vec(),
            message: message.to_owned(),
        })
    }

    pub fn group_remove_contacts(
        &self,
        contacts: &[ContactPtr],
        message: &str,
        reason: ChangeReason,
    ) -> PendingOperation {
        self.submit(CommandKind::RemoveContacts {
            contacts: contacts.to_vec(),
            message: message.to_owned(),
            reason,
        })
    }

    /// Add the local user to the group, for example to accept an invitation.
    pub fn group_add_self_handle(&self) -> PendingOperation {
        self.submit(CommandKind::AddSelfHandle)
    }

    /// Merge `channel` into this conference.
    pub fn conference_merge_channel(&self, channel: &Channel) -> PendingOperation {
        self.submit(CommandKind::MergeChannel {
            channel: channel.object_path().clone(),
        })
    }

    /// Split this channel out of the conference it belongs to.
    pub fn conference_split_channel(&self) -> PendingOperation {
        self.submit(CommandKind::SplitChannel)
    }

    fn submit(&self, kind: CommandKind) -> PendingOperation {
        let op = OpId(self.shared.next_op.fetch_add(1, Ordering::Relaxed) + 1);
        match self.shared.commands.submit(op, kind) {
            Ok(reply) => PendingOperation::new(op, reply),
            Err(err) => PendingOperation::failed(op, TpError::not_available(err.to_string())),
        }
    }

    // Accessors

    fn read<R>(&self, f: impl FnOnce(&ChannelCore) -> R) -> R {
        let core = self
            .shared
            .core
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&core)
    }

    pub fn state(&self) -> ChannelLifecycleState {
        self.read(ChannelCore::state)
    }

    pub fn is_ready(&self, feature: &Feature) -> bool {
        self.read(|core| core.is_ready(feature))
    }

    pub fn is_valid(&self) -> bool {
        self.read(ChannelCore::is_valid)
    }

    /// Error the channel was invalidated with, if it was.
    pub fn invalidation(&self) -> Option<TpError> {
        self.read(|core| core.invalidation().cloned())
    }

    pub fn interfaces(&self) -> Vec<String> {
        self.read(|core| core.interfaces().to_vec())
    }

    pub fn has_interface(&self, interface: &str) -> bool {
        self.read(|core| core.has_interface(interface))
    }

    pub fn channel_type(&self) -> String {
        self.read(|core| core.channel_type().to_owned())
    }

    pub fn target_handle_type(&self) -> HandleType {
        self.read(ChannelCore::target_handle_type)
    }

    pub fn target_handle(&self) -> Handle {
        self.read(ChannelCore::target_handle)
    }

    pub fn target_id(&self) -> String {
        self.read(|core| core.target_id().to_owned())
    }

    pub fn target_contact(&self) -> Option<ContactPtr> {
        self.read(|core| core.target_contact().cloned())
    }

    pub fn is_requested(&self) -> bool {
        self.read(ChannelCore::is_requested)
    }

    pub fn initiator_contact(&self) -> Option<ContactPtr> {
        self.read(|core| core.initiator_contact().cloned())
    }

    pub fn immutable_properties(&self) -> PropertyMap {
        self.read(ChannelCore::immutable_properties)
    }

    pub fn group_flags(&self) -> GroupFlags {
        self.read(ChannelCore::group_flags)
    }

    pub fn group_can_add_contacts(&self) -> bool {
        self.read(ChannelCore::group_can_add_contacts)
    }

    pub fn group_can_add_contacts_with_message(&self) -> bool {
        self.read(ChannelCore::group_can_add_contacts_with_message)
    }

    pub fn group_can_accept_contacts_with_message(&self) -> bool {
        self.read(ChannelCore::group_can_accept_contacts_with_message)
    }

    pub fn group_can_remove_contacts(&self) -> bool {
        self.read(ChannelCore::group_can_remove_contacts)
    }

    pub fn group_can_remove_contacts_with_message(&self) -> bool {
        self.read(ChannelCore::group_can_remove_contacts_with_message)
    }

    pub fn group_can_reject_contacts_with_message(&self) -> bool {
        self.read(ChannelCore::group_can_reject_contacts_with_message)
    }

    pub fn group_can_depart_with_message(&self) -> bool {
        self.read(ChannelCore::group_can_depart_with_message)
    }

    pub fn group_can_rescind_contacts(&self) -> bool {
        self.read(ChannelCore::group_can_rescind_contacts)
    }

    pub fn group_can_rescind_contacts_with_message(&self) -> bool {
        self.read(ChannelCore::group_can_rescind_contacts_with_message)
    }

    pub fn group_contacts(&self, include_self: bool) -> Vec<ContactPtr> {
        self.read(|core| core.group_contacts(include_self))
    }

    pub fn group_local_pending_contacts(&self, include_self: bool) -> Vec<ContactPtr> {
        self.read(|core| core.group_local_pending_contacts(include_self))
    }

    pub fn group_remote_pending_contacts(&self, include_self: bool) -> Vec<ContactPtr> {
        self.read(|core| core.group_remote_pending_contacts(include_self))
    }

    pub fn group_local_pending_contact_change_info(
        &self,
        contact: &ContactPtr,
    ) -> GroupMemberChangeDetails {
        self.read(|core| core.group_local_pending_contact_change_info(contact))
    }

    pub fn group_self_contact_remove_info(&self) -> Option<GroupMemberChangeDetails> {
        self.read(|core| core.group_self_contact_remove_info().cloned())
    }

    pub fn group_are_handle_owners_available(&self) -> bool {
        self.read(ChannelCore::group_are_handle_owners_available)
    }

    pub fn group_handle_owners(&self) -> HandleOwnerMap {
        self.read(|core| core.group_handle_owners().clone())
    }

    pub fn group_is_self_contact_tracked(&self) -> bool {
        self.read(ChannelCore::group_is_self_contact_tracked)
    }

    pub fn group_self_contact(&self) -> Option<ContactPtr> {
        self.read(|core| core.group_self_contact().cloned())
    }

    pub fn group_self_handle_is_local_pending(&self) -> bool {
        self.read(ChannelCore::group_self_handle_is_local_pending)
    }

    pub fn is_conference(&self) -> bool {
        self.read(ChannelCore::is_conference)
    }

    pub fn conference_channels(&self) -> Vec<ObjectPath> {
        self.read(|core| core.conference_channels().to_vec())
    }

    pub fn conference_initial_channels(&self) -> Vec<ObjectPath> {
        self.read(|core| core.conference_initial_channels().to_vec())
    }

    pub fn conference_original_channels(&self) -> BTreeMap<Handle, ObjectPath> {
        self.read(|core| core.conference_original_channels().clone())
    }

    pub fn conference_initial_invitee_contacts(&self) -> Vec<ContactPtr> {
        self.read(|core| core.conference_initial_invitee_contacts().to_vec())
    }

    pub fn conference_invitation_message(&self) -> String {
        self.read(|core| core.conference_invitation_message().to_owned())
    }

    /// Proxy created for a conference sub-channel, once it has been discovered.
    pub fn conference_channel_proxy(&self, object_path: &ObjectPath) -> Option<Channel> {
        self.shared
            .proxies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(object_path)
            .cloned()
    }

    pub fn supports_conference_merging(&self) -> bool {
        self.read(ChannelCore::supports_conference_merging)
    }

    pub fn supports_conference_splitting(&self) -> bool {
        self.read(ChannelCore::supports_conference_splitting)
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        self.read(ChannelCore::snapshot)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("object_path", &self.shared.object_path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
