//! The channel coordinator.
//!
//! [`ChannelCore`] owns the introspection queue, the group membership engine
//! and the readiness tracker of one remote channel. It performs no I/O: every
//! input is a method call and every output is an [`Effect`] for the driver to
//! carry out. Readiness of the core feature is decided in exactly one place,
//! [`ChannelCore::try_finalize_readiness`], which both queues consult when they
//! drain.

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use crate::{
    conference::{ConferenceState, RemovalStep},
    constants::{
        IFACE_CHANNEL, IFACE_CHANNEL_CONFERENCE, IFACE_CHANNEL_GROUP,
        IFACE_CHANNEL_MERGEABLE_CONFERENCE, IFACE_CHANNEL_SPLITTABLE,
    },
    error::TpError,
    group::{Admission, EngineStep, GroupMembershipEngine, MembershipEvent},
    introspection::{IntrospectStep, IntrospectionQueue},
    normalization::{
        closed_error, invalid_owner_error, legacy_members_changed_details, orphaned_error,
    },
    properties::{
        ConferenceProperties, PropertyCache, extract_group_properties,
        has_mandatory_channel_properties, immutable_main_properties,
    },
    protocol::{
        CallId, ChannelSignal, Effect, OpId, RemoteReply, RemoteRequest, ResolvePurpose,
        unexpected_reply,
    },
    readiness::{Feature, Introspectable, ReadinessTracker},
    state_machine::ChannelStateMachine,
    types::{
        ChangeReason, ChannelEvent, ChannelLifecycleState, ChannelSnapshot, ContactPtr,
        GroupFlags, GroupMemberChangeDetails, Handle, HandleIdentifierMap, HandleOwnerMap,
        HandleType, LocalPendingInfo, ObjectPath, PropertyMap, ResolvedContacts,
    },
};

/// Tunables that change how the core treats legacy services and early reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreOptions {
    /// Log a warning when an accessor is read before the channel is ready.
    pub warn_not_ready: bool,
    /// Synthesize a two-member group for one-to-one channels without a Group interface.
    pub fake_group: bool,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            warn_not_ready: true,
            fake_group: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeatureStep {
    Core,
    ConferenceInitialInvitees,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingCall {
    Introspect(IntrospectStep),
    Operation(OpId),
    Leave(OpId),
    LeaveClose(OpId),
}

#[derive(Debug, Clone, Default)]
struct InitialGroup {
    members: Vec<Handle>,
    local_pending: Vec<LocalPendingInfo>,
    remote_pending: Vec<Handle>,
}

#[derive(Debug)]
pub struct ChannelCore {
    object_path: ObjectPath,
    options: CoreOptions,
    lifecycle: ChannelStateMachine,
    readiness: ReadinessTracker<FeatureStep>,
    props: PropertyCache,

    queue: IntrospectionQueue,
    introspect_in_flight: bool,
    connection_ready_requested: bool,
    connection_self_handle: Handle,

    group: GroupMembershipEngine,
    group_initial: InitialGroup,
    group_signals: bool,
    using_members_changed_detailed: bool,
    self_contact_tracked: bool,

    conference: ConferenceState,
    conference_signals: bool,

    next_call: u64,
    calls: BTreeMap<CallId, PendingCall>,
    /// Leaves whose removal call succeeded, waiting to see the local user go.
    pending_leaves: Vec<OpId>,
    invalidation: Option<TpError>,
    effects: Vec<Effect>,
}

impl ChannelCore {
    /// Basic channel state: main properties, group membership and conference details.
    pub const FEATURE_CORE: Feature = Feature::new("Tp::Channel", 0, true);
    /// Contacts for the handles initially invited to a conference.
    pub const FEATURE_CONFERENCE_INITIAL_INVITEE_CONTACTS: Feature =
        Feature::new("Tp::Channel", 1, true);

    pub fn new(object_path: ObjectPath, immutable_properties: PropertyMap) -> Self {
        Self::with_options(object_path, immutable_properties, CoreOptions::default())
    }

    pub fn with_options(
        object_path: ObjectPath,
        immutable_properties: PropertyMap,
        options: CoreOptions,
    ) -> Self {
        debug!(channel = %object_path, "creating channel");

        let mut readiness = ReadinessTracker::default();
        readiness.add_feature(Self::FEATURE_CORE, Introspectable::new(FeatureStep::Core));
        readiness.add_feature(
            Self::FEATURE_CONFERENCE_INITIAL_INVITEE_CONTACTS,
            Introspectable::new(FeatureStep::ConferenceInitialInvitees)
                .depends_on_feature(Self::FEATURE_CORE)
                .depends_on_interface(IFACE_CHANNEL_CONFERENCE),
        );

        Self {
            object_path,
            options,
            lifecycle: ChannelStateMachine::default(),
            readiness,
            props: PropertyCache::new(immutable_properties),
            queue: IntrospectionQueue::default(),
            introspect_in_flight: false,
            connection_ready_requested: false,
            connection_self_handle: 0,
            group: GroupMembershipEngine::default(),
            group_initial: InitialGroup::default(),
            group_signals: false,
            using_members_changed_detailed: false,
            self_contact_tracked: false,
            conference: ConferenceState::default(),
            conference_signals: false,
            next_call: 0,
            calls: BTreeMap::new(),
            pending_leaves: Vec::new(),
            invalidation: None,
            effects: Vec::new(),
        }
    }

    // ---------------------------------------------------------------------
    // Inputs
    // ---------------------------------------------------------------------

    /// The owning connection was already unusable when the channel was created.
    pub fn on_owner_invalid(&mut self) -> Vec<Effect> {
        warn!(channel = %self.object_path, "owning connection is invalid, channel will be stillborn");
        self.invalidate(invalid_owner_error());
        self.flush()
    }

    /// The owning connection went away.
    pub fn on_connection_invalidated(&mut self) -> Vec<Effect> {
        debug!(channel = %self.object_path, "owning connection died, closing orphaned channel");
        self.invalidate(orphaned_error());
        self.flush()
    }

    /// Ask for `features`; the result arrives as an [`Effect::Finish`] for `op`.
    pub fn become_ready(&mut self, op: OpId, features: &[Feature]) -> Vec<Effect> {
        self.readiness.become_ready(op, features);
        self.flush()
    }

    /// Answer to [`Effect::AwaitConnectionReady`], carrying the connection's self handle.
    pub fn on_connection_ready(&mut self, result: Result<Handle, TpError>) -> Vec<Effect> {
        if self.lifecycle.is_invalidated() {
            return self.flush();
        }
        match result {
            Err(err) => self.invalidate(err),
            Ok(self_handle) => {
                if let Err(err) = self.lifecycle.begin_introspection() {
                    warn!(channel = %self.object_path, error = %err, "connection reported ready twice");
                    return self.flush();
                }
                // The group self handle, if any, replaces this later.
                self.connection_self_handle = self_handle;
                self.group.set_self_handle(self_handle);
                self.queue.enqueue(IntrospectStep::MainProperties);
                self.continue_introspection();
            }
        }
        self.flush()
    }

    /// Answer to an [`Effect::Call`].
    pub fn on_reply(
        &mut self,
        call: CallId,
        result: Result<RemoteReply, TpError>,
    ) -> Vec<Effect> {
        let Some(pending) = self.calls.remove(&call) else {
            debug!(channel = %self.object_path, call = call.0, "reply for a call nobody waits for");
            return self.flush();
        };

        match pending {
            PendingCall::Introspect(step) => {
                self.introspect_in_flight = false;
                if self.lifecycle.is_invalidated() {
                    trace!(channel = %self.object_path, ?step, "ignoring introspection reply after invalidation");
                } else {
                    self.on_introspect_reply(step, result);
                }
            }
            PendingCall::Operation(op) => self.finish(op, result.map(|_| ())),
            PendingCall::Leave(op) => self.on_leave_removal(op, result),
            PendingCall::LeaveClose(op) => match result {
                Ok(_) => {
                    debug!(channel = %self.object_path, "left the channel by closing it");
                    self.finish(op, Ok(()));
                }
                Err(err) => {
                    warn!(channel = %self.object_path, error = %err, "closing as a fallback for leaving failed");
                    self.finish(op, Err(err));
                }
            },
        }
        self.flush()
    }

    /// Answer to an [`Effect::ResolveContacts`].
    pub fn on_contacts_resolved(
        &mut self,
        purpose: ResolvePurpose,
        result: Result<ResolvedContacts, TpError>,
    ) -> Vec<Effect> {
        if self.lifecycle.is_invalidated() {
            trace!(channel = %self.object_path, ?purpose, "ignoring contacts after invalidation");
            return self.flush();
        }

        match purpose {
            ResolvePurpose::GroupMembers => {
                let resolved = result.unwrap_or_else(|err| {
                    warn!(channel = %self.object_path, error = %err, "getting contacts failed");
                    ResolvedContacts::default()
                });
                let step = self.group.on_resolved(resolved);
                self.fill_target_id();
                self.handle_engine_step(step);
            }
            ResolvePurpose::ConferenceRemovedActor => {
                let actor = match result {
                    Ok(resolved) => resolved.contacts.into_iter().next(),
                    Err(err) => {
                        warn!(channel = %self.object_path, error = %err, "getting conference channel removed actor failed");
                        None
                    }
                };
                self.finish_conference_removal(actor);
                self.process_conference_removals();
            }
            ResolvePurpose::InitialInvitees => {
                match result {
                    Ok(resolved) => self.conference.set_invitee_contacts(resolved.contacts),
                    Err(err) => {
                        warn!(channel = %self.object_path, error = %err, "getting conference initial invitee contacts failed");
                    }
                }
                self.readiness.set_introspect_completed(
                    Self::FEATURE_CONFERENCE_INITIAL_INVITEE_CONTACTS,
                    Ok(()),
                );
            }
        }
        self.flush()
    }

    /// A signal emitted by the remote channel object.
    pub fn on_signal(&mut self, signal: ChannelSignal) -> Vec<Effect> {
        if self.lifecycle.is_invalidated() {
            trace!(channel = %self.object_path, ?signal, "ignoring signal after invalidation");
            return self.flush();
        }

        match signal {
            ChannelSignal::Closed => {
                debug!(channel = %self.object_path, "channel closed");
                let error = closed_error(self.group.self_remove_info(), self.group.self_handle());
                self.invalidate(error);
            }
            ChannelSignal::GroupFlagsChanged { added, removed } if self.group_signals => {
                self.on_group_flags_changed(added, removed);
            }
            ChannelSignal::MembersChanged {
                message,
                added,
                removed,
                local_pending,
                remote_pending,
                actor,
                reason,
            } if self.group_signals => {
                if self.using_members_changed_detailed {
                    return self.flush();
                }
                trace!(channel = %self.object_path, "synthesizing detailed change from MembersChanged");
                let details = legacy_members_changed_details(&message, actor, reason);
                self.on_members_changed(MembershipEvent::new(
                    added,
                    removed,
                    local_pending,
                    remote_pending,
                    details,
                ));
            }
            ChannelSignal::MembersChangedDetailed {
                added,
                removed,
                local_pending,
                remote_pending,
                details,
            } if self.group_signals => {
                if !self.using_members_changed_detailed {
                    return self.flush();
                }
                self.on_members_changed(MembershipEvent::new(
                    added,
                    removed,
                    local_pending,
                    remote_pending,
                    details,
                ));
            }
            ChannelSignal::HandleOwnersChanged { added, removed } if self.group_signals => {
                self.on_handle_owners_changed(added, removed);
            }
            ChannelSignal::SelfHandleChanged { self_handle } if self.group_signals => {
                self.on_self_handle_changed(self_handle);
            }
            ChannelSignal::ConferenceChannelMerged {
                channel,
                channel_specific_handle,
                properties,
            } if self.conference_signals => {
                if self.conference.merge(channel.clone(), channel_specific_handle) {
                    self.effects.push(Effect::ProxyChannel {
                        channel: channel.clone(),
                        immutable_properties: properties,
                    });
                    self.emit(ChannelEvent::ConferenceChannelMerged { channel });
                }
            }
            ChannelSignal::ConferenceChannelRemoved { channel, details }
                if self.conference_signals =>
            {
                let hints = MembershipEvent {
                    details: details.clone(),
                    ..MembershipEvent::default()
                }
                .contact_ids();
                if self.conference.enqueue_removal(channel, details) {
                    self.inject(hints);
                    self.process_conference_removals();
                }
            }
            other => {
                trace!(channel = %self.object_path, signal = ?other, "signal for an interface not introspected yet");
            }
        }
        self.flush()
    }

    // ---------------------------------------------------------------------
    // Operations
    // ---------------------------------------------------------------------

    pub fn request_close(&mut self, op: OpId) -> Vec<Effect> {
        self.start_close(op, PendingCall::Operation(op));
        self.flush()
    }

    /// Leave the group, falling back to closing the channel.
    ///
    /// After a successful removal the operation completes once the local user
    /// is seen leaving, or when the channel is invalidated.
    pub fn request_leave(&mut self, op: OpId, message: &str, reason: ChangeReason) -> Vec<Effect> {
        if self.lifecycle.is_invalidated() {
            self.finish(op, Ok(()));
            return self.flush();
        }
        if !self.lifecycle.is_ready() {
            self.finish(
                op,
                Err(TpError::not_available(
                    "Channel::FeatureCore must be ready to leave a channel",
                )),
            );
            return self.flush();
        }
        if !self.has_interface(IFACE_CHANNEL_GROUP) {
            self.start_close(op, PendingCall::Operation(op));
            return self.flush();
        }

        let self_handle = self.group.self_handle();
        if self_handle == 0 || !self.group.contains(self_handle) {
            debug!(channel = %self.object_path, "leaving a channel we are not a member of");
            self.finish(op, Ok(()));
            return self.flush();
        }

        self.call(
            PendingCall::Leave(op),
            RemoteRequest::RemoveMembersWithReason {
                handles: vec![self_handle],
                message: message.to_owned(),
                reason,
            },
        );
        self.flush()
    }

    pub fn group_add_contacts(
        &mut self,
        op: OpId,
        contacts: &[ContactPtr],
        message: &str,
    ) -> Vec<Effect> {
        if self.refuse_if_invalidated(op) {
            return self.flush();
        }
        match self.validate_group_contacts("group_add_contacts", contacts, "add") {
            Ok(handles) => {
                self.call(
                    PendingCall::Operation(op),
                    RemoteRequest::AddMembers {
                        handles,
                        message: message.to_owned(),
                    },
                );
            }
            Err(err) => self.finish(op, Err(err)),
        }
        self.flush()
    }

    pub fn group_remove_contacts(
        &mut self,
        op: OpId,
        contacts: &[ContactPtr],
        message: &str,
        reason: ChangeReason,
    ) -> Vec<Effect> {
        if self.refuse_if_invalidated(op) {
            return self.flush();
        }
        match self.validate_group_contacts("group_remove_contacts", contacts, "remove") {
            Ok(handles) => {
                self.call(
                    PendingCall::Operation(op),
                    RemoteRequest::RemoveMembersWithReason {
                        handles,
                        message: message.to_owned(),
                        reason,
                    },
                );
            }
            Err(err) => self.finish(op, Err(err)),
        }
        self.flush()
    }

    /// Add the local user to the group, for example to accept an invitation.
    pub fn group_add_self_handle(&mut self, op: OpId) -> Vec<Effect> {
        if self.refuse_if_invalidated(op) {
            return self.flush();
        }
        if !self.lifecycle.is_ready() {
            warn!(channel = %self.object_path, "group_add_self_handle used when channel not ready");
            self.finish(op, Err(TpError::invalid_argument("Channel object not ready")));
            return self.flush();
        }
        if !self.has_interface(IFACE_CHANNEL_GROUP) {
            self.finish(
                op,
                Err(TpError::not_implemented("Channel does not support group interface")),
            );
            return self.flush();
        }

        let handle = match self.group.self_handle() {
            0 => self.connection_self_handle,
            handle => handle,
        };
        self.call(
            PendingCall::Operation(op),
            RemoteRequest::AddMembers {
                handles: vec![handle],
                message: String::new(),
            },
        );
        self.flush()
    }

    pub fn conference_merge_channel(&mut self, op: OpId, channel: &ObjectPath) -> Vec<Effect> {
        if self.refuse_if_invalidated(op) {
            return self.flush();
        }
        if !self.supports_conference_merging() {
            self.finish(
                op,
                Err(TpError::not_implemented(
                    "Channel does not support MergeableConference interface",
                )),
            );
        } else {
            self.call(
                PendingCall::Operation(op),
                RemoteRequest::Merge {
                    channel: channel.clone(),
                },
            );
        }
        self.flush()
    }

    pub fn conference_split_channel(&mut self, op: OpId) -> Vec<Effect> {
        if self.refuse_if_invalidated(op) {
            return self.flush();
        }
        if !self.supports_conference_splitting() {
            self.finish(
                op,
                Err(TpError::not_implemented(
                    "Channel does not support Splittable interface",
                )),
            );
        } else {
            self.call(PendingCall::Operation(op), RemoteRequest::Split);
        }
        self.flush()
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn object_path(&self) -> &ObjectPath {
        &self.object_path
    }

    pub fn state(&self) -> ChannelLifecycleState {
        self.lifecycle.state()
    }

    pub fn is_ready(&self, feature: &Feature) -> bool {
        self.readiness.is_ready(feature)
    }

    pub fn is_valid(&self) -> bool {
        !self.lifecycle.is_invalidated()
    }

    /// Error the channel was invalidated with.
    pub fn invalidation(&self) -> Option<&TpError> {
        self.invalidation.as_ref()
    }

    pub fn interfaces(&self) -> &[String] {
        self.warn_if_not_ready("interfaces");
        &self.props.main.interfaces
    }

    pub fn has_interface(&self, interface: &str) -> bool {
        self.props.main.has_interface(interface)
    }

    pub fn channel_type(&self) -> &str {
        if self.props.main.channel_type.is_empty() {
            self.warn_if_not_ready("channel_type");
        }
        &self.props.main.channel_type
    }

    pub fn target_handle_type(&self) -> HandleType {
        self.warn_if_not_ready("target_handle_type");
        self.props.main.target_handle_type
    }

    pub fn target_handle(&self) -> Handle {
        self.warn_if_not_ready("target_handle");
        self.props.main.target_handle
    }

    pub fn target_id(&self) -> &str {
        self.warn_if_not_ready("target_id");
        &self.props.main.target_id
    }

    pub fn target_contact(&self) -> Option<&ContactPtr> {
        self.warn_if_not_ready("target_contact");
        self.group.target_contact()
    }

    pub fn is_requested(&self) -> bool {
        self.warn_if_not_ready("is_requested");
        self.props.main.requested
    }

    pub fn initiator_contact(&self) -> Option<&ContactPtr> {
        self.warn_if_not_ready("initiator_contact");
        self.group.initiator_contact()
    }

    /// Immutable properties, completed with the main properties once ready.
    pub fn immutable_properties(&self) -> PropertyMap {
        let mut immutable = self.props.immutable.clone();
        if self.lifecycle.is_ready() {
            let initiator_id = self.group.initiator_contact().map(|c| c.id());
            self.props
                .main
                .complete_immutable(&mut immutable, initiator_id);
        }
        immutable
    }

    pub fn group_flags(&self) -> GroupFlags {
        self.warn_if_not_ready("group_flags");
        self.props.group_flags
    }

    pub fn group_can_add_contacts(&self) -> bool {
        self.group_flags().contains(GroupFlags::CAN_ADD)
    }

    pub fn group_can_add_contacts_with_message(&self) -> bool {
        self.group_flags().contains(GroupFlags::MESSAGE_ADD)
    }

    pub fn group_can_accept_contacts_with_message(&self) -> bool {
        self.group_flags().contains(GroupFlags::MESSAGE_ACCEPT)
    }

    pub fn group_can_remove_contacts(&self) -> bool {
        self.group_flags().contains(GroupFlags::CAN_REMOVE)
    }

    pub fn group_can_remove_contacts_with_message(&self) -> bool {
        self.group_flags().contains(GroupFlags::MESSAGE_REMOVE)
    }

    pub fn group_can_reject_contacts_with_message(&self) -> bool {
        self.group_flags().contains(GroupFlags::MESSAGE_REJECT)
    }

    pub fn group_can_depart_with_message(&self) -> bool {
        self.group_flags().contains(GroupFlags::MESSAGE_DEPART)
    }

    pub fn group_can_rescind_contacts(&self) -> bool {
        self.group_flags().contains(GroupFlags::CAN_RESCIND)
    }

    pub fn group_can_rescind_contacts_with_message(&self) -> bool {
        self.group_flags().contains(GroupFlags::MESSAGE_RESCIND)
    }

    /// Current members, optionally without the local user.
    pub fn group_contacts(&self, include_self: bool) -> Vec<ContactPtr> {
        self.warn_if_not_ready("group_contacts");
        self.filter_self(self.group.members(), include_self)
    }

    pub fn group_local_pending_contacts(&self, include_self: bool) -> Vec<ContactPtr> {
        self.warn_if_not_ready("group_local_pending_contacts");
        self.filter_self(self.group.local_pending(), include_self)
    }

    pub fn group_remote_pending_contacts(&self, include_self: bool) -> Vec<ContactPtr> {
        self.warn_if_not_ready("group_remote_pending_contacts");
        self.filter_self(self.group.remote_pending(), include_self)
    }

    /// Details of the change that made `contact` local-pending.
    pub fn group_local_pending_contact_change_info(
        &self,
        contact: &ContactPtr,
    ) -> GroupMemberChangeDetails {
        self.warn_if_not_ready("group_local_pending_contact_change_info");
        self.group
            .local_pending_change_info(contact.handle())
            .cloned()
            .unwrap_or_default()
    }

    /// Details of the change that removed the local user, if that happened.
    pub fn group_self_contact_remove_info(&self) -> Option<&GroupMemberChangeDetails> {
        self.warn_if_not_ready("group_self_contact_remove_info");
        self.group.self_remove_info()
    }

    pub fn group_are_handle_owners_available(&self) -> bool {
        self.warn_if_not_ready("group_are_handle_owners_available");
        self.props.handle_owners_available
    }

    pub fn group_handle_owners(&self) -> &HandleOwnerMap {
        self.warn_if_not_ready("group_handle_owners");
        if !self.props.handle_owners_available {
            warn!(channel = %self.object_path, "handle owners are not available");
        }
        &self.props.handle_owners
    }

    /// Whether the self handle follows `SelfHandleChanged` (batched group properties only).
    pub fn group_is_self_contact_tracked(&self) -> bool {
        self.warn_if_not_ready("group_is_self_contact_tracked");
        self.self_contact_tracked
    }

    pub fn group_self_contact(&self) -> Option<&ContactPtr> {
        self.warn_if_not_ready("group_self_contact");
        self.group.self_contact()
    }

    pub fn group_self_handle(&self) -> Handle {
        self.group.self_handle()
    }

    pub fn group_self_handle_is_local_pending(&self) -> bool {
        if !self.lifecycle.is_ready() {
            self.warn_if_not_ready("group_self_handle_is_local_pending");
            return false;
        }
        self.group.is_local_pending(self.group.self_handle())
    }

    pub fn is_conference(&self) -> bool {
        self.has_interface(IFACE_CHANNEL_CONFERENCE)
    }

    pub fn conference_channels(&self) -> &[ObjectPath] {
        self.warn_if_not_ready("conference_channels");
        self.conference.channels()
    }

    pub fn conference_initial_channels(&self) -> &[ObjectPath] {
        self.warn_if_not_ready("conference_initial_channels");
        self.conference.initial_channels()
    }

    pub fn conference_original_channels(&self) -> &BTreeMap<Handle, ObjectPath> {
        self.warn_if_not_ready("conference_original_channels");
        self.conference.original_channels()
    }

    pub fn conference_initial_invitee_contacts(&self) -> &[ContactPtr] {
        if !self.is_ready(&Self::FEATURE_CONFERENCE_INITIAL_INVITEE_CONTACTS)
            && self.options.warn_not_ready
        {
            warn!(channel = %self.object_path, "conference_initial_invitee_contacts used with the invitee feature not ready");
        }
        self.conference.invitee_contacts()
    }

    pub fn conference_invitation_message(&self) -> &str {
        self.warn_if_not_ready("conference_invitation_message");
        self.conference.invitation_message()
    }

    pub fn supports_conference_merging(&self) -> bool {
        self.has_interface(IFACE_CHANNEL_MERGEABLE_CONFERENCE)
    }

    pub fn supports_conference_splitting(&self) -> bool {
        self.has_interface(IFACE_CHANNEL_SPLITTABLE)
    }

    /// Serializable view of everything cached so far.
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            object_path: self.object_path.clone(),
            state: self.lifecycle.state(),
            channel_type: self.props.main.channel_type.clone(),
            interfaces: self.props.main.interfaces.clone(),
            target_handle_type: self.props.main.target_handle_type,
            target_handle: self.props.main.target_handle,
            target_id: self.props.main.target_id.clone(),
            requested: self.props.main.requested,
            initiator_handle: self.props.main.initiator_handle,
            group_flags: self.props.group_flags,
            self_handle: self.group.self_handle(),
            members: self.group.members().map(|c| (**c).clone()).collect(),
            local_pending: self.group.local_pending().map(|c| (**c).clone()).collect(),
            remote_pending: self.group.remote_pending().map(|c| (**c).clone()).collect(),
            handle_owners: self.props.handle_owners.clone(),
            conference_channels: self.conference.channels().to_vec(),
            invalidation: self.invalidation.clone(),
        }
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    fn continue_introspection(&mut self) {
        if self.lifecycle.is_invalidated() || self.introspect_in_flight {
            return;
        }
        match self.queue.dequeue() {
            Some(step) => self.run_step(step),
            None => self.try_finalize_readiness(),
        }
    }

    /// Mark the core feature ready once nothing can change the visible state anymore.
    fn try_finalize_readiness(&mut self) {
        if self.lifecycle.state() != ChannelLifecycleState::Introspecting {
            return;
        }
        if !self.queue.is_empty() || self.introspect_in_flight {
            trace!(channel = %self.object_path, "introspection still running");
            return;
        }
        if !self.group.is_idle() {
            debug!(channel = %self.object_path, "introspection done before contacts, contacts will set ready");
            return;
        }

        let main = &self.props.main;
        if main.initiator_handle != 0 && self.group.initiator_contact().is_none() {
            warn!(channel = %self.object_path, handle = main.initiator_handle, "unable to create contact for initiator");
        }
        if main.contact_target() != 0 && self.group.target_contact().is_none() {
            warn!(channel = %self.object_path, handle = main.target_handle, "unable to create contact for target");
        }
        if self.group.have_members()
            && self.group.self_handle() != 0
            && self.group.self_contact().is_none()
        {
            warn!(channel = %self.object_path, handle = self.group.self_handle(), "unable to create contact for self handle");
        }

        if let Err(err) = self.lifecycle.on_ready() {
            warn!(channel = %self.object_path, error = %err, "could not mark channel ready");
            return;
        }
        self.group.set_channel_ready(true);

        debug!(
            channel = %self.object_path,
            channel_type = %main.channel_type,
            target_handle = main.target_handle,
            target_handle_type = ?main.target_handle_type,
            "channel fully ready"
        );
        if self.has_interface(IFACE_CHANNEL_GROUP) {
            debug!(
                channel = %self.object_path,
                flags = self.props.group_flags.bits(),
                handle_owners = ?self.props.handle_owners_available.then_some(self.props.handle_owners.len()),
                members = self.group.members().count(),
                local_pending = self.group.local_pending().count(),
                remote_pending = self.group.remote_pending().count(),
                self_handle = self.group.self_handle(),
                self_tracked = self.self_contact_tracked,
                "group state at ready"
            );
        }

        self.readiness
            .set_introspect_completed(Self::FEATURE_CORE, Ok(()));
    }

    fn run_step(&mut self, step: IntrospectStep) {
        match step {
            IntrospectStep::MainProperties => {
                let hints = self.props.main.seed_from_immutable(&self.props.immutable);
                self.inject(hints);
                match immutable_main_properties(&self.props.immutable) {
                    Some(props) => {
                        debug!(channel = %self.object_path, "using immutable main properties");
                        self.extract_main_props(props);
                        self.continue_introspection();
                    }
                    None => {
                        debug!(channel = %self.object_path, "calling Properties::GetAll(Channel)");
                        self.introspect_call(step, RemoteRequest::GetAll {
                            interface: IFACE_CHANNEL.to_owned(),
                        });
                    }
                }
            }
            IntrospectStep::FallbackChannelType => {
                self.introspect_call(step, RemoteRequest::GetChannelType);
            }
            IntrospectStep::FallbackHandle => {
                self.introspect_call(step, RemoteRequest::GetHandle);
            }
            IntrospectStep::FallbackInterfaces => {
                self.introspect_call(step, RemoteRequest::GetInterfaces);
            }
            IntrospectStep::Group => {
                debug!(channel = %self.object_path, "introspecting Channel.Interface.Group");
                self.group_signals = true;
                self.introspect_call(step, RemoteRequest::GetAll {
                    interface: IFACE_CHANNEL_GROUP.to_owned(),
                });
            }
            IntrospectStep::GroupFallbackFlags => {
                self.introspect_call(step, RemoteRequest::GetGroupFlags);
            }
            IntrospectStep::GroupFallbackMembers => {
                self.introspect_call(step, RemoteRequest::GetAllMembers);
            }
            IntrospectStep::GroupFallbackLocalPendingWithInfo => {
                self.introspect_call(step, RemoteRequest::GetLocalPendingMembersWithInfo);
            }
            IntrospectStep::GroupFallbackSelfHandle => {
                self.introspect_call(step, RemoteRequest::GetSelfHandle);
            }
            IntrospectStep::Conference => {
                debug!(channel = %self.object_path, "introspecting Channel.Interface.Conference");
                self.conference_signals = true;
                self.introspect_call(step, RemoteRequest::GetAll {
                    interface: IFACE_CHANNEL_CONFERENCE.to_owned(),
                });
            }
        }
    }

    fn on_introspect_reply(&mut self, step: IntrospectStep, result: Result<RemoteReply, TpError>) {
        if step.is_mandatory() {
            match self.apply_mandatory_reply(step, result) {
                Ok(()) => self.continue_introspection(),
                Err(err) => {
                    warn!(channel = %self.object_path, ?step, error = %err, "mandatory introspection call failed, channel officially dead");
                    self.invalidate(err);
                }
            }
            return;
        }

        match step {
            IntrospectStep::MainProperties => {
                let props = self.optional_properties("Properties::GetAll(Channel)", result);
                self.extract_main_props(props);
            }
            IntrospectStep::Group => {
                let props =
                    self.optional_properties("Properties::GetAll(Channel.Interface.Group)", result);
                self.extract_group_props(props);
            }
            IntrospectStep::GroupFallbackFlags => match result {
                Ok(RemoteReply::GroupFlags(flags)) => {
                    self.set_group_flags(flags);
                    if self.props.group_flags.contains(GroupFlags::PROPERTIES) {
                        warn!(channel = %self.object_path, "GetGroupFlags included the Properties flag although the properties did not work, unsetting");
                        self.props.group_flags = self.props.group_flags & !GroupFlags::PROPERTIES;
                    }
                }
                other => self.log_optional_failure("GetGroupFlags", other),
            },
            IntrospectStep::GroupFallbackMembers => match result {
                Ok(RemoteReply::AllMembers {
                    members,
                    local_pending,
                    remote_pending,
                }) => {
                    self.group_initial.members = members;
                    self.group_initial.remote_pending = remote_pending;
                    self.group_initial.local_pending = local_pending
                        .into_iter()
                        .map(|handle| LocalPendingInfo {
                            to_be_added: handle,
                            actor: 0,
                            reason: ChangeReason::None,
                            message: String::new(),
                        })
                        .collect();
                }
                other => self.log_optional_failure("GetAllMembers", other),
            },
            IntrospectStep::GroupFallbackLocalPendingWithInfo => match result {
                Ok(RemoteReply::LocalPendingMembersWithInfo(infos)) => {
                    self.group_initial.local_pending = infos;
                }
                other => {
                    self.log_optional_failure("GetLocalPendingMembersWithInfo", other);
                    debug!(channel = %self.object_path, "falling back to local pending members without extended info");
                }
            },
            IntrospectStep::GroupFallbackSelfHandle => {
                match result {
                    // Never overwrite the connection's self handle with 0.
                    Ok(RemoteReply::SelfHandle(handle)) if handle != 0 => {
                        self.group.set_self_handle(handle);
                    }
                    Ok(RemoteReply::SelfHandle(_)) => {}
                    other => self.log_optional_failure("GetSelfHandle", other),
                }
                self.now_have_initial_members();
            }
            IntrospectStep::Conference => {
                let props = self.optional_properties(
                    "Properties::GetAll(Channel.Interface.Conference)",
                    result,
                );
                if !props.is_empty() {
                    self.extract_conference_props(&props);
                }
            }
            IntrospectStep::FallbackChannelType
            | IntrospectStep::FallbackHandle
            | IntrospectStep::FallbackInterfaces => {}
        }
        self.continue_introspection();
    }

    fn apply_mandatory_reply(
        &mut self,
        step: IntrospectStep,
        result: Result<RemoteReply, TpError>,
    ) -> Result<(), TpError> {
        match (step, result?) {
            (IntrospectStep::FallbackChannelType, RemoteReply::ChannelType(channel_type)) => {
                debug!(channel = %self.object_path, "got reply to fallback GetChannelType");
                self.props.main.channel_type = channel_type;
            }
            (IntrospectStep::FallbackHandle, RemoteReply::Handle { handle_type, handle }) => {
                debug!(channel = %self.object_path, "got reply to fallback GetHandle");
                self.props.main.target_handle_type = handle_type;
                self.props.main.target_handle = handle;
            }
            (IntrospectStep::FallbackInterfaces, RemoteReply::Interfaces(interfaces)) => {
                debug!(channel = %self.object_path, "got reply to fallback GetInterfaces");
                self.props.main.interfaces = interfaces;
                self.main_properties_known();
            }
            (step, reply) => {
                let request = match step {
                    IntrospectStep::FallbackChannelType => "GetChannelType",
                    IntrospectStep::FallbackHandle => "GetHandle",
                    _ => "GetInterfaces",
                };
                return Err(unexpected_reply(request, &reply));
            }
        }
        Ok(())
    }

    fn optional_properties(
        &self,
        call: &str,
        result: Result<RemoteReply, TpError>,
    ) -> PropertyMap {
        match result {
            Ok(RemoteReply::Properties(props)) => {
                debug!(channel = %self.object_path, call, "got properties");
                props
            }
            Ok(other) => {
                let err = unexpected_reply(call, &other);
                warn!(channel = %self.object_path, error = %err, "ignoring malformed reply");
                PropertyMap::new()
            }
            Err(err) => {
                warn!(channel = %self.object_path, call, error = %err, "optional introspection call failed");
                PropertyMap::new()
            }
        }
    }

    fn log_optional_failure(&self, call: &str, result: Result<RemoteReply, TpError>) {
        match result {
            Ok(other) => {
                let err = unexpected_reply(call, &other);
                warn!(channel = %self.object_path, error = %err, "ignoring malformed reply");
            }
            Err(err) => {
                warn!(channel = %self.object_path, call, error = %err, "optional introspection call failed");
            }
        }
    }

    fn extract_main_props(&mut self, props: PropertyMap) {
        if !has_mandatory_channel_properties(&props) {
            warn!(channel = %self.object_path, "batched channel properties not found, falling back to legacy calls");
            self.queue.enqueue_all(IntrospectStep::MAIN_FALLBACK);
            return;
        }
        let hints = self.props.main.apply_main(&props);
        self.inject(hints);
        self.main_properties_known();
    }

    /// Shared tail of the batched and the legacy main property paths.
    fn main_properties_known(&mut self) {
        let interfaces = self.props.main.interfaces.clone();
        debug!(channel = %self.object_path, ?interfaces, "channel has optional interfaces");
        self.readiness.set_interfaces(interfaces);
        self.group.set_related_handles(
            self.props.main.initiator_handle,
            self.props.main.contact_target(),
        );

        // Queue follow-up steps before any membership work can drain and finalize.
        if self.has_interface(IFACE_CHANNEL_GROUP) {
            self.queue.enqueue(IntrospectStep::Group);
        }
        if self.has_interface(IFACE_CHANNEL_CONFERENCE) {
            self.queue.enqueue(IntrospectStep::Conference);
        }

        if !self.fake_group_if_needed()
            && !self.has_interface(IFACE_CHANNEL_GROUP)
            && self.props.main.initiator_handle != 0
        {
            // Nobody else resolves the initiator of a channel without a group.
            self.group.request_resolution_pass();
            self.process_members();
        }
        debug!(channel = %self.object_path, has_initiator = self.props.main.initiator_handle != 0, "main properties known");
    }

    /// Returns `true` when the channel is one-to-one without a Group interface.
    fn fake_group_if_needed(&mut self) -> bool {
        if !self.options.fake_group
            || self.has_interface(IFACE_CHANNEL_GROUP)
            || self.props.main.target_handle_type != HandleType::Contact
        {
            return false;
        }

        let self_handle = self.connection_self_handle;
        let target = self.props.main.target_handle;
        if self_handle != 0 && target != 0 {
            debug!(channel = %self.object_path, self_handle, target, "faking a group");
            self.group.set_self_handle(self_handle);
            self.group_initial.members = vec![self_handle, target];
            self.now_have_initial_members();
        } else {
            warn!(channel = %self.object_path, "connection self handle or target handle is 0, not faking a group");
        }
        true
    }

    fn extract_group_props(&mut self, props: PropertyMap) {
        let Some(group) = extract_group_properties(&props) else {
            warn!(channel = %self.object_path, "batched group properties not found, handle owners and self handle tracking disabled");
            self.queue.enqueue_all(IntrospectStep::GROUP_FALLBACK);
            return;
        };

        debug!(channel = %self.object_path, "found batched group properties");
        self.props.handle_owners_available = true;
        self.self_contact_tracked = true;
        self.set_group_flags(group.flags);
        self.props.handle_owners = group.handle_owners;
        self.group_initial = InitialGroup {
            members: group.members,
            local_pending: group.local_pending,
            remote_pending: group.remote_pending,
        };
        if group.self_handle != 0 {
            self.group.set_self_handle(group.self_handle);
        }
        self.now_have_initial_members();
    }

    fn now_have_initial_members(&mut self) {
        let initial = std::mem::take(&mut self.group_initial);
        self.group
            .seed_initial(initial.members, initial.local_pending, initial.remote_pending);
        self.process_members();
    }

    fn extract_conference_props(&mut self, props: &PropertyMap) {
        let conference = ConferenceProperties::from_map(props);
        self.inject(conference.invitee_hints());
        for channel in self.conference.apply_properties(conference) {
            self.effects.push(Effect::ProxyChannel {
                channel,
                immutable_properties: PropertyMap::new(),
            });
        }
    }

    /// Start a feature handed out by the readiness tracker.
    ///
    /// Returns `true` if the feature completed without any remote work.
    fn start_feature(&mut self, step: FeatureStep) -> bool {
        match step {
            FeatureStep::Core => {
                if !self.connection_ready_requested {
                    self.connection_ready_requested = true;
                    debug!(channel = %self.object_path, "waiting for the owning connection");
                    self.effects.push(Effect::AwaitConnectionReady);
                }
                false
            }
            FeatureStep::ConferenceInitialInvitees => {
                let handles = self.conference.invitee_handles().to_vec();
                if handles.is_empty() {
                    self.readiness.set_introspect_completed(
                        Self::FEATURE_CONFERENCE_INITIAL_INVITEE_CONTACTS,
                        Ok(()),
                    );
                    return true;
                }
                self.effects.push(Effect::ResolveContacts {
                    purpose: ResolvePurpose::InitialInvitees,
                    handles,
                });
                false
            }
        }
    }

    // ---------------------------------------------------------------------
    // Group signals
    // ---------------------------------------------------------------------

    fn set_group_flags(&mut self, flags: GroupFlags) -> bool {
        if self.props.group_flags == flags {
            return false;
        }
        self.props.group_flags = flags;

        if !self.has_interface(IFACE_CHANNEL_GROUP) {
            return false;
        }

        let detailed = flags.contains(GroupFlags::MEMBERS_CHANGED_DETAILED);
        if detailed && !self.using_members_changed_detailed {
            debug!(channel = %self.object_path, "listening exclusively to MembersChangedDetailed");
            self.using_members_changed_detailed = true;
        } else if !detailed && self.using_members_changed_detailed {
            warn!(channel = %self.object_path, "service removed MembersChangedDetailed from the group flags, going back to MembersChanged");
            self.using_members_changed_detailed = false;
        }
        true
    }

    fn on_group_flags_changed(&mut self, added: GroupFlags, removed: GroupFlags) {
        let current = self.props.group_flags;
        let added = added & !current;
        let removed = removed & current;
        let flags = (current | added) & !removed;
        trace!(channel = %self.object_path, added = added.bits(), removed = removed.bits(), "group flags changed");

        if !self.set_group_flags(flags) || !self.lifecycle.is_ready() {
            return;
        }
        self.emit(ChannelEvent::GroupFlagsChanged {
            flags,
            added,
            removed,
        });
        let toggled = added | removed;
        if toggled.contains(GroupFlags::CAN_ADD) {
            self.emit(ChannelEvent::GroupCanAddContactsChanged(
                flags.contains(GroupFlags::CAN_ADD),
            ));
        }
        if toggled.contains(GroupFlags::CAN_REMOVE) {
            self.emit(ChannelEvent::GroupCanRemoveContactsChanged(
                flags.contains(GroupFlags::CAN_REMOVE),
            ));
        }
        if toggled.contains(GroupFlags::CAN_RESCIND) {
            self.emit(ChannelEvent::GroupCanRescindContactsChanged(
                flags.contains(GroupFlags::CAN_RESCIND),
            ));
        }
    }

    fn on_members_changed(&mut self, event: MembershipEvent) {
        let hints = event.contact_ids();
        match self.group.admit(event) {
            Admission::Queued => {
                self.inject(hints);
                // A resolution in flight picks the event up when it finishes.
                if !self.group.is_building() {
                    self.process_members();
                }
            }
            Admission::SelfRenamed(handle) => self.on_self_handle_changed(handle),
            Admission::AwaitingInitialMembers | Admission::Empty | Admission::MalformedRename => {}
        }
    }

    fn on_handle_owners_changed(&mut self, added: HandleOwnerMap, removed: Vec<Handle>) {
        if !self.props.handle_owners_available {
            debug!(channel = %self.object_path, "still waiting for initial handle owners, ignoring delta");
            return;
        }

        let mut emit_added = Vec::new();
        for (handle, owner) in added {
            if self.props.handle_owners.insert(handle, owner) != Some(owner) {
                emit_added.push(handle);
            }
        }
        let mut emit_removed = Vec::new();
        for handle in removed {
            if self.props.handle_owners.remove(&handle).is_some() {
                emit_removed.push(handle);
            }
        }

        if (!emit_added.is_empty() || !emit_removed.is_empty()) && self.lifecycle.is_ready() {
            self.emit(ChannelEvent::GroupHandleOwnersChanged {
                owners: self.props.handle_owners.clone(),
                added: emit_added,
                removed: emit_removed,
            });
        }
    }

    fn on_self_handle_changed(&mut self, handle: Handle) {
        if self.group.set_self_handle(handle)
            && self.group.have_members()
            && !self.group.is_building()
        {
            self.process_members();
        }
    }

    fn process_members(&mut self) {
        let step = self.group.process_next();
        self.handle_engine_step(step);
    }

    fn handle_engine_step(&mut self, step: EngineStep) {
        match step {
            EngineStep::Resolve(handles) => self.effects.push(Effect::ResolveContacts {
                purpose: ResolvePurpose::GroupMembers,
                handles,
            }),
            EngineStep::Busy => {}
            EngineStep::Drained => self.try_finalize_readiness(),
        }
    }

    fn fill_target_id(&mut self) {
        if self.props.main.target_id.is_empty()
            && let Some(target) = self.group.target_contact()
        {
            self.props.main.target_id = target.id().to_owned();
        }
    }

    // ---------------------------------------------------------------------
    // Conference
    // ---------------------------------------------------------------------

    fn process_conference_removals(&mut self) {
        while let Some(step) = self.conference.next_removal() {
            match step {
                RemovalStep::ResolveActor(actor) => {
                    self.effects.push(Effect::ResolveContacts {
                        purpose: ResolvePurpose::ConferenceRemovedActor,
                        handles: vec![actor],
                    });
                    return;
                }
                RemovalStep::Announce => self.finish_conference_removal(None),
            }
        }
    }

    fn finish_conference_removal(&mut self, actor: Option<ContactPtr>) {
        if let Some((channel, details)) = self.conference.finish_removal(actor) {
            self.emit(ChannelEvent::ConferenceChannelRemoved { channel, details });
        }
    }

    // ---------------------------------------------------------------------
    // Operations plumbing
    // ---------------------------------------------------------------------

    /// Fail `op` with the stored invalidation error, if there is one.
    fn refuse_if_invalidated(&mut self, op: OpId) -> bool {
        let Some(error) = self.invalidation.clone() else {
            return false;
        };
        debug!(channel = %self.object_path, op = op.0, "operation requested on an invalidated channel");
        self.finish(op, Err(error));
        true
    }

    fn start_close(&mut self, op: OpId, pending: PendingCall) {
        if self.lifecycle.is_invalidated() {
            self.finish(op, Ok(()));
            return;
        }
        self.call(pending, RemoteRequest::Close);
    }

    /// The local user may have been renamed since the leave started, so the
    /// current self handle is what has to disappear.
    fn on_leave_removal(&mut self, op: OpId, result: Result<RemoteReply, TpError>) {
        match result {
            Ok(_) => {
                debug!(channel = %self.object_path, "left the channel");
                let self_handle = self.group.self_handle();
                if self_handle != 0 && self.group.contains(self_handle) {
                    debug!(channel = %self.object_path, "waiting for self removal to be picked up");
                    self.pending_leaves.push(op);
                } else {
                    self.finish(op, Ok(()));
                }
            }
            Err(err) => {
                debug!(channel = %self.object_path, error = %err, "RemoveMembersWithReason failed, falling back to Close");
                self.start_close(op, PendingCall::LeaveClose(op));
            }
        }
    }

    fn validate_group_contacts(
        &self,
        operation: &str,
        contacts: &[ContactPtr],
        verb: &str,
    ) -> Result<Vec<Handle>, TpError> {
        if !self.lifecycle.is_ready() {
            warn!(channel = %self.object_path, operation, "used when channel not ready");
            return Err(TpError::not_available("Channel not ready"));
        }
        if contacts.is_empty() {
            warn!(channel = %self.object_path, operation, "used with an empty contact list");
            return Err(TpError::invalid_argument(if verb == "add" {
                "contacts cannot be an empty list"
            } else {
                "contacts param cannot be an empty list"
            }));
        }
        if contacts.iter().any(|c| c.handle() == 0) {
            warn!(channel = %self.object_path, operation, "contact list contains an invalid contact");
            return Err(TpError::invalid_argument(format!(
                "Unable to {verb} invalid contacts"
            )));
        }
        if !self.has_interface(IFACE_CHANNEL_GROUP) {
            warn!(channel = %self.object_path, operation, "used with no group interface");
            return Err(TpError::not_implemented(
                "Channel does not support group interface",
            ));
        }
        Ok(contacts.iter().map(|c| c.handle()).collect())
    }

    fn introspect_call(&mut self, step: IntrospectStep, request: RemoteRequest) {
        self.introspect_in_flight = true;
        self.call(PendingCall::Introspect(step), request);
    }

    fn call(&mut self, pending: PendingCall, request: RemoteRequest) -> CallId {
        self.next_call += 1;
        let call = CallId(self.next_call);
        trace!(channel = %self.object_path, call = call.0, method = request.method_name(), "calling remote method");
        self.calls.insert(call, pending);
        self.effects.push(Effect::Call { call, request });
        call
    }

    fn finish(&mut self, op: OpId, result: Result<(), TpError>) {
        self.effects.push(Effect::Finish { op, result });
    }

    fn emit(&mut self, event: ChannelEvent) {
        self.effects.push(Effect::Emit(event));
    }

    fn inject(&mut self, hints: HandleIdentifierMap) {
        if !hints.is_empty() {
            self.effects.push(Effect::InjectContactIds(hints));
        }
    }

    /// Single path into the terminal state.
    fn invalidate(&mut self, error: TpError) {
        if !self.lifecycle.on_invalidated() {
            return;
        }
        debug!(channel = %self.object_path, error = %error, "channel invalidated");

        self.invalidation = Some(error.clone());
        self.queue.clear();
        self.introspect_in_flight = false;
        self.group.set_channel_ready(false);
        self.group.take_events();

        self.readiness.invalidate(error.clone());
        for (op, result) in self.readiness.take_finished() {
            self.finish(op, result);
        }

        // Invalidation confirms having left; introspection replies become no-ops.
        let mut left = Vec::new();
        self.calls.retain(|_, pending| match pending {
            PendingCall::Operation(_) => true,
            PendingCall::Leave(op) | PendingCall::LeaveClose(op) => {
                left.push(*op);
                false
            }
            PendingCall::Introspect(_) => false,
        });
        left.append(&mut self.pending_leaves);
        for op in left {
            debug!(channel = %self.object_path, op = op.0, "finishing leave as the channel was invalidated");
            self.finish(op, Ok(()));
        }

        self.emit(ChannelEvent::Invalidated { error });
    }

    fn flush(&mut self) -> Vec<Effect> {
        self.drain_group_events();
        self.pump_readiness();
        std::mem::take(&mut self.effects)
    }

    fn drain_group_events(&mut self) {
        for event in self.group.take_events() {
            if let ChannelEvent::GroupMembersChanged { removed, .. } = &event {
                let self_handle = self.group.self_handle();
                let done = if removed.iter().any(|c| c.handle() == self_handle) {
                    std::mem::take(&mut self.pending_leaves)
                } else {
                    Vec::new()
                };
                self.emit(event);
                for op in done {
                    debug!(channel = %self.object_path, op = op.0, "leave event picked up");
                    self.finish(op, Ok(()));
                }
            } else {
                self.emit(event);
            }
        }
    }

    fn pump_readiness(&mut self) {
        loop {
            let mut completed_inline = false;
            for step in self.readiness.iterate() {
                completed_inline |= self.start_feature(step);
            }
            for (op, result) in self.readiness.take_finished() {
                self.finish(op, result);
            }
            if !completed_inline {
                return;
            }
        }
    }

    fn warn_if_not_ready(&self, accessor: &str) {
        if self.options.warn_not_ready && !self.lifecycle.is_ready() {
            warn!(channel = %self.object_path, accessor, "accessor used before the channel is ready");
        }
    }

    fn filter_self<'a>(
        &self,
        contacts: impl Iterator<Item = &'a ContactPtr>,
        include_self: bool,
    ) -> Vec<ContactPtr> {
        let self_handle = self.group.self_handle();
        contacts
            .filter(|c| include_self || self_handle == 0 || c.handle() != self_handle)
            .cloned()
            .collect()
    }
}
