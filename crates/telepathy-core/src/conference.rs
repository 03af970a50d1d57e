use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use crate::{
    properties::ConferenceProperties,
    types::{ContactPtr, GroupMemberChangeDetails, Handle, ObjectPath, PropertyMap},
};

#[derive(Debug, Clone)]
struct PendingRemoval {
    channel: ObjectPath,
    details: PropertyMap,
}

/// What must happen before the removal at the head of the queue can be announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalStep {
    /// Resolve this actor handle first.
    ResolveActor(Handle),
    /// No actor; finish right away.
    Announce,
}

/// Sub-channels of a conference channel.
///
/// Removals are queued and announced one at a time, after their actor has
/// been resolved, mirroring the group membership queue.
#[derive(Debug, Clone, Default)]
pub struct ConferenceState {
    channels: Vec<ObjectPath>,
    initial_channels: Vec<ObjectPath>,
    original_channels: BTreeMap<Handle, ObjectPath>,
    invitee_handles: Vec<Handle>,
    invitee_contacts: Vec<ContactPtr>,
    invitation_message: String,
    removals: VecDeque<PendingRemoval>,
    resolving_removal: bool,
}

impl ConferenceState {
    /// Store `GetAll(Conference)` results; returns paths that are new to this conference.
    pub fn apply_properties(&mut self, props: ConferenceProperties) -> Vec<ObjectPath> {
        let mut discovered = Vec::new();
        for channel in props.channels {
            if !self.channels.contains(&channel) {
                discovered.push(channel.clone());
                self.channels.push(channel);
            }
        }
        for channel in props.initial_channels {
            if !self.initial_channels.contains(&channel) {
                if !discovered.contains(&channel) {
                    discovered.push(channel.clone());
                }
                self.initial_channels.push(channel);
            }
        }
        for (handle, channel) in props.original_channels {
            if !discovered.contains(&channel) && !self.channels.contains(&channel) {
                discovered.push(channel.clone());
            }
            self.original_channels.insert(handle, channel);
        }
        self.invitee_handles = props.initial_invitee_handles;
        self.invitation_message = props.invitation_message;
        discovered
    }

    /// A channel was merged in; returns `false` if it was already part of the conference.
    pub fn merge(&mut self, channel: ObjectPath, channel_specific_handle: Handle) -> bool {
        if self.channels.contains(&channel) {
            return false;
        }
        if channel_specific_handle != 0 {
            self.original_channels
                .insert(channel_specific_handle, channel.clone());
        }
        self.channels.push(channel);
        true
    }

    /// Queue a removal; returns `false` for channels that are not part of the conference.
    pub fn enqueue_removal(&mut self, channel: ObjectPath, details: PropertyMap) -> bool {
        if !self.channels.contains(&channel) {
            return false;
        }
        self.removals.push_back(PendingRemoval { channel, details });
        true
    }

    /// Start on the removal at the head of the queue, if none is being resolved.
    pub fn next_removal(&mut self) -> Option<RemovalStep> {
        if self.resolving_removal {
            return None;
        }
        while let Some(head) = self.removals.front() {
            if self.channels.contains(&head.channel) {
                let actor = GroupMemberChangeDetails::new(None, head.details.clone()).actor_handle();
                self.resolving_removal = true;
                return Some(if actor != 0 {
                    RemovalStep::ResolveActor(actor)
                } else {
                    RemovalStep::Announce
                });
            }
            debug!(channel = %head.channel, "dropping removal of a channel that already left");
            self.removals.pop_front();
        }
        None
    }

    /// Commit the removal started by [`next_removal`](Self::next_removal).
    pub fn finish_removal(
        &mut self,
        actor: Option<ContactPtr>,
    ) -> Option<(ObjectPath, GroupMemberChangeDetails)> {
        if !self.resolving_removal {
            return None;
        }
        self.resolving_removal = false;
        let removal = self.removals.pop_front()?;

        self.channels.retain(|c| *c != removal.channel);
        self.original_channels.retain(|_, c| *c != removal.channel);
        Some((
            removal.channel,
            GroupMemberChangeDetails::new(actor, removal.details),
        ))
    }

    pub fn is_resolving_removal(&self) -> bool {
        self.resolving_removal
    }

    pub fn set_invitee_contacts(&mut self, contacts: Vec<ContactPtr>) {
        self.invitee_contacts = contacts;
    }

    pub fn channels(&self) -> &[ObjectPath] {
        &self.channels
    }

    pub fn initial_channels(&self) -> &[ObjectPath] {
        &self.initial_channels
    }

    pub fn original_channels(&self) -> &BTreeMap<Handle, ObjectPath> {
        &self.original_channels
    }

    pub fn invitee_handles(&self) -> &[Handle] {
        &self.invitee_handles
    }

    pub fn invitee_contacts(&self) -> &[ContactPtr] {
        &self.invitee_contacts
    }

    pub fn invitation_message(&self) -> &str {
        &self.invitation_message
    }
}
