//! Group membership engine.
//!
//! Membership deltas are queued and applied one at a time. An event is only
//! committed to the visible sets once every handle it references has gone
//! through the contact resolver, so listeners never observe a handle that has
//! no contact yet, and resolution latency can never reorder two events.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::Arc,
};

use tracing::{debug, trace, warn};

use crate::{
    constants::details_keys,
    normalization::local_pending_details,
    types::{
        ChangeReason, ChannelEvent, ContactPtr, GroupMemberChangeDetails, Handle,
        HandleIdentifierMap, LocalPendingInfo, PropertyMap, ResolvedContacts, Variant,
    },
};

/// One raw membership delta, as received or synthesized from the initial snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipEvent {
    pub added: Vec<Handle>,
    pub removed: Vec<Handle>,
    pub local_pending: Vec<Handle>,
    pub remote_pending: Vec<Handle>,
    pub details: PropertyMap,
}

impl MembershipEvent {
    pub fn new(
        added: Vec<Handle>,
        removed: Vec<Handle>,
        local_pending: Vec<Handle>,
        remote_pending: Vec<Handle>,
        details: PropertyMap,
    ) -> Self {
        Self {
            added,
            removed,
            local_pending,
            remote_pending,
            details,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.local_pending.is_empty()
            && self.remote_pending.is_empty()
    }

    pub fn actor(&self) -> Handle {
        self.details
            .get(details_keys::ACTOR)
            .and_then(Variant::as_u32)
            .unwrap_or(0)
    }

    pub fn reason(&self) -> ChangeReason {
        self.details
            .get(details_keys::CHANGE_REASON)
            .and_then(Variant::as_u32)
            .map(ChangeReason::from_raw)
            .unwrap_or_default()
    }

    /// The `contact-ids` hints carried in the details, if any.
    pub fn contact_ids(&self) -> HandleIdentifierMap {
        self.details
            .get(details_keys::CONTACT_IDS)
            .and_then(Variant::as_handle_identifiers)
            .cloned()
            .unwrap_or_default()
    }

    fn gained_count(&self) -> usize {
        self.added.len() + self.local_pending.len() + self.remote_pending.len()
    }
}

/// What happened to an event handed to [`GroupMembershipEngine::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// Initial membership is not known yet; deltas before it are meaningless.
    AwaitingInitialMembers,
    /// All four lists were empty.
    Empty,
    /// The local user was renumbered; route the new handle through the self-handle path.
    SelfRenamed(Handle),
    /// A `Renamed` event for the local user that was not exactly one-for-one.
    MalformedRename,
}

/// Next action required by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStep {
    /// Resolve these handles and hand the result to [`GroupMembershipEngine::on_resolved`].
    Resolve(Vec<Handle>),
    /// A resolution is already in flight.
    Busy,
    /// Nothing is queued.
    Drained,
}

#[derive(Debug, Clone, Default)]
pub struct GroupMembershipEngine {
    members: BTreeMap<Handle, ContactPtr>,
    local_pending: BTreeMap<Handle, ContactPtr>,
    remote_pending: BTreeMap<Handle, ContactPtr>,
    local_pending_info: BTreeMap<Handle, GroupMemberChangeDetails>,

    self_handle: Handle,
    self_contact: Option<ContactPtr>,
    self_remove_info: Option<GroupMemberChangeDetails>,
    initiator_handle: Handle,
    initiator_contact: Option<ContactPtr>,
    target_handle: Handle,
    target_contact: Option<ContactPtr>,

    have_members: bool,
    queue: VecDeque<MembershipEvent>,
    current: Option<MembershipEvent>,
    pending_members: BTreeSet<Handle>,
    pending_local_pending: BTreeSet<Handle>,
    pending_remote_pending: BTreeSet<Handle>,
    retrieve_self: bool,
    renamed_from: Option<Handle>,
    building: bool,

    channel_ready: bool,
    outbox: Vec<ChannelEvent>,
}

impl GroupMembershipEngine {
    /// Handles resolved alongside every event until their contacts are known.
    ///
    /// `target` is the contact target, or 0 for non-contact channels.
    pub fn set_related_handles(&mut self, initiator: Handle, target: Handle) {
        self.initiator_handle = initiator;
        self.target_handle = target;
    }

    /// Set once the channel is ready; notifications are suppressed before that.
    pub fn set_channel_ready(&mut self, ready: bool) {
        self.channel_ready = ready;
    }

    pub fn have_members(&self) -> bool {
        self.have_members
    }

    /// No event queued and no resolution in flight.
    pub fn is_idle(&self) -> bool {
        !self.building && self.current.is_none() && self.queue.is_empty()
    }

    pub fn is_building(&self) -> bool {
        self.building
    }

    pub fn queued_events(&self) -> usize {
        self.queue.len()
    }

    /// Seed the engine with the initial membership.
    ///
    /// Current and remote-pending members arrive as one synthetic event; every
    /// local-pending entry gets its own so its actor and reason survive.
    pub fn seed_initial(
        &mut self,
        members: Vec<Handle>,
        local_pending: Vec<LocalPendingInfo>,
        remote_pending: Vec<Handle>,
    ) {
        if self.have_members {
            warn!("initial group members seeded twice, ignoring");
            return;
        }
        self.have_members = true;

        self.queue.push_back(MembershipEvent::new(
            members,
            Vec::new(),
            Vec::new(),
            remote_pending,
            PropertyMap::new(),
        ));
        for info in local_pending {
            self.queue.push_back(MembershipEvent::new(
                Vec::new(),
                Vec::new(),
                vec![info.to_be_added],
                Vec::new(),
                local_pending_details(&info),
            ));
        }
    }

    /// Accept a membership delta received from the remote object.
    pub fn admit(&mut self, event: MembershipEvent) -> Admission {
        if !self.have_members {
            debug!("still waiting for initial group members, ignoring delta");
            return Admission::AwaitingInitialMembers;
        }
        if event.is_empty() {
            debug!("membership delta changes nothing, skipping");
            return Admission::Empty;
        }

        if self.self_handle != 0 && event.removed.contains(&self.self_handle) {
            if event.reason() == ChangeReason::Renamed {
                if event.removed.len() != 1 || event.gained_count() != 1 {
                    warn!(
                        removed = event.removed.len(),
                        gained = event.gained_count(),
                        "Renamed membership change for the local user is not one-for-one, ignoring"
                    );
                    return Admission::MalformedRename;
                }
                let renamed_to = event
                    .added
                    .first()
                    .or_else(|| event.local_pending.first())
                    .or_else(|| event.remote_pending.first())
                    .copied()
                    .unwrap_or(0);
                if renamed_to != 0
                    && renamed_to != self.self_handle
                    && self.renamed_from.is_none()
                {
                    self.renamed_from = Some(self.self_handle);
                }
                return Admission::SelfRenamed(renamed_to);
            }

            // Closed may follow immediately, before this event resolves.
            let actor = self.lookup_contact(event.actor());
            self.self_remove_info = Some(GroupMemberChangeDetails::new(actor, event.details.clone()));
        }

        self.queue.push_back(event);
        Admission::Queued
    }

    /// Record a new self handle; returns whether it changed.
    pub fn set_self_handle(&mut self, handle: Handle) -> bool {
        if handle == self.self_handle {
            return false;
        }
        debug!(from = self.self_handle, to = handle, "group self handle changed");
        self.self_handle = handle;
        self.retrieve_self = true;
        true
    }

    /// Schedule a pass that only resolves the self, initiator and target handles.
    pub fn request_resolution_pass(&mut self) {
        self.retrieve_self = true;
    }

    /// Start work on the next queued event, if the engine is free.
    pub fn process_next(&mut self) -> EngineStep {
        loop {
            if self.building {
                return EngineStep::Busy;
            }
            if self.queue.is_empty() && !self.retrieve_self {
                return EngineStep::Drained;
            }

            // Every pass resolves the self handle, so a pending re-resolution is covered.
            self.retrieve_self = false;
            if let Some(event) = self.queue.pop_front() {
                self.stage(event);
            }

            let to_build = self.handles_to_build();
            if to_build.is_empty() {
                self.apply(Vec::new());
                continue;
            }
            self.building = true;
            return EngineStep::Resolve(to_build);
        }
    }

    /// Feed the result of the resolution requested by [`EngineStep::Resolve`].
    pub fn on_resolved(&mut self, resolved: ResolvedContacts) -> EngineStep {
        if !self.building {
            warn!("contact resolution finished while none was requested, ignoring");
            return self.process_next();
        }
        self.building = false;

        if !resolved.invalid_handles.is_empty() {
            warn!(handles = ?resolved.invalid_handles, "unable to construct contacts for handles");
            if self.self_handle != 0 && resolved.invalid_handles.contains(&self.self_handle) {
                warn!(handle = self.self_handle, "unable to retrieve self contact");
                self.self_contact = None;
                self.renamed_from = None;
                if self.channel_ready {
                    self.outbox.push(ChannelEvent::GroupSelfContactChanged);
                }
            }
        }

        self.apply(resolved.contacts);
        self.process_next()
    }

    /// Notifications produced since the last call.
    pub fn take_events(&mut self) -> Vec<ChannelEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub fn members(&self) -> impl Iterator<Item = &ContactPtr> {
        self.members.values()
    }

    pub fn local_pending(&self) -> impl Iterator<Item = &ContactPtr> {
        self.local_pending.values()
    }

    pub fn remote_pending(&self) -> impl Iterator<Item = &ContactPtr> {
        self.remote_pending.values()
    }

    pub fn member_handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.members.keys().copied()
    }

    /// Whether `handle` is in any of the three sets.
    pub fn contains(&self, handle: Handle) -> bool {
        self.members.contains_key(&handle)
            || self.local_pending.contains_key(&handle)
            || self.remote_pending.contains_key(&handle)
    }

    pub fn is_local_pending(&self, handle: Handle) -> bool {
        self.local_pending.contains_key(&handle)
    }

    pub fn local_pending_change_info(&self, handle: Handle) -> Option<&GroupMemberChangeDetails> {
        self.local_pending_info.get(&handle)
    }

    pub fn self_handle(&self) -> Handle {
        self.self_handle
    }

    pub fn self_contact(&self) -> Option<&ContactPtr> {
        self.self_contact.as_ref()
    }

    /// Details of the change that removed the local user, if it happened.
    pub fn self_remove_info(&self) -> Option<&GroupMemberChangeDetails> {
        self.self_remove_info.as_ref()
    }

    pub fn initiator_contact(&self) -> Option<&ContactPtr> {
        self.initiator_contact.as_ref()
    }

    pub fn target_contact(&self) -> Option<&ContactPtr> {
        self.target_contact.as_ref()
    }

    /// Any contact the engine already knows for `handle`.
    pub fn lookup_contact(&self, handle: Handle) -> Option<ContactPtr> {
        if handle == 0 {
            return None;
        }
        self.members
            .get(&handle)
            .or_else(|| self.local_pending.get(&handle))
            .or_else(|| self.remote_pending.get(&handle))
            .or_else(|| self.self_contact.as_ref().filter(|c| c.handle() == handle))
            .or_else(|| self.initiator_contact.as_ref().filter(|c| c.handle() == handle))
            .or_else(|| self.target_contact.as_ref().filter(|c| c.handle() == handle))
            .cloned()
    }

    fn stage(&mut self, event: MembershipEvent) {
        for handle in &event.added {
            if !self.members.contains_key(handle) {
                self.pending_members.insert(*handle);
            }
        }
        for handle in &event.local_pending {
            if !self.local_pending.contains_key(handle) {
                self.pending_local_pending.insert(*handle);
            }
        }
        for handle in &event.remote_pending {
            if !self.remote_pending.contains_key(handle) {
                self.pending_remote_pending.insert(*handle);
            }
        }
        self.current = Some(event);
    }

    /// Move the renamed local user to its new handle, keeping its bucket.
    fn renumber(&mut self, old: Handle, contact: &ContactPtr) {
        let handle = contact.handle();
        if self.members.remove(&old).is_some() {
            self.members.insert(handle, Arc::clone(contact));
        } else if self.local_pending.remove(&old).is_some() {
            if let Some(info) = self.local_pending_info.remove(&old) {
                self.local_pending_info.insert(handle, info);
            }
            self.local_pending.insert(handle, Arc::clone(contact));
        } else if self.remote_pending.remove(&old).is_some() {
            self.remote_pending.insert(handle, Arc::clone(contact));
        }
        trace!(from = old, to = handle, "renumbered the local user");
    }

    fn handles_to_build(&self) -> Vec<Handle> {
        let mut to_build: BTreeSet<Handle> = self
            .pending_members
            .iter()
            .chain(&self.pending_local_pending)
            .chain(&self.pending_remote_pending)
            .copied()
            .collect();

        if let Some(event) = &self.current
            && event.actor() != 0
        {
            to_build.insert(event.actor());
        }
        if self.initiator_contact.is_none() && self.initiator_handle != 0 {
            to_build.insert(self.initiator_handle);
        }
        if self.target_contact.is_none() && self.target_handle != 0 {
            to_build.insert(self.target_handle);
        }
        if self.self_handle != 0 {
            to_build.insert(self.self_handle);
        }
        to_build.into_iter().collect()
    }

    fn apply(&mut self, contacts: Vec<ContactPtr>) {
        let event = self.current.take();
        let actor_handle = event.as_ref().map_or(0, MembershipEvent::actor);

        let mut added = Vec::new();
        let mut local_pending_added = Vec::new();
        let mut remote_pending_added = Vec::new();
        let mut actor_contact = None;
        let mut self_updated = false;

        // Promotion to member holds even for handles that failed to resolve.
        for handle in &self.pending_members {
            self.local_pending.remove(handle);
            self.local_pending_info.remove(handle);
            self.remote_pending.remove(handle);
        }

        for contact in &contacts {
            let handle = contact.handle();
            // A handle lands in exactly one bucket; leaving the others is silent.
            if self.pending_members.contains(&handle) {
                self.local_pending.remove(&handle);
                self.local_pending_info.remove(&handle);
                self.remote_pending.remove(&handle);
                self.members.insert(handle, Arc::clone(contact));
                added.push(Arc::clone(contact));
            } else if self.pending_local_pending.contains(&handle) {
                self.members.remove(&handle);
                self.remote_pending.remove(&handle);
                self.local_pending.insert(handle, Arc::clone(contact));
                local_pending_added.push(Arc::clone(contact));
            } else if self.pending_remote_pending.contains(&handle) {
                self.members.remove(&handle);
                self.local_pending.remove(&handle);
                self.local_pending_info.remove(&handle);
                self.remote_pending.insert(handle, Arc::clone(contact));
                remote_pending_added.push(Arc::clone(contact));
            }

            if handle == self.self_handle {
                if let Some(old) = self.renamed_from.take() {
                    self.renumber(old, contact);
                }
                if self.self_contact.as_deref() != Some(&**contact) {
                    self.self_contact = Some(Arc::clone(contact));
                    self_updated = true;
                }
            }
            if self.initiator_contact.is_none() && handle == self.initiator_handle {
                self.initiator_contact = Some(Arc::clone(contact));
            }
            if self.target_contact.is_none() && handle == self.target_handle {
                self.target_contact = Some(Arc::clone(contact));
            }
            if actor_handle != 0 && handle == actor_handle {
                actor_contact = Some(Arc::clone(contact));
            }
        }

        if self.self_handle == 0 && self.self_contact.is_some() {
            self.self_contact = None;
            self_updated = true;
        }

        self.pending_members.clear();
        self.pending_local_pending.clear();
        self.pending_remote_pending.clear();

        let details = GroupMemberChangeDetails::new(
            actor_contact,
            event
                .as_ref()
                .map(|e| e.details.clone())
                .unwrap_or_default(),
        );
        for contact in &local_pending_added {
            self.local_pending_info
                .insert(contact.handle(), details.clone());
        }

        let mut removed = Vec::new();
        if let Some(event) = &event {
            for handle in &event.removed {
                let contact = self
                    .members
                    .remove(handle)
                    .or_else(|| self.local_pending.remove(handle))
                    .or_else(|| self.remote_pending.remove(handle));
                self.local_pending_info.remove(handle);
                if let Some(contact) = contact {
                    removed.push(contact);
                }
            }
        }

        let changed = !added.is_empty()
            || !local_pending_added.is_empty()
            || !remote_pending_added.is_empty()
            || !removed.is_empty();
        if changed {
            if let Some(event) = &event
                && self.self_handle != 0
                && event.removed.contains(&self.self_handle)
            {
                self.self_remove_info = Some(details.clone());
            }

            if self.channel_ready {
                debug!(
                    added = added.len(),
                    local_pending = local_pending_added.len(),
                    remote_pending = remote_pending_added.len(),
                    removed = removed.len(),
                    "group members changed"
                );
                self.outbox.push(ChannelEvent::GroupMembersChanged {
                    added,
                    local_pending: local_pending_added,
                    remote_pending: remote_pending_added,
                    removed,
                    details,
                });
            } else {
                trace!("membership applied before ready, not notifying");
            }
        } else if event.is_some() {
            debug!("membership event had no visible effect");
        }

        if self_updated && self.channel_ready {
            self.outbox.push(ChannelEvent::GroupSelfContactChanged);
        }
    }
}
