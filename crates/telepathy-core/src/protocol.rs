//! Inputs and outputs exchanged between [`ChannelCore`](crate::channel::ChannelCore)
//! and whatever drives it.

use serde::{Deserialize, Serialize};

use crate::{
    error::TpError,
    types::{
        ChangeReason, ChannelEvent, GroupFlags, Handle, HandleIdentifierMap, HandleOwnerMap,
        HandleType, LocalPendingInfo, ObjectPath, PropertyMap,
    },
};

/// Caller-visible operation (become-ready, close, leave, ...), allocated by the driver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(pub u64);

/// One outstanding remote call, allocated by the core.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallId(pub u64);

/// Remote method call the driver must perform on the channel object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RemoteRequest {
    /// `org.freedesktop.DBus.Properties.GetAll(interface)`.
    GetAll { interface: String },
    GetChannelType,
    GetHandle,
    GetInterfaces,
    Close,
    GetGroupFlags,
    GetAllMembers,
    GetLocalPendingMembersWithInfo,
    GetSelfHandle,
    AddMembers {
        handles: Vec<Handle>,
        message: String,
    },
    RemoveMembersWithReason {
        handles: Vec<Handle>,
        message: String,
        reason: ChangeReason,
    },
    /// `MergeableConference.Merge(channel)`.
    Merge { channel: ObjectPath },
    /// `Splittable.Split()`.
    Split,
}

impl RemoteRequest {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::GetAll { .. } => "GetAll",
            Self::GetChannelType => "GetChannelType",
            Self::GetHandle => "GetHandle",
            Self::GetInterfaces => "GetInterfaces",
            Self::Close => "Close",
            Self::GetGroupFlags => "GetGroupFlags",
            Self::GetAllMembers => "GetAllMembers",
            Self::GetLocalPendingMembersWithInfo => "GetLocalPendingMembersWithInfo",
            Self::GetSelfHandle => "GetSelfHandle",
            Self::AddMembers { .. } => "AddMembers",
            Self::RemoveMembersWithReason { .. } => "RemoveMembersWithReason",
            Self::Merge { .. } => "Merge",
            Self::Split => "Split",
        }
    }
}

/// Successful answer to a [`RemoteRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RemoteReply {
    Properties(PropertyMap),
    ChannelType(String),
    Handle {
        handle_type: HandleType,
        handle: Handle,
    },
    Interfaces(Vec<String>),
    GroupFlags(GroupFlags),
    AllMembers {
        members: Vec<Handle>,
        local_pending: Vec<Handle>,
        remote_pending: Vec<Handle>,
    },
    LocalPendingMembersWithInfo(Vec<LocalPendingInfo>),
    SelfHandle(Handle),
    /// Methods without a return value.
    Void,
}

impl RemoteReply {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Properties(_) => "Properties",
            Self::ChannelType(_) => "ChannelType",
            Self::Handle { .. } => "Handle",
            Self::Interfaces(_) => "Interfaces",
            Self::GroupFlags(_) => "GroupFlags",
            Self::AllMembers { .. } => "AllMembers",
            Self::LocalPendingMembersWithInfo(_) => "LocalPendingMembersWithInfo",
            Self::SelfHandle(_) => "SelfHandle",
            Self::Void => "Void",
        }
    }
}

/// Build the error used when a reply does not have the shape the call implies.
pub fn unexpected_reply(request: &str, reply: &RemoteReply) -> TpError {
    TpError::protocol_violation(format!(
        "unexpected {} reply to {request}",
        reply.kind_name()
    ))
}

/// Signal emitted by the remote channel object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelSignal {
    Closed,
    GroupFlagsChanged {
        added: GroupFlags,
        removed: GroupFlags,
    },
    /// Legacy membership delta, honored until the detailed flag is seen.
    MembersChanged {
        message: String,
        added: Vec<Handle>,
        removed: Vec<Handle>,
        local_pending: Vec<Handle>,
        remote_pending: Vec<Handle>,
        actor: Handle,
        reason: ChangeReason,
    },
    MembersChangedDetailed {
        added: Vec<Handle>,
        removed: Vec<Handle>,
        local_pending: Vec<Handle>,
        remote_pending: Vec<Handle>,
        details: PropertyMap,
    },
    HandleOwnersChanged {
        added: HandleOwnerMap,
        removed: Vec<Handle>,
    },
    SelfHandleChanged {
        self_handle: Handle,
    },
    ConferenceChannelMerged {
        channel: ObjectPath,
        channel_specific_handle: Handle,
        properties: PropertyMap,
    },
    ConferenceChannelRemoved {
        channel: ObjectPath,
        details: PropertyMap,
    },
}

/// Which pending piece of work a contact resolution belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ResolvePurpose {
    /// Current membership event (plus self/initiator/target).
    GroupMembers,
    /// Actor of the conference channel removal at the head of its queue.
    ConferenceRemovedActor,
    /// Initial conference invitees.
    InitialInvitees,
}

/// Work the driver must perform on behalf of the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Wait for the owning connection and report back with its self handle.
    AwaitConnectionReady,
    Call {
        call: CallId,
        request: RemoteRequest,
    },
    ResolveContacts {
        purpose: ResolvePurpose,
        handles: Vec<Handle>,
    },
    /// Hand identifier hints to the contact resolver.
    InjectContactIds(HandleIdentifierMap),
    /// A conference sub-channel became known; the driver may create a proxy for it.
    ProxyChannel {
        channel: ObjectPath,
        immutable_properties: PropertyMap,
    },
    Emit(ChannelEvent),
    Finish {
        op: OpId,
        result: Result<(), TpError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn unexpected_reply_is_a_protocol_violation() {
        let err = unexpected_reply("GetHandle", &RemoteReply::Void);
        assert_eq!(err.kind, ErrorKind::ProtocolViolation);
        assert_eq!(err.message, "unexpected Void reply to GetHandle");
    }

    #[test]
    fn request_names_match_dbus_methods() {
        assert_eq!(
            RemoteRequest::RemoveMembersWithReason {
                handles: vec![1],
                message: String::new(),
                reason: ChangeReason::None,
            }
            .method_name(),
            "RemoveMembersWithReason"
        );
    }
}
