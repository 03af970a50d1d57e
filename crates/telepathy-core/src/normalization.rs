use crate::{
    constants::details_keys,
    error::{ErrorKind, TpError, names},
    types::{ChangeReason, GroupMemberChangeDetails, Handle, LocalPendingInfo, PropertyMap, Variant},
};

/// Convert the arguments of a legacy `MembersChanged` signal to a details map.
///
/// `change-reason` is always present; `message` and `actor` only when set.
pub fn legacy_members_changed_details(
    message: &str,
    actor: Handle,
    reason: ChangeReason,
) -> PropertyMap {
    let mut details = PropertyMap::new();
    if !message.is_empty() {
        details.insert(
            details_keys::MESSAGE.to_owned(),
            Variant::Str(message.to_owned()),
        );
    }
    if actor != 0 {
        details.insert(details_keys::ACTOR.to_owned(), Variant::U32(actor));
    }
    details.insert(
        details_keys::CHANGE_REASON.to_owned(),
        Variant::U32(reason.as_raw()),
    );
    details
}

/// Details map describing why a contact is local-pending.
pub fn local_pending_details(info: &LocalPendingInfo) -> PropertyMap {
    let mut details = PropertyMap::new();
    if info.actor != 0 {
        details.insert(details_keys::ACTOR.to_owned(), Variant::U32(info.actor));
    }
    if info.reason != ChangeReason::None {
        details.insert(
            details_keys::CHANGE_REASON.to_owned(),
            Variant::U32(info.reason.as_raw()),
        );
    }
    if !info.message.is_empty() {
        details.insert(
            details_keys::MESSAGE.to_owned(),
            Variant::Str(info.message.clone()),
        );
    }
    details
}

/// Error name describing why the local user was removed from a group.
///
/// Reasons without a dedicated error fall back to `Cancelled` when the local
/// user removed themselves and `Terminated` otherwise.
pub fn group_change_error_name(
    details: &GroupMemberChangeDetails,
    self_handle: Handle,
) -> &'static str {
    match details.reason() {
        ChangeReason::Offline => names::OFFLINE,
        ChangeReason::Kicked => names::CHANNEL_KICKED,
        ChangeReason::Banned => names::CHANNEL_BANNED,
        ChangeReason::Busy => names::BUSY,
        ChangeReason::NoAnswer => names::NO_ANSWER,
        ChangeReason::PermissionDenied => names::PERMISSION_DENIED,
        ChangeReason::InvalidContact => names::DOES_NOT_EXIST,
        _ if details.actor_handle() == self_handle => names::CANCELLED,
        _ => names::TERMINATED,
    }
}

/// Invalidation error for a `Closed` signal.
pub fn closed_error(
    self_remove_info: Option<&GroupMemberChangeDetails>,
    self_handle: Handle,
) -> TpError {
    match self_remove_info {
        Some(details) if details.has_reason() => TpError::new(
            ErrorKind::Remote,
            group_change_error_name(details, self_handle),
            details.message(),
        ),
        _ => TpError::new(ErrorKind::Remote, names::CANCELLED, "channel closed"),
    }
}

/// Invalidation error used when the owning connection goes away.
pub fn orphaned_error() -> TpError {
    TpError::new(
        ErrorKind::Remote,
        names::ORPHANED,
        "Connection given as the owner of this channel was invalidated",
    )
}

/// Invalidation error used when the owning connection was already unusable.
pub fn invalid_owner_error() -> TpError {
    TpError::invalid_argument("Connection given as the owner of this channel was invalid")
}
