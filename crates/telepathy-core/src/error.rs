use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ChannelLifecycleState;

/// Well-known D-Bus and Telepathy error names.
pub mod names {
    pub const NOT_AVAILABLE: &str = "org.freedesktop.Telepathy.Error.NotAvailable";
    pub const INVALID_ARGUMENT: &str = "org.freedesktop.Telepathy.Error.InvalidArgument";
    pub const NOT_IMPLEMENTED: &str = "org.freedesktop.Telepathy.Error.NotImplemented";
    pub const CANCELLED: &str = "org.freedesktop.Telepathy.Error.Cancelled";
    pub const TERMINATED: &str = "org.freedesktop.Telepathy.Error.Terminated";
    pub const ORPHANED: &str = "org.freedesktop.Telepathy.Error.Orphaned";
    pub const OFFLINE: &str = "org.freedesktop.Telepathy.Error.Offline";
    pub const BUSY: &str = "org.freedesktop.Telepathy.Error.Busy";
    pub const NO_ANSWER: &str = "org.freedesktop.Telepathy.Error.NoAnswer";
    pub const PERMISSION_DENIED: &str = "org.freedesktop.Telepathy.Error.PermissionDenied";
    pub const DOES_NOT_EXIST: &str = "org.freedesktop.Telepathy.Error.DoesNotExist";
    pub const CHANNEL_KICKED: &str = "org.freedesktop.Telepathy.Error.Channel.Kicked";
    pub const CHANNEL_BANNED: &str = "org.freedesktop.Telepathy.Error.Channel.Banned";
    pub const CONFUSED: &str = "org.freedesktop.Telepathy.Error.Confused";
    pub const NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
}

/// Broad error kind used to decide how a failure is handled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    /// Object or feature not ready, or a feature that cannot be provided.
    NotAvailable,
    /// Bad input detected before any remote call.
    InvalidArgument,
    /// The remote object lacks the interface an operation needs.
    NotImplemented,
    /// The remote side answered with a D-Bus error.
    Remote,
    /// The remote side sent structurally inconsistent data.
    ProtocolViolation,
}

/// Error carried by failed operations and by channel invalidation.
///
/// The `name` is a domain-qualified D-Bus error name and is forwarded
/// verbatim from remote failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct TpError {
    pub kind: ErrorKind,
    pub name: String,
    pub message: String,
}

impl TpError {
    pub fn new(kind: ErrorKind, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            message: message.into(),
        }
    }

    /// Wrap an error returned by the remote side, keeping its name as-is.
    pub fn remote(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(classify_error_name(&name), name, message)
    }

    pub fn not_available(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAvailable, names::NOT_AVAILABLE, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, names::INVALID_ARGUMENT, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented, names::NOT_IMPLEMENTED, message)
    }

    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolViolation, names::CONFUSED, message)
    }

    /// Error used when an operation is refused in the current lifecycle state.
    pub fn not_ready(state: ChannelLifecycleState, action: &str) -> Self {
        Self::not_available(format!(
            "cannot run '{action}' while channel is in state {state:?}"
        ))
    }
}

/// Map a D-Bus error name onto an [`ErrorKind`].
pub fn classify_error_name(name: &str) -> ErrorKind {
    match name {
        names::NOT_AVAILABLE => ErrorKind::NotAvailable,
        names::INVALID_ARGUMENT => ErrorKind::InvalidArgument,
        names::NOT_IMPLEMENTED | names::UNKNOWN_METHOD => ErrorKind::NotImplemented,
        names::CONFUSED => ErrorKind::ProtocolViolation,
        _ => ErrorKind::Remote,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_error_names() {
        assert_eq!(
            classify_error_name(names::NOT_AVAILABLE),
            ErrorKind::NotAvailable
        );
        assert_eq!(
            classify_error_name(names::UNKNOWN_METHOD),
            ErrorKind::NotImplemented
        );
        assert_eq!(classify_error_name(names::NO_REPLY), ErrorKind::Remote);
        assert_eq!(
            classify_error_name("com.example.Whatever"),
            ErrorKind::Remote
        );
    }

    #[test]
    fn remote_errors_keep_their_name_verbatim() {
        let err = TpError::remote(names::NO_REPLY, "timed out");
        assert_eq!(err.name, "org.freedesktop.DBus.Error.NoReply");
        assert_eq!(err.kind, ErrorKind::Remote);
        assert_eq!(
            err.to_string(),
            "org.freedesktop.DBus.Error.NoReply: timed out"
        );
    }

    #[test]
    fn keeps_not_ready_error_name_stable() {
        let err = TpError::not_ready(ChannelLifecycleState::Introspecting, "leave");
        assert_eq!(err.name, names::NOT_AVAILABLE);
        assert_eq!(err.kind, ErrorKind::NotAvailable);
    }
}
