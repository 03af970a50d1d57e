//! Runtime-agnostic core of a Telepathy channel proxy.
//!
//! This crate defines the channel introspection queue, group membership
//! engine, readiness tracker and lifecycle model, and the input/effect
//! protocol a runtime uses to drive them. It performs no I/O.

/// Channel coordinator tying the queues and trackers together.
pub mod channel;
/// Conference sub-channel bookkeeping.
pub mod conference;
/// D-Bus interface, property and details key names.
pub mod constants;
/// Error type and D-Bus error name classification.
pub mod error;
/// Group membership engine.
pub mod group;
/// Introspection steps and their queue.
pub mod introspection;
/// Detail-map synthesis and invalidation error mapping.
pub mod normalization;
/// Property cache and `GetAll` extraction rules.
pub mod properties;
/// Requests, replies, signals and effects exchanged with the driver.
pub mod protocol;
/// Feature readiness tracking.
pub mod readiness;
/// Channel lifecycle state machine.
pub mod state_machine;
/// Data model shared with consumers.
pub mod types;

pub use channel::{ChannelCore, CoreOptions};
pub use error::{ErrorKind, TpError, classify_error_name};
pub use protocol::{
    CallId, ChannelSignal, Effect, OpId, RemoteReply, RemoteRequest, ResolvePurpose,
};
pub use readiness::Feature;
pub use state_machine::ChannelStateMachine;
pub use types::{
    ChangeReason, ChannelEvent, ChannelLifecycleState, ChannelSnapshot, Contact, ContactPtr,
    GroupFlags, GroupMemberChangeDetails, Handle, HandleIdentifierMap, HandleOwnerMap,
    HandleType, LocalPendingInfo, ObjectPath, PropertyMap, ResolvedContacts, Variant,
};
