//! Collaborators the channel runtime talks to.
//!
//! Transport, contact construction and sub-channel proxy creation live
//! outside this crate; these traits are the seams where they plug in.

use std::{future::Future, pin::Pin, sync::Arc};

use telepathy_core::{
    ChannelSignal, Handle, HandleIdentifierMap, ObjectPath, PropertyMap, RemoteReply,
    RemoteRequest, ResolvedContacts, TpError,
};
use tokio::sync::mpsc;

use crate::{channel::Channel, connection::Connection};

/// Boxed future returned by collaborator calls.
pub type RemoteCall<T> = Pin<Box<dyn Future<Output = Result<T, TpError>> + Send + 'static>>;

/// The remote channel object.
pub trait ChannelRemote: Send + Sync {
    fn object_path(&self) -> &ObjectPath;

    /// Start one method call. Failures carry the remote D-Bus error name.
    fn call(&self, request: RemoteRequest) -> RemoteCall<RemoteReply>;

    /// Subscribe to the object's signals, in emission order.
    fn signals(&self) -> mpsc::UnboundedReceiver<ChannelSignal>;
}

/// Turns handles into contacts for one connection.
pub trait ContactResolver: Send + Sync {
    fn contacts_for_handles(&self, handles: Vec<Handle>) -> RemoteCall<ResolvedContacts>;

    /// Identifier hints to use for the next resolution of these handles.
    fn inject_contact_ids(&self, ids: HandleIdentifierMap);
}

/// Creates proxies for channels discovered at runtime, such as conference members.
pub trait ChannelFactory: Send + Sync {
    fn proxy(
        &self,
        connection: &Arc<Connection>,
        object_path: &ObjectPath,
        immutable_properties: PropertyMap,
    ) -> Result<Channel, TpError>;
}
