//! In-memory collaborators for exercising channels without a bus.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use telepathy_client::{
    Channel, ChannelFactory, ChannelRemote, Connection, ContactResolver, RemoteCall,
};
use telepathy_core::{
    ChannelSignal, Contact, ContactPtr, Handle, HandleIdentifierMap, ObjectPath, PropertyMap,
    RemoteReply, RemoteRequest, ResolvedContacts, TpError,
    error::{ErrorKind, names},
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

pub mod fixtures;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FakeError {
    #[error("no remote registered for {0}")]
    UnregisteredPath(ObjectPath),
}

impl From<FakeError> for TpError {
    fn from(err: FakeError) -> Self {
        TpError::new(ErrorKind::Remote, names::DOES_NOT_EXIST, err.to_string())
    }
}

type CannedReply = (RemoteRequest, Result<RemoteReply, TpError>);

#[derive(Default)]
struct RemoteState {
    replies: Vec<CannedReply>,
    delays: HashMap<&'static str, Duration>,
    calls: Vec<RemoteRequest>,
    subscribers: Vec<mpsc::UnboundedSender<ChannelSignal>>,
}

/// Remote channel object answering calls from a table of canned replies.
///
/// Mutating methods succeed with no value unless overridden; anything else
/// without a canned reply fails with `UnknownMethod`.
#[derive(Clone)]
pub struct FakeChannelRemote {
    object_path: ObjectPath,
    state: Arc<RwLock<RemoteState>>,
}

impl FakeChannelRemote {
    pub fn new(object_path: impl Into<ObjectPath>) -> Self {
        Self {
            object_path: object_path.into(),
            state: Arc::default(),
        }
    }

    /// Answer `request` with `reply`, replacing any earlier answer.
    pub fn with_reply(self, request: RemoteRequest, reply: Result<RemoteReply, TpError>) -> Self {
        self.set_reply(request, reply);
        self
    }

    pub fn set_reply(&self, request: RemoteRequest, reply: Result<RemoteReply, TpError>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.replies.retain(|(known, _)| *known != request);
        state.replies.push((request, reply));
    }

    /// Delay every reply to `method` by `delay`.
    pub fn with_delay(self, method: &'static str, delay: Duration) -> Self {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .delays
            .insert(method, delay);
        self
    }

    /// Deliver `signal` to every subscriber.
    pub fn emit(&self, signal: ChannelSignal) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .subscribers
            .retain(|subscriber| subscriber.send(signal.clone()).is_ok());
    }

    pub fn calls(&self) -> Vec<RemoteRequest> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .iter()
            .filter(|request| request.method_name() == method)
            .count()
    }
}

impl ChannelRemote for FakeChannelRemote {
    fn object_path(&self) -> &ObjectPath {
        &self.object_path
    }

    fn call(&self, request: RemoteRequest) -> RemoteCall<RemoteReply> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        debug!(channel = %self.object_path, method = request.method_name(), "fake remote call");

        let reply = state
            .replies
            .iter()
            .find(|(known, _)| *known == request)
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| default_reply(&request));
        let delay = state
            .delays
            .get(request.method_name())
            .copied()
            .unwrap_or_default();
        state.calls.push(request);

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            reply
        })
    }

    fn signals(&self) -> mpsc::UnboundedReceiver<ChannelSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .push(tx);
        rx
    }
}

fn default_reply(request: &RemoteRequest) -> Result<RemoteReply, TpError> {
    match request {
        RemoteRequest::Close
        | RemoteRequest::AddMembers { .. }
        | RemoteRequest::RemoveMembersWithReason { .. }
        | RemoteRequest::Merge { .. }
        | RemoteRequest::Split => Ok(RemoteReply::Void),
        other => Err(TpError::remote(
            names::UNKNOWN_METHOD,
            format!("{} is not implemented", other.method_name()),
        )),
    }
}

#[derive(Default)]
struct ResolverState {
    invalid: HashSet<Handle>,
    delays: HashMap<Handle, Duration>,
    hints: HashMap<Handle, String>,
    cache: HashMap<Handle, ContactPtr>,
    requests: Vec<Vec<Handle>>,
    injected: Vec<HandleIdentifierMap>,
}

/// Contact resolver naming every handle `contact{handle}` unless given a hint.
#[derive(Clone, Default)]
pub struct FakeContactResolver {
    state: Arc<RwLock<ResolverState>>,
}

impl FakeContactResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject `handle` as invalid.
    pub fn with_invalid(self, handle: Handle) -> Self {
        self.write().invalid.insert(handle);
        self
    }

    /// Resolutions that include `handle` take at least `delay`.
    pub fn with_delay(self, handle: Handle, delay: Duration) -> Self {
        self.write().delays.insert(handle, delay);
        self
    }

    /// Every handle list passed to the resolver, in request order.
    pub fn requests(&self) -> Vec<Vec<Handle>> {
        self.read().requests.clone()
    }

    pub fn injected(&self) -> Vec<HandleIdentifierMap> {
        self.read().injected.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ResolverState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ResolverState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ContactResolver for FakeContactResolver {
    fn contacts_for_handles(&self, handles: Vec<Handle>) -> RemoteCall<ResolvedContacts> {
        let delay = {
            let mut state = self.write();
            state.requests.push(handles.clone());
            handles
                .iter()
                .filter_map(|handle| state.delays.get(handle).copied())
                .max()
                .unwrap_or_default()
        };

        let state = Arc::clone(&self.state);
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut state = state.write().unwrap_or_else(PoisonError::into_inner);
            let mut resolved = ResolvedContacts::default();
            for handle in handles {
                if state.invalid.contains(&handle) {
                    resolved.invalid_handles.push(handle);
                    continue;
                }
                let id = state
                    .hints
                    .get(&handle)
                    .cloned()
                    .unwrap_or_else(|| format!("contact{handle}"));
                let cached = state
                    .cache
                    .get(&handle)
                    .filter(|cached| cached.id() == id)
                    .cloned();
                let contact = match cached {
                    Some(cached) => cached,
                    None => {
                        let contact = Arc::new(Contact::new(handle, id));
                        state.cache.insert(handle, Arc::clone(&contact));
                        contact
                    }
                };
                resolved.contacts.push(contact);
            }
            Ok(resolved)
        })
    }

    fn inject_contact_ids(&self, ids: HandleIdentifierMap) {
        let mut state = self.write();
        state
            .hints
            .extend(ids.iter().map(|(handle, id)| (*handle, id.clone())));
        state.injected.push(ids);
    }
}

/// Channel factory handing out proxies for registered fake remotes.
#[derive(Clone, Default)]
pub struct FakeChannelFactory {
    remotes: Arc<RwLock<HashMap<ObjectPath, FakeChannelRemote>>>,
}

impl FakeChannelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, remote: FakeChannelRemote) {
        self.remotes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(remote.object_path().clone(), remote);
    }

    pub fn remote(&self, object_path: &ObjectPath) -> Option<FakeChannelRemote> {
        self.remotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(object_path)
            .cloned()
    }
}

impl ChannelFactory for FakeChannelFactory {
    fn proxy(
        &self,
        connection: &Arc<Connection>,
        object_path: &ObjectPath,
        immutable_properties: PropertyMap,
    ) -> Result<Channel, TpError> {
        let remote = self
            .remote(object_path)
            .ok_or_else(|| FakeError::UnregisteredPath(object_path.clone()))?;
        Ok(Channel::new(
            Arc::clone(connection),
            Arc::new(remote),
            immutable_properties,
        ))
    }
}

/// A connection wired to fake collaborators.
#[derive(Clone)]
pub struct FakeConnection {
    pub connection: Arc<Connection>,
    pub resolver: FakeContactResolver,
    pub factory: FakeChannelFactory,
}

impl FakeConnection {
    /// A connection that has not finished connecting yet.
    pub fn connecting() -> Self {
        Self::with_resolver(FakeContactResolver::new())
    }

    /// A connected connection whose local user is `self_handle`.
    pub fn ready(self_handle: Handle) -> Self {
        let fake = Self::connecting();
        fake.connection.set_ready(self_handle);
        fake
    }

    pub fn with_resolver(resolver: FakeContactResolver) -> Self {
        let factory = FakeChannelFactory::new();
        let connection = Connection::new(
            Arc::new(resolver.clone()),
            Arc::new(factory.clone()),
        );
        Self {
            connection,
            resolver,
            factory,
        }
    }

    /// Create a channel proxy for `remote` on this connection.
    pub fn channel(&self, remote: &FakeChannelRemote, immutable_properties: PropertyMap) -> Channel {
        Channel::new(
            Arc::clone(&self.connection),
            Arc::new(remote.clone()),
            immutable_properties,
        )
    }
}
