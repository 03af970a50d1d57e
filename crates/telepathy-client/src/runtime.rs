use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use telepathy_core::{
    CallId, ChannelCore, ChannelSignal, Effect, Handle, ObjectPath, OpId, PropertyMap,
    RemoteReply, ResolvePurpose, ResolvedContacts, TpError,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::{
    bus::{ChannelCommand, CommandKind, EventBus},
    channel::Channel,
    connection::Connection,
    remote::ChannelRemote,
};

/// Result of a collaborator future, fed back into the core.
#[derive(Debug)]
enum Completion {
    ConnectionReady(Result<Handle, TpError>),
    Reply {
        call: CallId,
        result: Result<RemoteReply, TpError>,
    },
    Contacts {
        purpose: ResolvePurpose,
        result: Result<ResolvedContacts, TpError>,
    },
}

pub(crate) type SharedCore = Arc<RwLock<ChannelCore>>;
pub(crate) type ProxyMap = Arc<RwLock<HashMap<ObjectPath, Channel>>>;

/// Single owner of a channel's inputs.
///
/// Every input is applied to the core under a short write lock; the
/// resulting effects are then carried out with no lock held.
pub(crate) struct ChannelRuntime {
    core: SharedCore,
    proxies: ProxyMap,
    connection: Arc<Connection>,
    remote: Arc<dyn ChannelRemote>,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
    signals: mpsc::UnboundedReceiver<ChannelSignal>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    events: EventBus,
    waiters: HashMap<OpId, oneshot::Sender<Result<(), TpError>>>,
}

impl ChannelRuntime {
    pub(crate) fn new(
        core: SharedCore,
        proxies: ProxyMap,
        connection: Arc<Connection>,
        remote: Arc<dyn ChannelRemote>,
        commands: mpsc::UnboundedReceiver<ChannelCommand>,
        events: EventBus,
    ) -> Self {
        // Subscribe before anything is called so no signal can be missed.
        let signals = remote.signals();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            core,
            proxies,
            connection,
            remote,
            commands,
            signals,
            completion_tx,
            completion_rx,
            events,
            waiters: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        let invalidated = self.connection.invalidated_token();
        let mut orphaned = false;

        if !self.connection.is_valid() {
            orphaned = true;
            let effects = self.with_core(ChannelCore::on_owner_invalid);
            self.apply(effects);
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(signal) = self.signals.recv() => {
                    trace!(signal = ?signal, "remote signal");
                    let effects = self.with_core(|core| core.on_signal(signal));
                    self.apply(effects);
                }
                Some(completion) = self.completion_rx.recv() => self.handle_completion(completion),
                _ = invalidated.cancelled(), if !orphaned => {
                    orphaned = true;
                    let effects = self.with_core(ChannelCore::on_connection_invalidated);
                    self.apply(effects);
                }
            }
        }

        debug!(channel = %self.remote.object_path(), "all channel handles dropped, runtime exiting");
    }

    fn handle_command(&mut self, command: ChannelCommand) {
        let ChannelCommand { op, kind, reply } = command;
        self.waiters.insert(op, reply);

        let effects = self.with_core(|core| match kind {
            CommandKind::BecomeReady { features } => core.become_ready(op, &features),
            CommandKind::Close => core.request_close(op),
            CommandKind::Leave { message, reason } => core.request_leave(op, &message, reason),
            CommandKind::AddContacts { contacts, message } => {
                core.group_add_contacts(op, &contacts, &message)
            }
            CommandKind::RemoveContacts {
                contacts,
                message,
                reason,
            } => core.group_remove_contacts(op, &contacts, &message, reason),
            CommandKind::AddSelfHandle => core.group_add_self_handle(op),
            CommandKind::MergeChannel { channel } => core.conference_merge_channel(op, &channel),
            CommandKind::SplitChannel => core.conference_split_channel(op),
        });
        self.apply(effects);
    }

    fn handle_completion(&mut self, completion: Completion) {
        let connection_valid = self.connection.is_valid();
        let effects = self.with_core(|core| match completion {
            // Whichever of the wait or the token fires first, a dead owner orphans the channel.
            Completion::ConnectionReady(Err(_)) if !connection_valid => {
                core.on_connection_invalidated()
            }
            Completion::ConnectionReady(result) => core.on_connection_ready(result),
            Completion::Reply { call, result } => core.on_reply(call, result),
            Completion::Contacts { purpose, result } => core.on_contacts_resolved(purpose, result),
        });
        self.apply(effects);
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut ChannelCore) -> R) -> R {
        let mut core = self.core.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut core)
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::AwaitConnectionReady => {
                    let connection = Arc::clone(&self.connection);
                    self.spawn_completion(async move {
                        Completion::ConnectionReady(connection.become_ready().await)
                    });
                }
                Effect::Call { call, request } => {
                    let reply = self.remote.call(request);
                    self.spawn_completion(async move {
                        Completion::Reply {
                            call,
                            result: reply.await,
                        }
                    });
                }
                Effect::ResolveContacts { purpose, handles } => {
                    trace!(?purpose, ?handles, "resolving contacts");
                    let resolved = self.connection.resolver().contacts_for_handles(handles);
                    self.spawn_completion(async move {
                        Completion::Contacts {
                            purpose,
                            result: resolved.await,
                        }
                    });
                }
                Effect::InjectContactIds(ids) => {
                    self.connection.resolver().inject_contact_ids(ids);
                }
                Effect::ProxyChannel {
                    channel,
                    immutable_properties,
                } => self.proxy_channel(channel, immutable_properties),
                Effect::Emit(event) => {
                    self.events.emit(event);
                }
                Effect::Finish { op, result } => match self.waiters.remove(&op) {
                    Some(waiter) => {
                        let _ = waiter.send(result);
                    }
                    None => warn!(op = op.0, "finished an operation nobody waits for"),
                },
            }
        }
    }

    fn proxy_channel(&self, channel: ObjectPath, immutable_properties: PropertyMap) {
        let mut proxies = self.proxies.write().unwrap_or_else(PoisonError::into_inner);
        if proxies.contains_key(&channel) {
            return;
        }
        match self
            .connection
            .factory()
            .proxy(&self.connection, &channel, immutable_properties)
        {
            Ok(proxy) => {
                debug!(channel = %channel, "created proxy for conference channel");
                proxies.insert(channel, proxy);
            }
            Err(err) => {
                warn!(channel = %channel, error = %err, "could not create proxy for conference channel");
            }
        }
    }

    fn spawn_completion<F>(&self, future: F)
    where
        F: std::future::Future<Output = Completion> + Send + 'static,
    {
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let _ = completions.send(future.await);
        });
    }
}
