use std::sync::{Arc, OnceLock};

use telepathy_core::{Handle, TpError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::remote::{ChannelFactory, ContactResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected { self_handle: Handle },
}

/// The connection owning a set of channels.
///
/// Channels keep an `Arc<Connection>`; the connection never references its
/// channels. Invalidation is broadcast through a cancellation token.
pub struct Connection {
    status: watch::Sender<ConnectionStatus>,
    invalidated: CancellationToken,
    invalidation: OnceLock<TpError>,
    resolver: Arc<dyn ContactResolver>,
    factory: Arc<dyn ChannelFactory>,
}

impl Connection {
    pub fn new(resolver: Arc<dyn ContactResolver>, factory: Arc<dyn ChannelFactory>) -> Arc<Self> {
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        Arc::new(Self {
            status,
            invalidated: CancellationToken::new(),
            invalidation: OnceLock::new(),
            resolver,
            factory,
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Mark the connection connected, with the local user's handle.
    pub fn set_ready(&self, self_handle: Handle) {
        debug!(self_handle, "connection ready");
        self.status
            .send_replace(ConnectionStatus::Connected { self_handle });
    }

    /// Wait until connected; fails with the invalidation error if the connection dies first.
    pub async fn become_ready(&self) -> Result<Handle, TpError> {
        let mut status = self.status.subscribe();
        loop {
            if let Some(err) = self.invalidation() {
                return Err(err);
            }
            if let ConnectionStatus::Connected { self_handle } = *status.borrow_and_update() {
                return Ok(self_handle);
            }
            tokio::select! {
                _ = self.invalidated.cancelled() => {}
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(TpError::not_available("connection status is gone"));
                    }
                }
            }
        }
    }

    /// Permanently invalidate the connection. Only the first error is kept.
    pub fn invalidate(&self, error: TpError) {
        if self.invalidation.set(error).is_ok() {
            debug!("connection invalidated");
            self.invalidated.cancel();
        }
    }

    pub fn is_valid(&self) -> bool {
        self.invalidation.get().is_none()
    }

    pub fn invalidation(&self) -> Option<TpError> {
        self.invalidation.get().cloned()
    }

    /// Token cancelled when the connection is invalidated.
    pub fn invalidated_token(&self) -> CancellationToken {
        self.invalidated.clone()
    }

    pub fn resolver(&self) -> &Arc<dyn ContactResolver> {
        &self.resolver
    }

    pub fn factory(&self) -> &Arc<dyn ChannelFactory> {
        &self.factory
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("status", &self.status())
            .field("invalidation", &self.invalidation.get())
            .finish_non_exhaustive()
    }
}
