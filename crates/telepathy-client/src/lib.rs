//! Tokio runtime for Telepathy channel proxies.
//!
//! A [`Channel`] owns a background task that feeds remote replies, signals
//! and contact resolutions into a [`telepathy_core::ChannelCore`] and carries
//! out the calls it asks for. Operations return a [`PendingOperation`];
//! notifications are delivered through [`Channel::subscribe`].

mod bus;
mod channel;
mod config;
mod connection;
mod pending;
mod remote;
mod runtime;

pub use bus::{
    BusError, ChannelCommand, CommandKind, CommandQueue, EventBus, EventStream, OperationReply,
};
pub use channel::Channel;
pub use config::{ClientConfig, ConfigError};
pub use connection::{Connection, ConnectionStatus};
pub use pending::PendingOperation;
pub use remote::{ChannelFactory, ChannelRemote, ContactResolver, RemoteCall};
