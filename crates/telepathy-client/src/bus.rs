use telepathy_core::{ChangeReason, ChannelEvent, ContactPtr, Feature, ObjectPath, OpId, TpError};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::trace;

/// Receiving end of a channel's notifications.
pub type EventStream = broadcast::Receiver<ChannelEvent>;

/// Result delivered once a queued operation finishes.
pub type OperationReply = oneshot::Receiver<Result<(), TpError>>;

#[derive(Debug, Error)]
pub enum BusError {
    /// The channel runtime has stopped.
    #[error("channel runtime is no longer accepting operations")]
    RuntimeStopped,
}

/// Operation requested through a [`Channel`](crate::Channel) handle.
#[derive(Debug)]
pub enum CommandKind {
    BecomeReady {
        features: Vec<Feature>,
    },
    Close,
    Leave {
        message: String,
        reason: ChangeReason,
    },
    AddContacts {
        contacts: Vec<ContactPtr>,
        message: String,
    },
    RemoveContacts {
        contacts: Vec<ContactPtr>,
        message: String,
        reason: ChangeReason,
    },
    AddSelfHandle,
    MergeChannel {
        channel: ObjectPath,
    },
    SplitChannel,
}

/// A command together with the sender its result is delivered on.
#[derive(Debug)]
pub struct ChannelCommand {
    pub op: OpId,
    pub kind: CommandKind,
    pub reply: oneshot::Sender<Result<(), TpError>>,
}

/// Handle-side queue of operations for one channel runtime.
///
/// Unbounded, so an operation is queued in call order the moment it is
/// requested. The runtime stops once every queue clone is dropped.
#[derive(Clone, Debug)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<ChannelCommand>,
}

impl CommandQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChannelCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue `kind` as operation `op` and return where its result will land.
    pub fn submit(&self, op: OpId, kind: CommandKind) -> Result<OperationReply, BusError> {
        let (reply, receiver) = oneshot::channel();
        self.tx
            .send(ChannelCommand { op, kind, reply })
            .map_err(|_| BusError::RuntimeStopped)?;
        Ok(receiver)
    }
}

/// Fan-out of [`ChannelEvent`]s from the runtime to every subscriber.
///
/// Holding one does not keep the runtime alive.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ChannelEvent>,
}

impl EventBus {
    /// `capacity` is how many events a slow subscriber may fall behind by.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> EventStream {
        self.tx.subscribe()
    }

    /// Deliver `event` to current subscribers and return how many there were.
    pub fn emit(&self, event: ChannelEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!(?event, "no subscribers for channel event");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telepathy_core::GroupFlags;

    #[tokio::test]
    async fn submitted_operations_arrive_in_order_with_their_reply() {
        let (queue, mut rx) = CommandQueue::new();
        let first = queue.submit(OpId(1), CommandKind::Close).expect("queued");
        queue
            .submit(OpId(2), CommandKind::SplitChannel)
            .expect("queued");

        let command = rx.recv().await.expect("first command");
        assert_eq!(command.op, OpId(1));
        assert!(matches!(command.kind, CommandKind::Close));
        command.reply.send(Ok(())).expect("caller still waiting");
        assert_eq!(first.await.expect("reply delivered"), Ok(()));

        let command = rx.recv().await.expect("second command");
        assert_eq!(command.op, OpId(2));
    }

    #[test]
    fn stopped_runtime_rejects_operations() {
        let (queue, rx) = CommandQueue::new();
        drop(rx);
        let err = queue
            .submit(OpId(1), CommandKind::AddSelfHandle)
            .expect_err("runtime is gone");
        assert!(matches!(err, BusError::RuntimeStopped));
    }

    #[tokio::test]
    async fn events_reach_every_subscriber() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.emit(ChannelEvent::GroupCanAddContactsChanged(true)), 2);

        assert_eq!(
            a.recv().await.expect("a receives"),
            ChannelEvent::GroupCanAddContactsChanged(true)
        );
        assert_eq!(
            b.recv().await.expect("b receives"),
            ChannelEvent::GroupCanAddContactsChanged(true)
        );
    }

    #[test]
    fn events_without_subscribers_are_dropped() {
        let bus = EventBus::new(0);
        let delivered = bus.emit(ChannelEvent::GroupFlagsChanged {
            flags: GroupFlags::empty(),
            added: GroupFlags::empty(),
            removed: GroupFlags::empty(),
        });
        assert_eq!(delivered, 0);
    }
}
