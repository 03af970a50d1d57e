use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use telepathy_core::{OpId, TpError};

use crate::bus::OperationReply;

/// Completion of one channel operation.
///
/// The operation is queued when this value is created; awaiting it only
/// observes the result. Dropping it does not cancel the operation.
#[derive(Debug)]
pub struct PendingOperation {
    op: OpId,
    state: State,
}

#[derive(Debug)]
enum State {
    Waiting(OperationReply),
    Failed(Option<TpError>),
}

impl PendingOperation {
    pub(crate) fn new(op: OpId, receiver: OperationReply) -> Self {
        Self {
            op,
            state: State::Waiting(receiver),
        }
    }

    pub(crate) fn failed(op: OpId, error: TpError) -> Self {
        Self {
            op,
            state: State::Failed(Some(error)),
        }
    }

    pub fn op(&self) -> OpId {
        self.op
    }
}

impl Future for PendingOperation {
    type Output = Result<(), TpError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            State::Waiting(receiver) => Pin::new(receiver).poll(cx).map(|result| {
                result.unwrap_or_else(|_| {
                    Err(TpError::not_available(
                        "channel runtime stopped before the operation finished",
                    ))
                })
            }),
            State::Failed(error) => Poll::Ready(Err(error.take().unwrap_or_else(|| {
                TpError::not_available("operation result already taken")
            }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telepathy_core::ErrorKind;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn resolves_with_the_delivered_result() {
        let (tx, rx) = oneshot::channel();
        let pending = PendingOperation::new(OpId(1), rx);
        tx.send(Ok(())).expect("receiver alive");
        assert_eq!(pending.await, Ok(()));
    }

    #[tokio::test]
    async fn dropped_runtime_is_reported_as_not_available() {
        let (tx, rx) = oneshot::channel::<Result<(), TpError>>();
        drop(tx);
        let err = PendingOperation::new(OpId(2), rx)
            .await
            .expect_err("sender dropped");
        assert_eq!(err.kind, ErrorKind::NotAvailable);
    }

    #[tokio::test]
    async fn failed_operations_resolve_immediately() {
        let pending =
            PendingOperation::failed(OpId(3), TpError::invalid_argument("bad input"));
        assert_eq!(pending.op(), OpId(3));
        let err = pending.await.expect_err("failed up front");
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }
}
