//! Ordered queue of application messages awaiting delivery.
//!
//! Only the head of the queue is ever handed to the encryption engine, and it
//! leaves the queue only once every one of its fragments was accepted by the
//! transport. A reset puts the head back into the "not submitted" state so it
//! is replayed against the next session.

use std::collections::VecDeque;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::core::SessionError;

/// Resolves once a message has been fully handed to the transport.
///
/// Resolves to [`SessionError::Cancelled`] if the session is destroyed first.
/// Dropping a `Delivery` does not withdraw the message.
#[derive(Debug)]
#[must_use = "a Delivery does nothing unless awaited; drop it to ignore the confirmation"]
pub struct Delivery {
    rx: oneshot::Receiver<Result<(), SessionError>>,
}

impl Delivery {
    /// Check for an outcome without waiting.
    pub fn try_outcome(&mut self) -> Option<Result<(), SessionError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(SessionError::Cancelled)),
        }
    }
}

impl Future for Delivery {
    type Output = Result<(), SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(SessionError::Cancelled)))
    }
}

/// Sending half of a [`Delivery`].
#[derive(Debug)]
pub struct DeliveryNotifier {
    tx: oneshot::Sender<Result<(), SessionError>>,
}

impl DeliveryNotifier {
    /// Create a connected notifier/future pair.
    pub fn channel() -> (Self, Delivery) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, Delivery { rx })
    }

    fn resolve(self, outcome: Result<(), SessionError>) {
        // The application may have dropped its Delivery.
        let _ = self.tx.send(outcome);
    }
}

/// One application message awaiting full delivery.
#[derive(Debug)]
pub struct PendingMessage {
    payload: Vec<u8>,
    notifier: Option<DeliveryNotifier>,
    submissions: u32,
}

impl PendingMessage {
    /// Message bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// How many times the message was handed to an engine.
    pub fn submissions(&self) -> u32 {
        self.submissions
    }
}

/// FIFO of [`PendingMessage`]s with single-flight submission.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    pending: VecDeque<PendingMessage>,
    in_flight: bool,
    closed: bool,
}

impl OutboundQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    ///
    /// Fails with [`SessionError::SessionClosed`] once the queue was closed.
    pub fn enqueue(
        &mut self,
        payload: Vec<u8>,
        notifier: Option<DeliveryNotifier>,
    ) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::SessionClosed);
        }
        self.pending.push_back(PendingMessage {
            payload,
            notifier,
            submissions: 0,
        });
        Ok(())
    }

    /// Number of messages not yet confirmed, including the one in flight.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing awaits delivery.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether the head message was submitted and is not yet confirmed.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Whether the queue was closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark the head message as in flight and return it for submission.
    ///
    /// Returns `None` while a message is already in flight or the queue is
    /// empty.
    pub fn submit_next(&mut self) -> Option<&PendingMessage> {
        if self.in_flight || self.closed {
            return None;
        }
        let head = self.pending.front_mut()?;
        head.submissions += 1;
        self.in_flight = true;
        Some(head)
    }

    /// The in-flight message is fully delivered: pop it and confirm it.
    ///
    /// Returns the number of times it had been submitted.
    pub fn confirm_head(&mut self) -> Option<u32> {
        if !self.in_flight {
            return None;
        }
        self.in_flight = false;
        let head = self.pending.pop_front()?;
        if let Some(notifier) = head.notifier {
            notifier.resolve(Ok(()));
        }
        Some(head.submissions)
    }

    /// Return the in-flight message to the head of the queue for replay.
    ///
    /// Returns whether a message was in flight.
    pub fn requeue_in_flight(&mut self) -> bool {
        mem::replace(&mut self.in_flight, false)
    }

    /// Close the queue, cancelling every pending message.
    ///
    /// Returns how many messages were cancelled.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        self.in_flight = false;
        let cancelled = self.pending.len();
        for message in self.pending.drain(..) {
            if let Some(notifier) = message.notifier {
                notifier.resolve(Err(SessionError::Cancelled));
            }
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enqueue_tracked(queue: &mut OutboundQueue, payload: &[u8]) -> Delivery {
        let (notifier, delivery) = DeliveryNotifier::channel();
        queue.enqueue(payload.to_vec(), Some(notifier)).unwrap();
        delivery
    }

    #[test]
    fn test_single_flight_submission() {
        let mut queue = OutboundQueue::new();
        let _first = enqueue_tracked(&mut queue, b"one");
        let _second = enqueue_tracked(&mut queue, b"two");

        assert_eq!(queue.submit_next().unwrap().payload(), b"one");
        assert!(queue.in_flight());
        assert!(queue.submit_next().is_none());

        assert_eq!(queue.confirm_head(), Some(1));
        assert_eq!(queue.submit_next().unwrap().payload(), b"two");
    }

    #[test]
    fn test_confirmations_in_fifo_order() {
        let mut queue = OutboundQueue::new();
        let mut first = enqueue_tracked(&mut queue, b"one");
        let mut second = enqueue_tracked(&mut queue, b"two");

        queue.submit_next();
        assert!(first.try_outcome().is_none());
        queue.confirm_head();
        assert!(matches!(first.try_outcome(), Some(Ok(()))));
        assert!(second.try_outcome().is_none());

        queue.submit_next();
        queue.confirm_head();
        assert!(matches!(second.try_outcome(), Some(Ok(()))));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_keeps_head_for_replay() {
        let mut queue = OutboundQueue::new();
        let mut delivery = enqueue_tracked(&mut queue, b"retry me");

        queue.submit_next();
        assert!(queue.requeue_in_flight());
        assert!(!queue.requeue_in_flight());
        assert!(delivery.try_outcome().is_none());

        let head = queue.submit_next().unwrap();
        assert_eq!(head.payload(), b"retry me");
        assert_eq!(head.submissions(), 2);

        assert_eq!(queue.confirm_head(), Some(2));
        assert!(matches!(delivery.try_outcome(), Some(Ok(()))));
    }

    #[test]
    fn test_confirm_without_flight_is_ignored() {
        let mut queue = OutboundQueue::new();
        let mut delivery = enqueue_tracked(&mut queue, b"waiting");

        assert_eq!(queue.confirm_head(), None);
        assert_eq!(queue.len(), 1);
        assert!(delivery.try_outcome().is_none());
    }

    #[test]
    fn test_close_cancels_everything() {
        let mut queue = OutboundQueue::new();
        let mut first = enqueue_tracked(&mut queue, b"one");
        let mut second = enqueue_tracked(&mut queue, b"two");
        queue.enqueue(b"untracked".to_vec(), None).unwrap();
        queue.submit_next();

        assert_eq!(queue.close(), 3);
        assert!(matches!(first.try_outcome(), Some(Err(SessionError::Cancelled))));
        assert!(matches!(second.try_outcome(), Some(Err(SessionError::Cancelled))));
        assert!(queue.submit_next().is_none());
        assert!(matches!(
            queue.enqueue(b"late".to_vec(), None),
            Err(SessionError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_delivery_future_resolves() {
        let mut queue = OutboundQueue::new();
        let delivery = enqueue_tracked(&mut queue, b"async");

        queue.submit_next();
        queue.confirm_head();
        assert!(delivery.await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_notifier_reads_as_cancelled() {
        let (notifier, delivery) = DeliveryNotifier::channel();
        drop(notifier);
        assert!(matches!(delivery.await, Err(SessionError::Cancelled)));
    }
}
