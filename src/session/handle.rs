//! Application-facing handles to a running session.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};

use crate::core::{Fingerprint, InstanceTag, SessionError};
use crate::outbound::{Delivery, DeliveryNotifier};

use super::LifecycleState;

/// Requests from handles to the session task.
#[derive(Debug)]
pub(crate) enum Command {
    Send {
        payload: Vec<u8>,
        notifier: DeliveryNotifier,
    },
    Reset,
    Destroy,
}

/// Something the application should know about.
#[derive(Debug)]
pub enum SessionEvent {
    /// A complete message from the peer.
    Message(Vec<u8>),
    /// The encrypted channel is up.
    Established {
        /// Fingerprint the peer authenticated with.
        fingerprint: Fingerprint,
        /// Instance tag the peer announced.
        instance_tag: Option<InstanceTag>,
    },
    /// The peer authenticated with a key other than the expected one.
    ///
    /// Advisory: the session stays up.
    IdentityMismatch {
        /// Fingerprint from the handshake.
        actual: Fingerprint,
        /// Fingerprint from the configuration.
        expected: Fingerprint,
    },
    /// A fault the session is recovering from by resetting.
    Error(SessionError),
}

/// Cloneable handle to a running session.
///
/// Dropping every handle destroys the session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    closed: Arc<AtomicBool>,
    state: watch::Receiver<LifecycleState>,
    stopped: watch::Receiver<bool>,
    local_fingerprint: Fingerprint,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        closed: Arc<AtomicBool>,
        state: watch::Receiver<LifecycleState>,
        stopped: watch::Receiver<bool>,
        local_fingerprint: Fingerprint,
    ) -> Self {
        Self {
            commands,
            closed,
            state,
            stopped,
            local_fingerprint,
        }
    }

    /// Queue a message for the peer.
    ///
    /// Never blocks. The returned [`Delivery`] resolves once every fragment
    /// of the message has been accepted by the transport, across as many
    /// resets as it takes. Text is sent as its UTF-8 bytes.
    pub fn send(&self, payload: impl Into<Vec<u8>>) -> Result<Delivery, SessionError> {
        if self.is_closed() {
            return Err(SessionError::SessionClosed);
        }
        let (notifier, delivery) = DeliveryNotifier::channel();
        self.commands
            .send(Command::Send {
                payload: payload.into(),
                notifier,
            })
            .map_err(|_| SessionError::SessionClosed)?;
        Ok(delivery)
    }

    /// Tear down the encrypted channel and handshake again.
    ///
    /// Queued messages are kept and replayed on the new channel.
    pub fn reset(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::SessionClosed);
        }
        self.commands
            .send(Command::Reset)
            .map_err(|_| SessionError::SessionClosed)
    }

    /// Destroy the session.
    ///
    /// Returns immediately; await the returned [`Teardown`] to wait until the
    /// engine ended and the transport closed. Pending deliveries resolve to
    /// [`SessionError::Cancelled`]. Calling this more than once is harmless.
    pub fn destroy(&self) -> Teardown {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // The task may already be gone.
            let _ = self.commands.send(Command::Destroy);
        }
        Teardown {
            stopped: self.stopped.clone(),
        }
    }

    /// Whether the session was destroyed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `target`.
    ///
    /// Fails with [`SessionError::SessionClosed`] if the session stops first.
    pub async fn wait_for(&self, target: LifecycleState) -> Result<(), SessionError> {
        let mut state = self.state.clone();
        state
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::SessionClosed)
    }

    /// Fingerprint of the local identity, for out-of-band verification.
    pub fn local_fingerprint(&self) -> Fingerprint {
        self.local_fingerprint
    }
}

/// Completion of [`SessionHandle::destroy`].
///
/// Awaiting it is optional.
#[derive(Debug)]
pub struct Teardown {
    stopped: watch::Receiver<bool>,
}

impl Teardown {
    /// Whether the session task has finished.
    pub fn is_complete(&self) -> bool {
        *self.stopped.borrow() || self.stopped.has_changed().is_err()
    }
}

impl IntoFuture for Teardown {
    type Output = ();
    type IntoFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

    fn into_future(mut self) -> Self::IntoFuture {
        Box::pin(async move {
            // A dropped sender means the task is already gone.
            let _ = self.stopped.wait_for(|stopped| *stopped).await;
        })
    }
}

/// Stream of [`SessionEvent`]s.
///
/// Ends once the session stopped.
#[derive(Debug)]
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<SessionEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Next event, if one is ready.
    pub fn try_next(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next peer message, skipping other events.
    pub async fn next_message(&mut self) -> Option<Vec<u8>> {
        while let Some(event) = self.next().await {
            if let SessionEvent::Message(payload) = event {
                return Some(payload);
            }
        }
        None
    }
}
