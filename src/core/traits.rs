//! Collaborator contracts for cipherlink sessions.
//!
//! A session composes two external collaborators:
//!
//! - an [`EncryptionEngine`], which performs key agreement and turns one
//!   plaintext message into one or more ciphertext fragments (and back);
//! - a [`Transport`], which carries opaque frames to the peer and reports when
//!   each frame has left the local send pipeline.
//!
//! Both report back asynchronously. Engines emit through [`EngineEvents`],
//! transports complete a [`SendReceipt`] per frame and push inbound frames
//! into a [`FrameSink`]. All three funnel into one ordered [`Signal`] stream
//! consumed by the session task, so collaborators never touch session state
//! directly.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::constants::DEFAULT_MAX_FRAGMENT_PAYLOAD;
use super::error::{EngineError, TransportError};
use super::identity::{Fingerprint, IdentityKeypair, InstanceTag};

/// Engine instance counter. Each reset builds a new engine under a new
/// generation; events carrying an older generation are stale.
pub type Generation = u64;

/// Identifies one submission of an application message to an engine. A
/// message replayed after a reset or a peer restart gets a new ticket, so
/// completions for its earlier copy no longer count.
pub type Ticket = u64;

/// Handshake progress reported by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Key exchange (re)started, e.g. because the peer reset.
    Handshaking,
    /// Key exchange completed; the peer fingerprint is available.
    Established,
    /// The peer ended its encrypted session.
    PeerEnded,
}

/// Output of an [`EncryptionEngine`].
#[derive(Debug)]
pub enum EngineEvent {
    /// A wire frame to hand to the transport.
    Fragment(Vec<u8>),
    /// Every fragment of the current `encrypt_and_send` call has been emitted.
    Sealed,
    /// A complete inbound message.
    Decrypted {
        /// Message bytes.
        payload: Vec<u8>,
        /// Whether the message arrived encrypted.
        encrypted: bool,
    },
    /// Handshake progress.
    Status(HandshakeStatus),
    /// A protocol or crypto failure.
    Error(EngineError),
    /// Graceful teardown requested by `end_session` has finished.
    Ended,
}

/// Everything collaborators report back to a session, in arrival order.
#[derive(Debug)]
pub enum Signal {
    /// Engine output, tagged with the emitting engine's generation.
    Engine {
        /// Generation of the emitting engine.
        generation: Generation,
        /// The event.
        event: EngineEvent,
    },
    /// A transport finished with one frame.
    Sent {
        /// Generation the frame was sent under.
        generation: Generation,
        /// Submission the frame belongs to, if it carries an application
        /// message.
        ticket: Option<Ticket>,
        /// Outcome reported by the transport.
        result: Result<(), TransportError>,
    },
    /// A frame received by the transport.
    Inbound(Vec<u8>),
}

/// Emitter handed to an engine at construction.
#[derive(Debug, Clone)]
pub struct EngineEvents {
    generation: Generation,
    tx: mpsc::UnboundedSender<Signal>,
}

impl EngineEvents {
    pub(crate) fn new(generation: Generation, tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the engine owning this emitter.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Emit one event. Events emitted after the session is gone are dropped.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(Signal::Engine {
            generation: self.generation,
            event,
        });
    }
}

/// Completion callback for one frame handed to [`Transport::send`].
///
/// Holds only a weak reference to the session.
#[derive(Debug)]
pub struct SendReceipt {
    generation: Generation,
    ticket: Option<Ticket>,
    tx: mpsc::WeakUnboundedSender<Signal>,
}

impl SendReceipt {
    pub(crate) fn new(
        generation: Generation,
        ticket: Option<Ticket>,
        tx: mpsc::WeakUnboundedSender<Signal>,
    ) -> Self {
        Self {
            generation,
            ticket,
            tx,
        }
    }

    /// Report that the frame left the local pipeline, or why it could not.
    pub fn complete(self, result: Result<(), TransportError>) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(Signal::Sent {
                generation: self.generation,
                ticket: self.ticket,
                result,
            });
        }
    }
}

/// Where a transport pushes frames it receives.
///
/// Holds only a weak reference to the session.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::WeakUnboundedSender<Signal>,
}

impl FrameSink {
    pub(crate) fn new(tx: mpsc::WeakUnboundedSender<Signal>) -> Self {
        Self { tx }
    }

    /// Hand one received frame to the session.
    ///
    /// Fails with [`TransportError::Closed`] once the session is gone, which
    /// tells receive loops to stop.
    pub fn deliver(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let tx = self.tx.upgrade().ok_or(TransportError::Closed)?;
        tx.send(Signal::Inbound(frame))
            .map_err(|_| TransportError::Closed)
    }
}

/// What an engine is constructed with.
#[derive(Debug, Clone)]
pub struct EngineParams {
    /// Local identity key.
    pub identity: Arc<IdentityKeypair>,
    /// Local instance tag, if any.
    pub instance_tag: Option<InstanceTag>,
    /// Refuse to treat unencrypted messages as valid.
    pub require_encryption: bool,
    /// Plaintext bytes per fragment.
    pub max_fragment_payload: usize,
}

impl EngineParams {
    /// Parameters with default policy for the given identity.
    pub fn new(identity: Arc<IdentityKeypair>) -> Self {
        Self {
            identity,
            instance_tag: None,
            require_encryption: true,
            max_fragment_payload: DEFAULT_MAX_FRAGMENT_PAYLOAD,
        }
    }
}

/// Authenticated-encryption session engine.
///
/// Engines never call back into the session; all output goes through the
/// [`EngineEvents`] they were built with. The session submits at most one
/// `encrypt_and_send` at a time, and an engine must emit every fragment of a
/// call, followed by [`EngineEvent::Sealed`], before any fragment of the next.
pub trait EncryptionEngine: Send + 'static {
    /// Start a key exchange with the peer.
    fn initiate(&mut self) -> Result<(), EngineError>;

    /// Encrypt one logical message and emit its fragments.
    fn encrypt_and_send(&mut self, plaintext: &[u8]) -> Result<(), EngineError>;

    /// Feed one frame received from the transport.
    fn receive(&mut self, frame: &[u8]);

    /// Tear down gracefully; must eventually emit [`EngineEvent::Ended`].
    fn end_session(&mut self);

    /// Peer identity; valid only after the handshake succeeded.
    fn peer_fingerprint(&self) -> Option<Fingerprint>;

    /// Peer instance tag, if it announced one.
    fn peer_instance_tag(&self) -> Option<InstanceTag> {
        None
    }
}

/// Builds a fresh engine on construction and on every reset.
pub trait EngineFactory: Send + 'static {
    /// Engine type produced.
    type Engine: EncryptionEngine;

    /// Create an engine bound to `params` that emits through `events`.
    fn create(
        &mut self,
        params: &EngineParams,
        events: EngineEvents,
    ) -> Result<Self::Engine, EngineError>;
}

/// Unreliable point-to-point frame transport.
pub trait Transport: Send + 'static {
    /// Called once before any `send`; inbound frames go to `inbound`.
    fn attach(&mut self, inbound: FrameSink);

    /// Accept one frame and complete `receipt` once it left the local pipeline.
    fn send(&mut self, frame: Vec<u8>, receipt: SendReceipt);

    /// The session is resetting its encrypted channel.
    fn reset(&mut self) {}

    /// The session was destroyed.
    fn close(&mut self) {}
}

/// Collects what collaborators emit, for exercising engines and transports
/// outside a session.
#[derive(Debug)]
pub struct Recorder {
    tx: mpsc::UnboundedSender<Signal>,
    rx: mpsc::UnboundedReceiver<Signal>,
}

impl Recorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Engine emitter feeding this recorder.
    pub fn engine_events(&self, generation: Generation) -> EngineEvents {
        EngineEvents::new(generation, self.tx.clone())
    }

    /// Frame sink feeding this recorder.
    pub fn frame_sink(&self) -> FrameSink {
        FrameSink::new(self.tx.downgrade())
    }

    /// Send receipt feeding this recorder.
    pub fn receipt(&self, generation: Generation, ticket: Option<Ticket>) -> SendReceipt {
        SendReceipt::new(generation, ticket, self.tx.downgrade())
    }

    /// Next collected signal, if one is ready.
    pub fn try_next(&mut self) -> Option<Signal> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next collected signal.
    pub async fn next(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }

    /// Drain every ready engine event, dropping other signals.
    pub fn engine_events_ready(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Some(signal) = self.try_next() {
            if let Signal::Engine { event, .. } = signal {
                events.push(event);
            }
        }
        events
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}
