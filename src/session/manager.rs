//! The session task.
//!
//! A [`SessionManager`] owns the queue, the tracker, the reset controller and
//! the live engine, and runs as one tokio task. Handles talk to it over a
//! command channel; engines and transports report over a signal channel. All
//! state changes therefore happen on one task, in arrival order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::core::{
    EncryptionEngine, EngineError, EngineEvent, EngineEvents, EngineFactory, EngineParams,
    FrameSink, Generation, HandshakeStatus, SendReceipt, SessionError, Signal, Ticket,
    Transport, TransportError,
};
use crate::outbound::{DeliveryTracker, OutboundQueue, Progress};

use super::handle::Command;
use super::{
    AfterTeardown, IdentityVerdict, LifecycleState, Origin, ResetController, SessionConfig,
    SessionEvent, SessionEvents, SessionHandle,
};

/// Inbound frames kept while the engine is being replaced.
const MAX_HELD_FRAMES: usize = 256;

/// Composes an [`EncryptionEngine`] and a [`Transport`] into a reliable,
/// ordered, encrypted channel.
pub struct SessionManager<F: EngineFactory, T: Transport> {
    config: SessionConfig,
    params: EngineParams,
    factory: F,
    transport: T,
    engine: Option<F::Engine>,
    retiring: Option<F::Engine>,
    controller: ResetController,
    queue: OutboundQueue,
    tracker: DeliveryTracker,
    held: Vec<Vec<u8>>,
    signals: mpsc::UnboundedSender<Signal>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Sender<LifecycleState>,
    stopped: watch::Sender<bool>,
    closed: Arc<AtomicBool>,
}

impl<F: EngineFactory, T: Transport> SessionManager<F, T> {
    /// Start a session on the current Tokio runtime.
    ///
    /// Builds the first engine, attaches the transport and initiates the
    /// handshake before returning.
    pub fn spawn(
        config: SessionConfig,
        factory: F,
        mut transport: T,
    ) -> Result<(SessionHandle, SessionEvents), SessionError> {
        let runtime = Handle::try_current()
            .map_err(|e| SessionError::Config(format!("no tokio runtime: {e}")))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LifecycleState::Uninitialized);
        let (stopped_tx, stopped_rx) = watch::channel(false);
        let closed = Arc::new(AtomicBool::new(false));
        let local_fingerprint = config.local_fingerprint();
        let controller = ResetController::new(config.teardown_timeout);

        transport.attach(FrameSink::new(signal_tx.downgrade()));

        let mut manager = Self {
            params: config.engine_params(),
            config,
            factory,
            transport,
            engine: None,
            retiring: None,
            controller,
            queue: OutboundQueue::new(),
            tracker: DeliveryTracker::new(),
            held: Vec::new(),
            signals: signal_tx,
            events: event_tx,
            state: state_tx,
            stopped: stopped_tx,
            closed: Arc::clone(&closed),
        };
        manager.start()?;

        let span = info_span!("session", local = %local_fingerprint);
        runtime.spawn(manager.run(command_rx, signal_rx).instrument(span));

        let handle = SessionHandle::new(command_tx, closed, state_rx, stopped_rx, local_fingerprint);
        Ok((handle, SessionEvents::new(event_rx)))
    }

    fn start(&mut self) -> Result<(), SessionError> {
        let Some(generation) = self.controller.start() else {
            return Ok(());
        };
        self.publish_state();
        self.install_engine(generation)
            .map_err(SessionError::HandshakeFailure)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        let mut commands_open = true;

        loop {
            let deadline = self.controller.deadline();
            tokio::select! {
                biased;

                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        commands_open = false;
                        debug!("every handle dropped");
                        self.destroy();
                    }
                },
                Some(signal) = signals.recv() => self.on_signal(signal),
                () = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    warn!(
                        generation = self.controller.generation(),
                        "engine did not confirm teardown in time, proceeding"
                    );
                    self.finish_teardown();
                }
                else => break,
            }

            if self.controller.state().is_terminal() && !self.controller.is_tearing_down() {
                break;
            }
        }

        self.close();
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Send { payload, notifier } => {
                // A rejected notifier resolves its Delivery as cancelled.
                if self.queue.enqueue(payload, Some(notifier)).is_ok() {
                    self.pump();
                }
            }
            Command::Reset => self.begin_reset("requested"),
            Command::Destroy => self.destroy(),
        }
    }

    fn on_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Engine { generation, event } => self.on_engine_event(generation, event),
            Signal::Sent {
                generation,
                ticket,
                result,
            } => self.on_sent(generation, ticket, result),
            Signal::Inbound(frame) => self.on_inbound(frame),
        }
    }

    fn on_inbound(&mut self, frame: Vec<u8>) {
        match self.controller.state() {
            LifecycleState::Destroyed | LifecycleState::Uninitialized => {
                trace!(len = frame.len(), "dropping inbound frame");
            }
            LifecycleState::Resetting => {
                if self.held.len() < MAX_HELD_FRAMES {
                    self.held.push(frame);
                } else {
                    debug!(len = frame.len(), "hold buffer full, dropping inbound frame");
                }
            }
            LifecycleState::Handshaking | LifecycleState::Established => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.receive(&frame);
                }
            }
        }
    }

    fn on_engine_event(&mut self, generation: Generation, event: EngineEvent) {
        match self.controller.origin(generation) {
            Origin::Current => {}
            Origin::Retiring => {
                match event {
                    // Graceful close frames still go out.
                    EngineEvent::Fragment(frame) => {
                        let receipt = self.receipt(generation, None);
                        self.transport.send(frame, receipt);
                    }
                    EngineEvent::Ended => {
                        debug!(generation, "retiring engine ended");
                        self.finish_teardown();
                    }
                    event => trace!(generation, ?event, "discarding event from retiring engine"),
                }
                return;
            }
            Origin::Stale => {
                trace!(generation, "discarding stale engine event");
                return;
            }
        }

        match event {
            EngineEvent::Fragment(frame) => {
                let ticket = if self.queue.in_flight() {
                    self.tracker.register_fragment()
                } else {
                    None
                };
                let receipt = self.receipt(generation, ticket);
                self.transport.send(frame, receipt);
            }
            EngineEvent::Sealed => {
                if self.queue.in_flight() {
                    let progress = self.tracker.seal();
                    self.settle(progress);
                }
            }
            EngineEvent::Decrypted { payload, encrypted } => {
                if !encrypted && self.config.require_encryption {
                    self.fail(SessionError::UnexpectedPlaintext);
                } else {
                    trace!(bytes = payload.len(), encrypted, "message received");
                    self.emit(SessionEvent::Message(payload));
                }
            }
            EngineEvent::Status(HandshakeStatus::Established) => self.on_established(),
            EngineEvent::Status(HandshakeStatus::Handshaking) => {
                self.on_peer_restart("peer restarted the handshake");
            }
            EngineEvent::Status(HandshakeStatus::PeerEnded) => {
                self.on_peer_restart("peer ended the session");
            }
            EngineEvent::Error(error) => self.fail(SessionError::HandshakeFailure(error)),
            EngineEvent::Ended => self.begin_reset("engine ended unprompted"),
        }
    }

    fn on_sent(
        &mut self,
        generation: Generation,
        ticket: Option<Ticket>,
        result: Result<(), TransportError>,
    ) {
        if self.controller.origin(generation) != Origin::Current {
            trace!(generation, "ignoring completion from an old generation");
            return;
        }

        match result {
            Ok(()) => {
                if let Some(ticket) = ticket {
                    let progress = self.tracker.acknowledge(ticket);
                    if progress == Progress::Ignored {
                        trace!(ticket, "ignoring completion for an abandoned submission");
                    }
                    self.settle(progress);
                }
            }
            Err(error) => self.fail(SessionError::TransportFailure(error)),
        }
    }

    fn on_established(&mut self) {
        if !self.controller.establish() {
            return;
        }
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        let Some(fingerprint) = engine.peer_fingerprint() else {
            self.fail(SessionError::HandshakeFailure(EngineError::NotEstablished));
            return;
        };
        let instance_tag = engine.peer_instance_tag();

        info!(
            generation = self.controller.generation(),
            peer = %fingerprint,
            queued = self.queue.len(),
            "session established"
        );
        self.publish_state();
        self.emit(SessionEvent::Established {
            fingerprint,
            instance_tag,
        });

        if let IdentityVerdict::Mismatch { actual, expected } =
            IdentityVerdict::check(self.config.expected_fingerprint, fingerprint)
        {
            warn!(%actual, %expected, "peer identity mismatch");
            self.emit(SessionEvent::IdentityMismatch { actual, expected });
        }

        self.pump();
    }

    /// The peer dropped the channel and will handshake again. The live engine
    /// answers that handshake; whatever was in flight goes out again after.
    fn on_peer_restart(&mut self, reason: &'static str) {
        if !self.controller.rehandshake() {
            return;
        }
        info!(generation = self.controller.generation(), reason, "waiting for peer handshake");
        if self.queue.requeue_in_flight() {
            debug!("in-flight message will be replayed");
        }
        self.tracker.clear();
        self.publish_state();
    }

    /// Submit the head message if nothing is in flight.
    fn pump(&mut self) {
        // Without required encryption the engine sends plaintext until keyed.
        let ready = self.controller.can_send()
            || (!self.config.require_encryption
                && self.controller.state() == LifecycleState::Handshaking);
        if !ready {
            return;
        }
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let queued = self.queue.len();
        let Some(message) = self.queue.submit_next() else {
            return;
        };

        debug!(
            bytes = message.payload().len(),
            attempt = message.submissions(),
            queued,
            "submitting message"
        );
        match engine.encrypt_and_send(message.payload()) {
            Ok(()) => {}
            // The engine lost its keys ahead of the status event that says so.
            Err(EngineError::NotEstablished) => {
                debug!("engine not keyed, waiting for its status");
                self.queue.requeue_in_flight();
                self.tracker.clear();
            }
            Err(error) => {
                self.queue.requeue_in_flight();
                self.fail(SessionError::HandshakeFailure(error));
            }
        }
    }

    fn settle(&mut self, progress: Progress) {
        if let Progress::Resolved { fragments } = progress {
            if let Some(submissions) = self.queue.confirm_head() {
                debug!(fragments, submissions, remaining = self.queue.len(), "delivery confirmed");
            }
            self.pump();
        }
    }

    /// Report a recoverable fault and reset.
    fn fail(&mut self, error: SessionError) {
        warn!(%error, "session fault");
        self.emit(SessionEvent::Error(error));
        self.begin_reset("fault");
    }

    fn begin_reset(&mut self, reason: &'static str) {
        let Some(retiring) = self.controller.begin_reset(Instant::now()) else {
            debug!(reason, "reset coalesced");
            return;
        };
        info!(
            reason,
            generation = retiring,
            queued = self.queue.len(),
            "resetting session"
        );

        if self.queue.requeue_in_flight() {
            debug!("in-flight message will be replayed");
        }
        self.tracker.clear();
        self.publish_state();
        self.transport.reset();
        self.retire_engine();
    }

    fn destroy(&mut self) {
        if !self.controller.destroy(Instant::now()) {
            return;
        }
        self.closed.store(true, Ordering::Release);
        let cancelled = self.queue.close();
        self.tracker.clear();
        self.held.clear();
        info!(cancelled, "destroying session");

        self.publish_state();
        if self.retiring.is_none() {
            self.retire_engine();
        }
    }

    /// Ask the live engine to end; without one, teardown completes at once.
    fn retire_engine(&mut self) {
        match self.engine.take() {
            Some(mut engine) => {
                engine.end_session();
                self.retiring = Some(engine);
            }
            None => self.finish_teardown(),
        }
    }

    fn finish_teardown(&mut self) {
        let Some(next) = self.controller.finish_teardown() else {
            return;
        };
        // Dropping the old engine detaches it for good.
        self.retiring = None;

        if let AfterTeardown::Restart(generation) = next {
            self.publish_state();
            if let Err(error) = self.install_engine(generation) {
                warn!(generation, %error, "could not restart the handshake");
                self.emit(SessionEvent::Error(SessionError::HandshakeFailure(error)));
            }
        }
    }

    /// Build the engine for `generation`, initiate, and replay held frames.
    fn install_engine(&mut self, generation: Generation) -> Result<(), EngineError> {
        let events = EngineEvents::new(generation, self.signals.clone());
        let mut engine = self.factory.create(&self.params, events)?;
        let initiated = engine.initiate();

        let held = std::mem::take(&mut self.held);
        if !held.is_empty() {
            debug!(generation, frames = held.len(), "replaying frames held during reset");
        }
        for frame in &held {
            engine.receive(frame);
        }

        self.engine = Some(engine);
        initiated
    }

    fn receipt(&self, generation: Generation, ticket: Option<Ticket>) -> SendReceipt {
        SendReceipt::new(generation, ticket, self.signals.downgrade())
    }

    fn emit(&self, event: SessionEvent) {
        // The application may have dropped its event stream.
        let _ = self.events.send(event);
    }

    fn publish_state(&self) {
        self.state.send_replace(self.controller.state());
    }

    fn close(mut self) {
        self.transport.close();
        self.publish_state();
        self.stopped.send_replace(true);
        info!(resets = self.controller.resets(), "session closed");
    }
}
