//! Noise_XX based [`EncryptionEngine`].
//!
//! One engine instance carries exactly one handshake and the session it
//! produces. The session layer never mutates an engine across a reset; it
//! ends it and asks [`NoiseEngineFactory`] for a new one.
//!
//! Frame flow:
//!
//! ```text
//! initiator                         responder
//!   INIT     (-> e)           ───►
//!                             ◄───  RESP   (<- e, ee, s, es, tag)
//!   FINISH   (-> s, se, tag)  ───►
//!   DATA*    (sealed chunks)  ◄──►  DATA*
//!   CLOSE    (sealed, empty)  ───►
//! ```

use std::mem;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::core::{
    CryptoError, EncryptionEngine, EngineError, EngineEvent, EngineEvents, EngineFactory,
    EngineParams, FLAG_FIRST_FRAGMENT, FLAG_MORE_FRAGMENTS, Fingerprint, HandshakeStatus,
    INSTANCE_TAG_SIZE, IdentityKeypair, InstanceTag, PUBLIC_KEY_SIZE, REORDER_WINDOW,
};

use super::{
    CryptoSession, Frame, FrameType, Handshake, HandshakeResult, Reassembled, Reassembly,
    SealedHeader, SessionId, encode_unsealed,
};

enum Phase {
    /// No handshake in progress.
    Idle,
    /// Sent INIT, waiting for RESP.
    Initiating {
        handshake: Handshake,
        ephemeral: [u8; PUBLIC_KEY_SIZE],
    },
    /// Sent RESP, waiting for FINISH.
    Responding { handshake: Handshake },
    Established(Box<CryptoSession>),
    Ended,
}

#[derive(Debug, Clone, Copy)]
struct PeerIdentity {
    fingerprint: Fingerprint,
    instance_tag: Option<InstanceTag>,
}

/// Noise_XX engine with XChaCha20-Poly1305 fragments.
pub struct NoiseEngine {
    identity: Arc<IdentityKeypair>,
    instance_tag: Option<InstanceTag>,
    require_encryption: bool,
    max_fragment_payload: usize,
    events: EngineEvents,
    phase: Phase,
    peer: Option<PeerIdentity>,
    reassembly: Reassembly,
}

impl NoiseEngine {
    /// Create an idle engine.
    pub fn new(params: &EngineParams, events: EngineEvents) -> Self {
        Self {
            identity: Arc::clone(&params.identity),
            instance_tag: params.instance_tag,
            require_encryption: params.require_encryption,
            max_fragment_payload: params.max_fragment_payload.max(1),
            events,
            phase: Phase::Idle,
            peer: None,
            reassembly: Reassembly::new(REORDER_WINDOW),
        }
    }

    /// Whether a session is currently established.
    pub fn is_established(&self) -> bool {
        matches!(self.phase, Phase::Established(_))
    }

    /// ID of the established session.
    pub fn session_id(&self) -> Option<SessionId> {
        match &self.phase {
            Phase::Established(session) => Some(*session.session_id()),
            _ => None,
        }
    }

    fn emit_frame(&self, frame: Vec<u8>) {
        self.events.emit(EngineEvent::Fragment(frame));
    }

    fn report(&self, error: EngineError) {
        warn!(generation = self.events.generation(), %error, "engine error");
        self.events.emit(EngineEvent::Error(error));
    }

    fn forget_peer(&mut self) {
        self.peer = None;
        self.reassembly = Reassembly::new(REORDER_WINDOW);
    }

    fn handshake_payload(&self) -> [u8; INSTANCE_TAG_SIZE] {
        InstanceTag::encode(self.instance_tag)
    }

    fn on_init(&mut self, message: &[u8]) {
        let generation = self.events.generation();
        match &self.phase {
            Phase::Ended => return,
            Phase::Initiating { ephemeral, .. } => {
                // Lower INIT ephemeral yields and answers as responder.
                let theirs = message.get(..PUBLIC_KEY_SIZE);
                if theirs.is_some_and(|theirs| ephemeral.as_slice() > theirs) {
                    debug!(generation, "simultaneous init, keeping ours");
                    return;
                }
                debug!(generation, "simultaneous init, answering peer");
            }
            Phase::Established(_) => {
                info!(generation, "peer restarted the handshake");
                self.forget_peer();
                self.events
                    .emit(EngineEvent::Status(HandshakeStatus::Handshaking));
            }
            Phase::Idle | Phase::Responding { .. } => {}
        }

        self.phase = Phase::Idle;
        if let Err(error) = self.respond(message) {
            self.report(error);
        }
    }

    fn respond(&mut self, init: &[u8]) -> Result<(), EngineError> {
        let mut handshake = Handshake::responder(&self.identity)?;
        handshake.read_message(init)?;
        let resp = handshake.write_message(&self.handshake_payload())?;

        self.phase = Phase::Responding { handshake };
        self.emit_frame(encode_unsealed(FrameType::HandshakeResp, &resp));
        Ok(())
    }

    fn on_resp(&mut self, message: &[u8]) -> Result<(), EngineError> {
        let mut handshake = match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Initiating { handshake, .. } => handshake,
            other => {
                self.phase = other;
                debug!(
                    generation = self.events.generation(),
                    "dropping unexpected handshake response"
                );
                return Ok(());
            }
        };

        let payload = handshake.read_message(message)?;
        let finish = handshake.write_message(&self.handshake_payload())?;
        let result = handshake.finish()?;

        self.emit_frame(encode_unsealed(FrameType::HandshakeFinish, &finish));
        self.complete(&result, InstanceTag::decode(&payload))
    }

    fn on_finish(&mut self, message: &[u8]) -> Result<(), EngineError> {
        let mut handshake = match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Responding { handshake } => handshake,
            other => {
                self.phase = other;
                debug!(
                    generation = self.events.generation(),
                    "dropping unexpected handshake finish"
                );
                return Ok(());
            }
        };

        let payload = handshake.read_message(message)?;
        let result = handshake.finish()?;
        self.complete(&result, InstanceTag::decode(&payload))
    }

    fn complete(
        &mut self,
        result: &HandshakeResult,
        peer_tag: Option<InstanceTag>,
    ) -> Result<(), EngineError> {
        let session = CryptoSession::establish(result)?;
        let fingerprint = Fingerprint::of(&result.remote_static);

        info!(
            generation = self.events.generation(),
            session_id = %hex::encode(session.session_id().as_bytes()),
            role = ?result.role,
            peer = %fingerprint,
            "session established"
        );

        self.reassembly = Reassembly::new(REORDER_WINDOW);
        self.peer = Some(PeerIdentity {
            fingerprint,
            instance_tag: peer_tag,
        });
        self.phase = Phase::Established(Box::new(session));
        self.events
            .emit(EngineEvent::Status(HandshakeStatus::Established));
        Ok(())
    }

    fn on_sealed(&mut self, header: SealedHeader, ciphertext: &[u8]) {
        let generation = self.events.generation();
        let Phase::Established(session) = &mut self.phase else {
            debug!(generation, frame_type = ?header.frame_type, "dropping sealed frame outside a session");
            return;
        };
        if header.session_id != *session.session_id() {
            debug!(
                generation,
                session_id = %hex::encode(header.session_id.as_bytes()),
                "dropping frame from another session"
            );
            return;
        }

        let plaintext = match session.open(&header, ciphertext) {
            Ok(plaintext) => plaintext,
            Err(CryptoError::ReplayDetected) => {
                debug!(generation, counter = header.nonce_counter, "dropping replayed frame");
                return;
            }
            Err(error) => {
                self.report(error.into());
                return;
            }
        };

        if header.frame_type == FrameType::Close {
            info!(generation, "peer ended the session");
            self.phase = Phase::Idle;
            self.forget_peer();
            self.events
                .emit(EngineEvent::Status(HandshakeStatus::PeerEnded));
            return;
        }

        let Reassembled {
            messages,
            discarded,
        } = self
            .reassembly
            .push(header.nonce_counter, header.flags, plaintext);
        if discarded > 0 {
            warn!(
                generation,
                discarded,
                counter = header.nonce_counter,
                "dropping fragments of a message that cannot complete"
            );
        }
        for payload in messages {
            trace!(generation, bytes = payload.len(), "message reassembled");
            self.events.emit(EngineEvent::Decrypted {
                payload,
                encrypted: true,
            });
        }
    }
}

impl EncryptionEngine for NoiseEngine {
    fn initiate(&mut self) -> Result<(), EngineError> {
        if matches!(self.phase, Phase::Ended) {
            return Err(EngineError::Ended);
        }

        let mut handshake = Handshake::initiator(&self.identity)?;
        let init = handshake.write_message(&[])?;
        let ephemeral: [u8; PUBLIC_KEY_SIZE] = init
            .get(..PUBLIC_KEY_SIZE)
            .and_then(|e| e.try_into().ok())
            .ok_or_else(|| CryptoError::HandshakeFailed("short handshake init".into()))?;

        debug!(generation = self.events.generation(), "initiating handshake");
        self.forget_peer();
        self.phase = Phase::Initiating {
            handshake,
            ephemeral,
        };
        self.emit_frame(encode_unsealed(FrameType::HandshakeInit, &init));
        Ok(())
    }

    fn encrypt_and_send(&mut self, plaintext: &[u8]) -> Result<(), EngineError> {
        let frames = match &mut self.phase {
            Phase::Established(session) => {
                let pieces: Vec<&[u8]> = if plaintext.is_empty() {
                    vec![plaintext]
                } else {
                    plaintext.chunks(self.max_fragment_payload).collect()
                };
                let last = pieces.len() - 1;

                let mut frames = Vec::with_capacity(pieces.len());
                for (index, piece) in pieces.into_iter().enumerate() {
                    let mut flags = if index < last { FLAG_MORE_FRAGMENTS } else { 0 };
                    if index == 0 {
                        flags |= FLAG_FIRST_FRAGMENT;
                    }
                    frames.push(session.seal(FrameType::Data, flags, piece)?);
                }
                frames
            }
            Phase::Ended => return Err(EngineError::Ended),
            _ if !self.require_encryption => {
                vec![encode_unsealed(FrameType::Plaintext, plaintext)]
            }
            _ => return Err(EngineError::NotEstablished),
        };

        debug!(
            generation = self.events.generation(),
            bytes = plaintext.len(),
            fragments = frames.len(),
            "message sealed"
        );
        for frame in frames {
            self.emit_frame(frame);
        }
        self.events.emit(EngineEvent::Sealed);
        Ok(())
    }

    fn receive(&mut self, frame: &[u8]) {
        let generation = self.events.generation();
        if matches!(self.phase, Phase::Ended) {
            trace!(generation, "dropping frame after end");
            return;
        }

        let parsed = match Frame::parse(frame) {
            Ok(parsed) => parsed,
            Err(error) => {
                self.report(error.into());
                return;
            }
        };
        trace!(generation, frame_type = ?parsed.frame_type(), len = frame.len(), "frame received");

        let outcome = match parsed {
            Frame::HandshakeInit(message) => {
                self.on_init(message);
                Ok(())
            }
            Frame::HandshakeResp(message) => self.on_resp(message),
            Frame::HandshakeFinish(message) => self.on_finish(message),
            Frame::Sealed { header, ciphertext } => {
                self.on_sealed(header, ciphertext);
                Ok(())
            }
            Frame::Plaintext(body) => {
                self.events.emit(EngineEvent::Decrypted {
                    payload: body.to_vec(),
                    encrypted: false,
                });
                Ok(())
            }
        };
        if let Err(error) = outcome {
            self.report(error);
        }
    }

    fn end_session(&mut self) {
        let generation = self.events.generation();
        if let Phase::Established(session) = &mut self.phase {
            match session.seal(FrameType::Close, 0, &[]) {
                Ok(close) => self.events.emit(EngineEvent::Fragment(close)),
                Err(error) => warn!(generation, %error, "could not seal close frame"),
            }
        }

        // Dropping the session zeroizes its keys.
        self.phase = Phase::Ended;
        self.forget_peer();
        debug!(generation, "engine ended");
        self.events.emit(EngineEvent::Ended);
    }

    fn peer_fingerprint(&self) -> Option<Fingerprint> {
        self.peer.map(|peer| peer.fingerprint)
    }

    fn peer_instance_tag(&self) -> Option<InstanceTag> {
        self.peer.and_then(|peer| peer.instance_tag)
    }
}

/// Builds a fresh [`NoiseEngine`] per session generation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoiseEngineFactory;

impl EngineFactory for NoiseEngineFactory {
    type Engine = NoiseEngine;

    fn create(
        &mut self,
        params: &EngineParams,
        events: EngineEvents,
    ) -> Result<NoiseEngine, EngineError> {
        Ok(NoiseEngine::new(params, events))
    }
}
