//! Established crypto session with anti-replay protection
//!
//! A [`CryptoSession`] owns the directional keys of one completed handshake
//! and turns plaintext chunks into sealed wire frames (and back). Each
//! direction runs its own nonce counter; received counters pass through a
//! sliding [`ReplayWindow`] before the AEAD tag is even checked.

use crate::core::{CryptoError, REJECT_AFTER_MESSAGES, REPLAY_WINDOW_SIZE};

use super::{
    FrameType, HandshakeResult, Role, SealedHeader, SessionId, SessionKey, SessionKeys,
    nonce::{Direction, construct_nonce},
};

const WINDOW_WORDS: usize = REPLAY_WINDOW_SIZE / 64;

/// Anti-replay sliding window.
///
/// - Window size: 2048 bits
/// - Below window: rejected
/// - Seen counter: rejected
/// - Above highest: window advances
///
/// Bit `n` of the bitmap stands for counter `highest - n`.
pub struct ReplayWindow {
    bitmap: [u64; WINDOW_WORDS],
    highest: u64,
    initialized: bool,
}

impl ReplayWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self {
            bitmap: [0; WINDOW_WORDS],
            highest: 0,
            initialized: false,
        }
    }

    /// Check if a counter is a replay (without updating).
    pub fn is_replay(&self, counter: u64) -> bool {
        if !self.initialized || counter > self.highest {
            return false;
        }
        match Self::slot(self.highest - counter) {
            Some((word, mask)) => self.bitmap[word] & mask != 0,
            None => true,
        }
    }

    /// Check a counter and record it.
    ///
    /// Returns `Err(ReplayDetected)` if it was seen already or fell below the
    /// window.
    pub fn check_and_update(&mut self, counter: u64) -> Result<(), CryptoError> {
        if !self.initialized {
            self.initialized = true;
            self.highest = counter;
            self.bitmap[0] = 1;
            return Ok(());
        }

        if counter > self.highest {
            self.advance(counter - self.highest);
            self.highest = counter;
            self.bitmap[0] |= 1;
            return Ok(());
        }

        let (word, mask) =
            Self::slot(self.highest - counter).ok_or(CryptoError::ReplayDetected)?;
        if self.bitmap[word] & mask != 0 {
            return Err(CryptoError::ReplayDetected);
        }
        self.bitmap[word] |= mask;
        Ok(())
    }

    /// Forget every recorded counter.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn slot(distance: u64) -> Option<(usize, u64)> {
        (distance < REPLAY_WINDOW_SIZE as u64)
            .then(|| ((distance / 64) as usize, 1u64 << (distance % 64)))
    }

    /// Move every recorded bit `shift` positions towards older counters.
    fn advance(&mut self, shift: u64) {
        if shift >= REPLAY_WINDOW_SIZE as u64 {
            self.bitmap = [0; WINDOW_WORDS];
            return;
        }

        let words = (shift / 64) as usize;
        let bits = (shift % 64) as u32;

        if words > 0 {
            self.bitmap.copy_within(..WINDOW_WORDS - words, words);
            self.bitmap[..words].fill(0);
        }

        if bits > 0 {
            let mut carry = 0u64;
            for word in self.bitmap.iter_mut() {
                let spill = *word >> (64 - bits);
                *word = (*word << bits) | carry;
                carry = spill;
            }
        }
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Keys and counters of one completed handshake.
pub struct CryptoSession {
    session_id: SessionId,
    role: Role,
    send_key: SessionKey,
    recv_key: SessionKey,
    send_counter: u64,
    replay_window: ReplayWindow,
}

impl CryptoSession {
    /// Derive a session from a finished handshake.
    pub fn establish(result: &HandshakeResult) -> Result<Self, CryptoError> {
        let keys = SessionKeys::derive(result)?;
        Ok(Self::new(
            SessionId::from_handshake_hash(&result.handshake_hash),
            result.role,
            keys.send_key(result.role).clone(),
            keys.recv_key(result.role).clone(),
        ))
    }

    /// Create a session from explicit keys.
    pub fn new(session_id: SessionId, role: Role, send_key: SessionKey, recv_key: SessionKey) -> Self {
        Self {
            session_id,
            role,
            send_key,
            recv_key,
            send_counter: 0,
            replay_window: ReplayWindow::new(),
        }
    }

    /// Get the session ID.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Get our role.
    pub fn role(&self) -> Role {
        self.role
    }

    fn send_direction(&self) -> Direction {
        match self.role {
            Role::Initiator => Direction::InitiatorToResponder,
            Role::Responder => Direction::ResponderToInitiator,
        }
    }

    /// Seal `plaintext` into a complete wire frame.
    pub fn seal(
        &mut self,
        frame_type: FrameType,
        flags: u8,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if self.send_counter >= REJECT_AFTER_MESSAGES {
            return Err(CryptoError::CounterExhaustion);
        }
        let counter = self.send_counter;
        self.send_counter += 1;

        let header = SealedHeader {
            frame_type,
            flags,
            session_id: self.session_id,
            nonce_counter: counter,
        };
        let nonce = construct_nonce(self.send_direction(), counter);
        let ciphertext = self.send_key.seal(&nonce, &header, plaintext)?;

        Ok(header.encode(&ciphertext))
    }

    /// Open a sealed frame addressed to this session.
    ///
    /// The replay check runs before AEAD verification; the window is only
    /// updated once the tag verified.
    pub fn open(&mut self, header: &SealedHeader, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.replay_window.is_replay(header.nonce_counter) {
            return Err(CryptoError::ReplayDetected);
        }

        let nonce = construct_nonce(self.send_direction().opposite(), header.nonce_counter);
        let plaintext = self.recv_key.open(&nonce, header, ciphertext)?;

        self.replay_window.check_and_update(header.nonce_counter)?;
        Ok(plaintext)
    }
}
