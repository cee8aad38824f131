//! Nonce construction for XChaCha20-Poly1305
//!
//! Nonces are 24 bytes:
//! - Reserved (4 bytes, zero)
//! - Direction (1 byte): 0x00 = Initiator→Responder, 0x01 = Responder→Initiator
//! - Zeros (11 bytes)
//! - Counter (8 bytes)
//!
//! Every handshake derives fresh keys, so the counter never repeats under a key.

use crate::core::{AEAD_NONCE_SIZE, NONCE_DIR_INITIATOR, NONCE_DIR_RESPONDER};

/// Direction of communication for nonce construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Initiator → Responder (0x00)
    InitiatorToResponder,
    /// Responder → Initiator (0x01)
    ResponderToInitiator,
}

impl Direction {
    /// Get the byte representation.
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::InitiatorToResponder => NONCE_DIR_INITIATOR,
            Direction::ResponderToInitiator => NONCE_DIR_RESPONDER,
        }
    }

    /// Get the opposite direction.
    pub fn opposite(self) -> Self {
        match self {
            Direction::InitiatorToResponder => Direction::ResponderToInitiator,
            Direction::ResponderToInitiator => Direction::InitiatorToResponder,
        }
    }
}

/// Construct a 24-byte XChaCha20-Poly1305 nonce.
///
/// Layout:
/// ```text
/// [ reserved (4) | direction (1) | zeros (11) | counter (8) ]
/// ```
pub fn construct_nonce(direction: Direction, counter: u64) -> [u8; AEAD_NONCE_SIZE] {
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce[4] = direction.as_byte();
    nonce[16..24].copy_from_slice(&counter.to_le_bytes());
    nonce
}
