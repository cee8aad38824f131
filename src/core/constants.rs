//! Protocol constants for cipherlink sessions.
//!
//! Wire values are fixed by the frame format and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// XChaCha20 nonce size.
pub const AEAD_NONCE_SIZE: usize = 24;

/// X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 private key size.
pub const PRIVATE_KEY_SIZE: usize = 32;

/// BLAKE2s hash output size.
pub const HASH_SIZE: usize = 32;

/// Identity fingerprint size (truncated BLAKE2s of the public key).
pub const FINGERPRINT_SIZE: usize = 20;

/// Session ID size (48-bit).
pub const SESSION_ID_SIZE: usize = 6;

/// Largest Noise handshake message.
pub const MAX_NOISE_MESSAGE: usize = 65535;

// =============================================================================
// FRAME TYPES
// =============================================================================

/// Handshake initiation (Noise_XX `-> e`).
pub const FRAME_TYPE_HANDSHAKE_INIT: u8 = 0x01;

/// Handshake response (Noise_XX `<- e, ee, s, es`).
pub const FRAME_TYPE_HANDSHAKE_RESP: u8 = 0x02;

/// Encrypted message fragment.
pub const FRAME_TYPE_DATA: u8 = 0x03;

/// Handshake completion (Noise_XX `-> s, se`).
pub const FRAME_TYPE_HANDSHAKE_FINISH: u8 = 0x04;

/// Close frame (graceful termination).
pub const FRAME_TYPE_CLOSE: u8 = 0x05;

/// Unencrypted message.
pub const FRAME_TYPE_PLAINTEXT: u8 = 0x06;

// =============================================================================
// FRAME FLAGS AND SIZES
// =============================================================================

/// More fragments of the same message follow this one.
pub const FLAG_MORE_FRAGMENTS: u8 = 0x01;

/// First fragment of a message.
pub const FLAG_FIRST_FRAGMENT: u8 = 0x02;

/// Data frame header size (type + flags + session_id + counter).
pub const DATA_FRAME_HEADER_SIZE: usize = 16;

/// Minimum data frame size (header + empty payload + tag).
pub const MIN_DATA_FRAME_SIZE: usize = DATA_FRAME_HEADER_SIZE + AEAD_TAG_SIZE;

/// Default plaintext bytes carried by one fragment.
pub const DEFAULT_MAX_FRAGMENT_PAYLOAD: usize = 1200;

/// How far past a missing fragment newer fragments may arrive before the
/// missing one is given up for lost. Must stay below the replay window.
pub const REORDER_WINDOW: u64 = 256;

/// Instance tag carried in handshake payloads (u32 LE).
pub const INSTANCE_TAG_SIZE: usize = 4;

/// Smallest valid instance tag; lower values are reserved.
pub const MIN_INSTANCE_TAG: u32 = 0x100;

// =============================================================================
// SESSION LIFECYCLE
// =============================================================================

/// How long a reset or destroy waits for the old engine to confirm teardown.
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// ANTI-REPLAY AND COUNTERS
// =============================================================================

/// Minimum replay window size in bits.
pub const REPLAY_WINDOW_SIZE: usize = 2048;

/// Hard limit on messages - MUST terminate session.
pub const REJECT_AFTER_MESSAGES: u64 = u64::MAX;

// =============================================================================
// NONCE DIRECTION
// =============================================================================

/// Nonce direction: Initiator -> Responder.
pub const NONCE_DIR_INITIATOR: u8 = 0x00;

/// Nonce direction: Responder -> Initiator.
pub const NONCE_DIR_RESPONDER: u8 = 0x01;
