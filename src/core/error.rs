//! Error types for cipherlink sessions.

use std::io;

use thiserror::Error;

/// Errors in the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// Nonce counter exhausted - session must terminate.
    #[error("nonce counter exhausted - session must terminate")]
    CounterExhaustion,

    /// Replay detected.
    #[error("replay detected")]
    ReplayDetected,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// Key material could not be parsed.
    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// Errors decoding a wire frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame is shorter than its header requires.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum size for this frame type.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// Unknown frame type byte.
    #[error("invalid frame type: {0:#04x}")]
    InvalidType(u8),

    /// Reserved flag bits were set.
    #[error("invalid frame flags: {0:#04x}")]
    InvalidFlags(u8),
}

/// Errors reported by an encryption engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Malformed frame.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Tried to encrypt before the handshake completed.
    #[error("session not established")]
    NotEstablished,

    /// The engine has already been torn down.
    #[error("engine ended")]
    Ended,
}

/// Errors reported by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error (socket operations).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The transport, or the session it feeds, is closed.
    #[error("transport closed")]
    Closed,

    /// The transport refused or gave up on a frame.
    #[error("frame rejected: {0}")]
    Rejected(String),
}

/// Session-level errors surfaced to the application.
///
/// Only [`SessionError::SessionClosed`] is ever returned synchronously; the
/// other protocol faults arrive as advisory `Error` events while the session
/// recovers by resetting.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The engine failed during or after key exchange.
    #[error("handshake failure: {0}")]
    HandshakeFailure(#[source] EngineError),

    /// A message arrived unencrypted while encryption is required.
    #[error("unexpected plaintext while encryption is required")]
    UnexpectedPlaintext,

    /// The session has been destroyed.
    #[error("session closed")]
    SessionClosed,

    /// The transport failed to send a frame.
    #[error("transport failure: {0}")]
    TransportFailure(#[source] TransportError),

    /// The session was destroyed before the message was confirmed.
    #[error("delivery cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
