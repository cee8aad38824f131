//! cipherlink - Security Layer
//!
//! The in-crate [`EncryptionEngine`](crate::core::EncryptionEngine):
//! - Noise_XX handshake (mutual authentication, trust-on-first-use)
//! - XChaCha20-Poly1305 AEAD over fragmented messages
//! - Counter-ordered reassembly
//! - Nonce construction
//! - Anti-replay protection

mod aead;
mod engine;
mod frame;
mod noise;
mod nonce;
mod reassembly;
mod session;

pub use aead::{SESSION_KEY_SIZE, SessionKey};
pub use engine::{NoiseEngine, NoiseEngineFactory};
pub use frame::{Frame, FrameType, SealedHeader, SessionId, encode_unsealed};
pub use noise::{Handshake, HandshakeResult, Role, SessionKeys};
pub use nonce::{Direction, construct_nonce};
pub use reassembly::{Reassembled, Reassembly};
pub use session::{CryptoSession, ReplayWindow};
