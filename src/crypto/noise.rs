//! Noise_XX handshake implementation
//!
//! Peers do not need each other's static key up front, so sessions use the
//! Noise_XX pattern for mutual authentication with trust-on-first-use:
//!
//! ```text
//! Noise_XX(s, rs):
//!   -> e                    # INIT: initiator ephemeral
//!   <- e, ee, s, es         # RESP: responder ephemeral + encrypted static
//!   -> s, se                # FINISH: initiator encrypted static
//! ```
//!
//! After the handshake both parties derive session keys using HKDF.

use hkdf::Hkdf;
use sha2::Sha256;
use snow::{Builder, HandshakeState, params::NoiseParams};
use zeroize::Zeroize;

use crate::core::{CryptoError, HASH_SIZE, IdentityKeypair, MAX_NOISE_MESSAGE, PUBLIC_KEY_SIZE};

use super::{SESSION_KEY_SIZE, SessionKey};

/// Noise protocol pattern for cipherlink sessions.
const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_BLAKE2s";

/// HKDF label for the directional session keys.
const SESSION_KEY_LABEL: &[u8] = b"cipherlink v1 session keys";

/// Role in the handshake (affects which key is used for send/receive)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Sent the INIT frame.
    Initiator,
    /// Answered the peer's INIT frame.
    Responder,
}

/// Result of a completed handshake
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    /// Our role in the exchange.
    pub role: Role,
    /// The handshake hash (used for key derivation and the session ID)
    pub handshake_hash: [u8; HASH_SIZE],
    /// The peer's authenticated static public key.
    pub remote_static: [u8; PUBLIC_KEY_SIZE],
}

/// In-progress Noise_XX handshake.
pub struct Handshake {
    state: HandshakeState,
    role: Role,
}

impl Handshake {
    /// Start a handshake as initiator.
    pub fn initiator(identity: &IdentityKeypair) -> Result<Self, CryptoError> {
        Self::build(identity, Role::Initiator)
    }

    /// Start a handshake as responder.
    pub fn responder(identity: &IdentityKeypair) -> Result<Self, CryptoError> {
        Self::build(identity, Role::Responder)
    }

    fn build(identity: &IdentityKeypair, role: Role) -> Result<Self, CryptoError> {
        let params: NoiseParams = NOISE_PATTERN
            .parse()
            .map_err(|e: snow::Error| CryptoError::HandshakeFailed(e.to_string()))?;
        let builder = Builder::new(params).local_private_key(identity.private_key());
        let state = match role {
            Role::Initiator => builder.build_initiator(),
            Role::Responder => builder.build_responder(),
        }
        .map_err(|e| CryptoError::HandshakeFailed(e.to_string()))?;

        Ok(Self { state, role })
    }

    /// Our role in this handshake.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Produce the next handshake message carrying `payload`.
    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut buf = vec![0u8; MAX_NOISE_MESSAGE];
        let len = self
            .state
            .write_message(payload, &mut buf)
            .map_err(|e| CryptoError::HandshakeFailed(e.to_string()))?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Consume the peer's next handshake message and return its payload.
    pub fn read_message(&mut self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut payload = vec![0u8; MAX_NOISE_MESSAGE];
        let len = self
            .state
            .read_message(message, &mut payload)
            .map_err(|e| CryptoError::HandshakeFailed(e.to_string()))?;
        payload.truncate(len);
        Ok(payload)
    }

    /// Whether all three messages have been processed.
    pub fn is_finished(&self) -> bool {
        self.state.is_handshake_finished()
    }

    /// Complete the handshake.
    pub fn finish(self) -> Result<HandshakeResult, CryptoError> {
        let remote = self
            .state
            .get_remote_static()
            .ok_or_else(|| CryptoError::HandshakeFailed("no remote static key".into()))?;
        let mut remote_static = [0u8; PUBLIC_KEY_SIZE];
        remote_static.copy_from_slice(remote);

        // Get the handshake hash BEFORE transitioning to transport mode
        let mut handshake_hash = [0u8; HASH_SIZE];
        handshake_hash.copy_from_slice(self.state.get_handshake_hash());

        // Verify handshake is complete
        let _transport = self
            .state
            .into_transport_mode()
            .map_err(|e| CryptoError::HandshakeFailed(e.to_string()))?;

        Ok(HandshakeResult {
            role: self.role,
            handshake_hash,
            remote_static,
        })
    }
}

/// Session keys derived from the Noise handshake.
///
/// ```text
/// (initiator_key, responder_key) = HKDF-Expand(
///     handshake_hash,
///     "cipherlink v1 session keys",
///     64
/// )
/// ```
pub struct SessionKeys {
    /// Key for initiator → responder messages
    pub initiator_key: SessionKey,
    /// Key for responder → initiator messages
    pub responder_key: SessionKey,
}

impl SessionKeys {
    /// Derive session keys from the handshake result.
    ///
    /// Uses SHA-256 HKDF-Expand with the handshake hash as PRK.
    pub fn derive(result: &HandshakeResult) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::from_prk(&result.handshake_hash)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        let mut key_material = [0u8; 2 * SESSION_KEY_SIZE];
        hk.expand(SESSION_KEY_LABEL, &mut key_material)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;

        let mut initiator_key = [0u8; SESSION_KEY_SIZE];
        let mut responder_key = [0u8; SESSION_KEY_SIZE];
        initiator_key.copy_from_slice(&key_material[..SESSION_KEY_SIZE]);
        responder_key.copy_from_slice(&key_material[SESSION_KEY_SIZE..]);

        key_material.zeroize();

        Ok(Self {
            initiator_key: SessionKey::from_bytes(initiator_key),
            responder_key: SessionKey::from_bytes(responder_key),
        })
    }

    /// Get the send key for the given role.
    pub fn send_key(&self, role: Role) -> &SessionKey {
        match role {
            Role::Initiator => &self.initiator_key,
            Role::Responder => &self.responder_key,
        }
    }

    /// Get the receive key for the given role.
    pub fn recv_key(&self, role: Role) -> &SessionKey {
        match role {
            Role::Initiator => &self.responder_key,
            Role::Responder => &self.initiator_key,
        }
    }
}
