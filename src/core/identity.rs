//! Long-term identity keys, fingerprints and instance tags.
//!
//! An identity is an X25519 static keypair. Peers compare identities out of
//! band through a [`Fingerprint`], a short stable digest of the public key.

use std::fmt;
use std::str::FromStr;

use blake2::{Blake2s256, Digest};
use rand::{Rng, rngs::OsRng};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use super::constants::{
    FINGERPRINT_SIZE, INSTANCE_TAG_SIZE, MIN_INSTANCE_TAG, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE,
};
use super::error::CryptoError;

/// A static X25519 keypair for long-term identity.
///
/// The private key is zeroized on drop.
#[derive(Clone)]
pub struct IdentityKeypair {
    private: [u8; PRIVATE_KEY_SIZE],
    public: [u8; PUBLIC_KEY_SIZE],
}

impl IdentityKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self::from_secret(&secret)
    }

    /// Rebuild a keypair from its private half.
    pub fn from_private(mut private: [u8; PRIVATE_KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(private);
        private.zeroize();
        Self::from_secret(&secret)
    }

    /// Parse a hex-encoded private key.
    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let mut bytes = hex::decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let result = <[u8; PRIVATE_KEY_SIZE]>::try_from(bytes.as_slice())
            .map(Self::from_private)
            .map_err(|_| {
                CryptoError::InvalidKey(format!(
                    "expected {PRIVATE_KEY_SIZE} bytes, got {}",
                    bytes.len()
                ))
            });
        bytes.zeroize();
        result
    }

    fn from_secret(secret: &StaticSecret) -> Self {
        let public = PublicKey::from(secret);
        Self {
            private: secret.to_bytes(),
            public: public.to_bytes(),
        }
    }

    /// Get the public key.
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public
    }

    /// Get the private key.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn private_key(&self) -> &[u8; PRIVATE_KEY_SIZE] {
        &self.private
    }

    /// Fingerprint of the public key.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.public)
    }
}

impl Drop for IdentityKeypair {
    fn drop(&mut self) {
        self.private.zeroize();
    }
}

impl fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeypair")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Short, stable digest of a public identity key.
///
/// Displayed as 40 upper-case hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    /// Fingerprint of a public key: the first 20 bytes of BLAKE2s-256.
    pub fn of(public_key: &[u8; PUBLIC_KEY_SIZE]) -> Self {
        let digest = Blake2s256::digest(public_key);
        let mut bytes = [0u8; FINGERPRINT_SIZE];
        bytes.copy_from_slice(&digest[..FINGERPRINT_SIZE]);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; FINGERPRINT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl FromStr for Fingerprint {
    type Err = CryptoError;

    /// Parses hex, ignoring whitespace and case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = hex::decode(&compact).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        <[u8; FINGERPRINT_SIZE]>::try_from(bytes.as_slice())
            .map(Self)
            .map_err(|_| {
                CryptoError::InvalidKey(format!(
                    "fingerprint must be {FINGERPRINT_SIZE} bytes, got {}",
                    bytes.len()
                ))
            })
    }
}

/// Per-client instance tag, distinguishing several clients sharing one
/// identity key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceTag(u32);

impl InstanceTag {
    /// Create a tag, rejecting the reserved range below `0x100`.
    pub fn new(value: u32) -> Option<Self> {
        (value >= MIN_INSTANCE_TAG).then_some(Self(value))
    }

    /// Generate a random valid tag.
    pub fn generate() -> Self {
        Self(OsRng.gen_range(MIN_INSTANCE_TAG..=u32::MAX))
    }

    /// Raw tag value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// Encode an optional tag for a handshake payload (0 = no tag).
    pub fn encode(tag: Option<Self>) -> [u8; INSTANCE_TAG_SIZE] {
        tag.map_or(0, |t| t.0).to_le_bytes()
    }

    /// Decode a handshake payload; absent, short or reserved values mean no tag.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let bytes = payload.get(..INSTANCE_TAG_SIZE)?;
        let mut raw = [0u8; INSTANCE_TAG_SIZE];
        raw.copy_from_slice(bytes);
        Self::new(u32::from_le_bytes(raw))
    }
}

impl fmt::Display for InstanceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
