//! Directional XChaCha20-Poly1305 keys.
//!
//! A sealed frame authenticates its own wire header: the AAD is the 16 bytes
//! of [`SealedHeader::to_bytes`], so type, flags, session and counter cannot
//! be altered without failing the tag.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::{AEAD_NONCE_SIZE, AEAD_TAG_SIZE, CryptoError};

use super::SealedHeader;

/// Key length for XChaCha20-Poly1305.
pub const SESSION_KEY_SIZE: usize = 32;

/// One direction's traffic key. Wiped when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(key: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new((&self.0).into())
    }

    /// Encrypt `plaintext` for `header`; returns ciphertext followed by the tag.
    pub fn seal(
        &self,
        nonce: &[u8; AEAD_NONCE_SIZE],
        header: &SealedHeader,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let aad = header.to_bytes();
        self.cipher()
            .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad: &aad })
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Verify and decrypt a sealed body received under `header`.
    pub fn open(
        &self,
        nonce: &[u8; AEAD_NONCE_SIZE],
        header: &SealedHeader,
        sealed: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < AEAD_TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let aad = header.to_bytes();
        self.cipher()
            .decrypt(XNonce::from_slice(nonce), Payload { msg: sealed, aad: &aad })
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FLAG_MORE_FRAGMENTS;
    use crate::crypto::{FrameType, SessionId};

    const NONCE: [u8; AEAD_NONCE_SIZE] = [0x01; AEAD_NONCE_SIZE];

    fn header(counter: u64) -> SealedHeader {
        SealedHeader {
            frame_type: FrameType::Data,
            flags: 0,
            session_id: SessionId::from_bytes([7; 6]),
            nonce_counter: counter,
        }
    }

    #[test]
    fn test_open_returns_what_was_sealed() {
        let key = SessionKey::from_bytes([0x42; SESSION_KEY_SIZE]);
        let sealed = key.seal(&NONCE, &header(3), b"hey").unwrap();
        assert_eq!(sealed.len(), 3 + AEAD_TAG_SIZE);
        assert_eq!(key.open(&NONCE, &header(3), &sealed).unwrap(), b"hey");

        let empty = key.seal(&NONCE, &header(4), b"").unwrap();
        assert_eq!(empty.len(), AEAD_TAG_SIZE);
        assert!(key.open(&NONCE, &header(4), &empty).unwrap().is_empty());
    }

    #[test]
    fn test_header_is_authenticated() {
        let key = SessionKey::from_bytes([0x42; SESSION_KEY_SIZE]);
        let sealed = key.seal(&NONCE, &header(3), b"payload").unwrap();

        let mut flipped = header(3);
        flipped.flags = FLAG_MORE_FRAGMENTS;
        assert!(matches!(
            key.open(&NONCE, &flipped, &sealed),
            Err(CryptoError::DecryptionFailed)
        ));
        assert!(matches!(
            key.open(&NONCE, &header(4), &sealed),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_key_or_short_body_fails() {
        let key = SessionKey::from_bytes([0x42; SESSION_KEY_SIZE]);
        let other = SessionKey::from_bytes([0x43; SESSION_KEY_SIZE]);
        let sealed = key.seal(&NONCE, &header(0), b"secret").unwrap();

        assert!(other.open(&NONCE, &header(0), &sealed).is_err());
        assert!(key.open(&NONCE, &header(0), &[0; AEAD_TAG_SIZE - 1]).is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let key = SessionKey::from_bytes([0x42; SESSION_KEY_SIZE]);
        assert!(!format!("{key:?}").contains("42"));
    }
}
