//! Wire frames exchanged by [`NoiseEngine`](super::NoiseEngine) peers.
//!
//! Every frame starts with a type byte. Handshake and plaintext frames carry
//! their body directly after it; data and close frames are sealed and carry a
//! 16-byte header that doubles as AEAD associated data:
//!
//! ```text
//! +--------+--------+------------------+--------------------+------------------+
//! | Type   | Flags  | Session ID       | Nonce Counter      | Ciphertext + tag |
//! | 1 byte | 1 byte | 6 bytes          | 8 bytes (LE64)     | N + 16 bytes     |
//! +--------+--------+------------------+--------------------+------------------+
//! ```

use crate::core::{
    DATA_FRAME_HEADER_SIZE, FLAG_FIRST_FRAGMENT, FLAG_MORE_FRAGMENTS, FRAME_TYPE_CLOSE,
    FRAME_TYPE_DATA, FRAME_TYPE_HANDSHAKE_FINISH, FRAME_TYPE_HANDSHAKE_INIT,
    FRAME_TYPE_HANDSHAKE_RESP, FRAME_TYPE_PLAINTEXT, FrameError, HASH_SIZE, MIN_DATA_FRAME_SIZE,
    SESSION_ID_SIZE,
};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Handshake initiation (`-> e`).
    HandshakeInit = FRAME_TYPE_HANDSHAKE_INIT,
    /// Handshake response (`<- e, ee, s, es`).
    HandshakeResp = FRAME_TYPE_HANDSHAKE_RESP,
    /// Encrypted message fragment.
    Data = FRAME_TYPE_DATA,
    /// Handshake completion (`-> s, se`).
    HandshakeFinish = FRAME_TYPE_HANDSHAKE_FINISH,
    /// Graceful session end.
    Close = FRAME_TYPE_CLOSE,
    /// Unencrypted message.
    Plaintext = FRAME_TYPE_PLAINTEXT,
}

impl FrameType {
    /// Parse frame type from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            FRAME_TYPE_HANDSHAKE_INIT => Some(Self::HandshakeInit),
            FRAME_TYPE_HANDSHAKE_RESP => Some(Self::HandshakeResp),
            FRAME_TYPE_DATA => Some(Self::Data),
            FRAME_TYPE_HANDSHAKE_FINISH => Some(Self::HandshakeFinish),
            FRAME_TYPE_CLOSE => Some(Self::Close),
            FRAME_TYPE_PLAINTEXT => Some(Self::Plaintext),
            _ => None,
        }
    }

    /// Convert frame type to its byte representation.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Session identifier (6 bytes), taken from the handshake hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; SESSION_ID_SIZE]);

impl SessionId {
    /// Create a session ID from bytes.
    pub fn from_bytes(bytes: [u8; SESSION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Derive the session ID from a handshake hash.
    pub fn from_handshake_hash(hash: &[u8; HASH_SIZE]) -> Self {
        let mut id = [0u8; SESSION_ID_SIZE];
        id.copy_from_slice(&hash[..SESSION_ID_SIZE]);
        Self(id)
    }

    /// Get the session ID as bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.0
    }
}

/// Header of a sealed (data or close) frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedHeader {
    /// Either [`FrameType::Data`] or [`FrameType::Close`].
    pub frame_type: FrameType,
    /// Frame flags.
    pub flags: u8,
    /// Session the frame belongs to.
    pub session_id: SessionId,
    /// Per-direction counter (nonce input).
    pub nonce_counter: u64,
}

impl SealedHeader {
    /// Whether more fragments of the same message follow.
    pub fn has_more_fragments(&self) -> bool {
        self.flags & FLAG_MORE_FRAGMENTS != 0
    }

    /// Whether this fragment opens a message.
    pub fn is_first_fragment(&self) -> bool {
        self.flags & FLAG_FIRST_FRAGMENT != 0
    }

    /// Serialize header to bytes (16 bytes).
    pub fn to_bytes(&self) -> [u8; DATA_FRAME_HEADER_SIZE] {
        let mut buf = [0u8; DATA_FRAME_HEADER_SIZE];
        buf[0] = self.frame_type.as_byte();
        buf[1] = self.flags;
        buf[2..8].copy_from_slice(self.session_id.as_bytes());
        buf[8..16].copy_from_slice(&self.nonce_counter.to_le_bytes());
        buf
    }

    /// Header followed by `ciphertext`.
    pub fn encode(&self, ciphertext: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(DATA_FRAME_HEADER_SIZE + ciphertext.len());
        buf.extend_from_slice(&self.to_bytes());
        buf.extend_from_slice(ciphertext);
        buf
    }

    fn parse(frame_type: FrameType, bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < MIN_DATA_FRAME_SIZE {
            return Err(FrameError::TooShort {
                expected: MIN_DATA_FRAME_SIZE,
                actual: bytes.len(),
            });
        }

        let flags = bytes[1];
        let allowed = match frame_type {
            FrameType::Data => FLAG_MORE_FRAGMENTS | FLAG_FIRST_FRAGMENT,
            _ => 0,
        };
        if flags & !allowed != 0 {
            return Err(FrameError::InvalidFlags(flags));
        }

        let mut session_id = [0u8; SESSION_ID_SIZE];
        session_id.copy_from_slice(&bytes[2..8]);
        let mut counter = [0u8; 8];
        counter.copy_from_slice(&bytes[8..16]);

        Ok(Self {
            frame_type,
            flags,
            session_id: SessionId(session_id),
            nonce_counter: u64::from_le_bytes(counter),
        })
    }
}

/// A parsed wire frame borrowing from the received bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Noise message 1.
    HandshakeInit(&'a [u8]),
    /// Noise message 2.
    HandshakeResp(&'a [u8]),
    /// Noise message 3.
    HandshakeFinish(&'a [u8]),
    /// Data or close frame.
    Sealed {
        /// Authenticated header.
        header: SealedHeader,
        /// Ciphertext with tag.
        ciphertext: &'a [u8],
    },
    /// Unencrypted message body.
    Plaintext(&'a [u8]),
}

impl<'a> Frame<'a> {
    /// Parse one frame.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FrameError> {
        let (&type_byte, body) = bytes.split_first().ok_or(FrameError::TooShort {
            expected: 1,
            actual: 0,
        })?;
        let frame_type = FrameType::from_byte(type_byte).ok_or(FrameError::InvalidType(type_byte))?;

        Ok(match frame_type {
            FrameType::HandshakeInit => Frame::HandshakeInit(body),
            FrameType::HandshakeResp => Frame::HandshakeResp(body),
            FrameType::HandshakeFinish => Frame::HandshakeFinish(body),
            FrameType::Plaintext => Frame::Plaintext(body),
            FrameType::Data | FrameType::Close => Frame::Sealed {
                header: SealedHeader::parse(frame_type, bytes)?,
                ciphertext: &bytes[DATA_FRAME_HEADER_SIZE..],
            },
        })
    }

    /// Frame type of this frame.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::HandshakeInit(_) => FrameType::HandshakeInit,
            Frame::HandshakeResp(_) => FrameType::HandshakeResp,
            Frame::HandshakeFinish(_) => FrameType::HandshakeFinish,
            Frame::Sealed { header, .. } => header.frame_type,
            Frame::Plaintext(_) => FrameType::Plaintext,
        }
    }
}

/// Prefix `body` with a frame type byte.
pub fn encode_unsealed(frame_type: FrameType, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + body.len());
    buf.push(frame_type.as_byte());
    buf.extend_from_slice(body);
    buf
}
