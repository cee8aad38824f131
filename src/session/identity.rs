//! Peer identity verification.

use crate::core::Fingerprint;

/// Outcome of comparing the handshake fingerprint to the configured one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityVerdict {
    /// No fingerprint was configured; the observed one is trusted.
    FirstUse,
    /// The peer presented the expected fingerprint.
    Verified,
    /// The peer presented a different key.
    Mismatch {
        /// Fingerprint from the handshake.
        actual: Fingerprint,
        /// Fingerprint from the configuration.
        expected: Fingerprint,
    },
}

impl IdentityVerdict {
    /// Compare `actual` against an optional expectation.
    pub fn check(expected: Option<Fingerprint>, actual: Fingerprint) -> Self {
        match expected {
            None => IdentityVerdict::FirstUse,
            Some(expected) if expected == actual => IdentityVerdict::Verified,
            Some(expected) => IdentityVerdict::Mismatch { actual, expected },
        }
    }
}
