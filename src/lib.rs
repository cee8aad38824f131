//! # cipherlink
//!
//! Reliable, ordered, end-to-end encrypted messaging sessions over an
//! unreliable point-to-point frame transport.
//!
//! A session composes an [`EncryptionEngine`](core::EncryptionEngine), which
//! does key agreement and turns messages into ciphertext fragments, with a
//! [`Transport`](core::Transport), which carries frames and reports when each
//! one has left. On top of that it provides:
//!
//! - **Ordering**: messages are submitted one at a time, in FIFO order
//! - **Confirmation**: a delivery resolves once every fragment was sent
//! - **Recovery**: faults reset the encrypted channel; queued and in-flight
//!   messages survive and are replayed
//! - **Identity**: peer fingerprints are checked against an expectation
//!
//! ## Feature Flags
//!
//! - `crypto` (default): [`NoiseEngine`](crypto::NoiseEngine), a Noise_XX
//!   engine with XChaCha20-Poly1305 fragments
//! - `transport` (default): in-memory link and UDP datagram transport
//!
//! ## Modules
//!
//! - [`core`]: constants, errors, identities and collaborator traits
//! - [`outbound`]: message queue and delivery tracker
//! - [`session`]: lifecycle, reset controller and the session task
//! - [`crypto`]: the Noise engine (requires `crypto` feature)
//! - [`transport`]: concrete transports (requires `transport` feature)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use cipherlink::prelude::*;
//!
//! # async fn demo() -> Result<(), SessionError> {
//! let (left, right) = MemoryLink::pair(LinkConfig::lossless());
//!
//! let alice = SessionConfig::builder().identity(IdentityKeypair::generate()).build()?;
//! let bob = SessionConfig::builder().identity(IdentityKeypair::generate()).build()?;
//!
//! let (alice, _alice_events) = SessionManager::spawn(alice, NoiseEngineFactory, left)?;
//! let (_bob, mut bob_events) = SessionManager::spawn(bob, NoiseEngineFactory, right)?;
//!
//! alice.send("hey")?.await?;
//! assert_eq!(bob_events.next_message().await.as_deref(), Some(&b"hey"[..]));
//!
//! alice.destroy().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Outbound pipeline and session layer (always included)
pub mod outbound;
pub mod session;

// Crypto layer (feature-gated)
#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod crypto;

// Transports (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{
        EncryptionEngine, EngineFactory, Fingerprint, IdentityKeypair, InstanceTag, SessionError,
        Transport,
    };
    pub use crate::outbound::Delivery;
    pub use crate::session::{
        LifecycleState, SessionConfig, SessionEvent, SessionEvents, SessionHandle, SessionManager,
        Teardown,
    };

    #[cfg(feature = "crypto")]
    pub use crate::crypto::{NoiseEngine, NoiseEngineFactory};

    #[cfg(feature = "transport")]
    pub use crate::transport::{DatagramTransport, LinkConfig, MemoryLink, MemoryTransport};
}

// Re-export commonly used items at crate root
pub use core::{Fingerprint, IdentityKeypair, SessionError};
pub use session::{SessionConfig, SessionHandle, SessionManager};
