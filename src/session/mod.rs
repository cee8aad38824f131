//! Session layer.
//!
//! Turns an [`EncryptionEngine`](crate::core::EncryptionEngine) and an
//! unreliable [`Transport`](crate::core::Transport) into a reliable, ordered,
//! encrypted message channel that survives resets.
//!
//! - [`SessionConfig`]: identity and policy
//! - [`ResetController`]: lifecycle states and engine generations
//! - [`SessionManager`]: the task owning all session state
//! - [`SessionHandle`] / [`SessionEvents`]: what the application holds

mod config;
mod handle;
mod identity;
mod lifecycle;
mod manager;

pub use config::{SessionConfig, SessionConfigBuilder};
pub use handle::{SessionEvent, SessionEvents, SessionHandle, Teardown};
pub use identity::IdentityVerdict;
pub use lifecycle::{AfterTeardown, LifecycleState, Origin, ResetController};
pub use manager::SessionManager;
