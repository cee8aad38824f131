//! Concrete transports.
//!
//! Both implement [`Transport`](crate::core::Transport) and carry opaque
//! frames between exactly two peers:
//!
//! - [`MemoryLink`]: an in-process pair with optional, seeded loss injection
//! - [`DatagramTransport`]: a tokio UDP socket connected to one peer
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Session Layer                   │
//! ├─────────────────────────────────────────┤
//! │         Encryption Engine               │
//! ├─────────────────────────────────────────┤
//! │         Transport                       │  ← This module
//! │   memory link, UDP datagrams            │
//! └─────────────────────────────────────────┘
//! ```

mod memory;
mod socket;

pub use memory::{LinkConfig, MemoryLink, MemoryTransport};
pub use socket::{DEFAULT_RECV_BUFFER_SIZE, DatagramTransport, DatagramTransportBuilder};
