//! Core types shared by every layer: constants, errors, identities and the
//! collaborator contracts.

mod constants;
mod error;
mod identity;
mod traits;

pub use constants::*;
pub use error::*;
pub use identity::*;
pub use traits::*;
