//! Types shared by every Liaison crate: identifiers for both networks,
//! conversation kinds, and the closed event families that flow into the
//! portal orchestrator.

pub mod constants;
pub mod error;
pub mod events;
pub mod types;

pub use error::ParseError;
pub use types::*;
