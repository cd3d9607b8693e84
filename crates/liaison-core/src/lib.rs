//! # liaison-core
//!
//! The per-conversation synchronization engine of the bridge.
//!
//! A [`Portal`] mirrors one remote conversation into one local room. The
//! [`Bridge`] owns the process-wide [`Registry`] of portals, the durable
//! [`MessageIndex`] and the collaborators used to talk to both networks
//! ([`RemoteClient`], [`RoomApi`], [`Directory`]).

pub mod bridge;
pub mod config;
pub mod db;
pub mod dedup;
pub mod directory;
pub mod error;
pub mod message_index;
pub mod portal;
pub mod power_levels;
pub mod registry;
pub mod relay_bot;
pub mod remote;
pub mod room_api;
pub mod tasks;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use db::SharedDatabase;
pub use directory::Directory;
pub use error::{BridgeError, Result};
pub use message_index::MessageIndex;
pub use portal::{EnsureRoom, Lifecycle, LocalSender, Portal};
pub use power_levels::PowerLevels;
pub use registry::Registry;
pub use remote::{RemoteClient, RemoteError};
pub use room_api::{RoomApi, RoomApiError};
