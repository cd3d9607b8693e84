//! # liaison-store
//!
//! Durable state of the bridge, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for portals,
//! message correlations and relay-bot chat membership.

pub mod bot_chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod portals;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
