use liaison_shared::PortalKey;
use liaison_store::StoreError;
use thiserror::Error;

use crate::remote::RemoteError;
use crate::room_api::RoomApiError;

/// Errors surfaced by portal operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The operation is not valid for the conversation's kind or state.
    /// The caller is responsible for turning this into a user-facing message.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Room creation returned no room id. Nothing was persisted.
    #[error("Failed to create room for portal {0}")]
    CreationFailed(PortalKey),

    /// The portal has no local room yet.
    #[error("Portal {0} is not bridged to a room")]
    NotBridged(PortalKey),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Room API error: {0}")]
    Room(#[from] RoomApiError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;

pub(crate) trait StoreResultExt<T> {
    /// Turn [`StoreError::NotFound`] into `Ok(None)`.
    fn optional(self) -> Result<Option<T>>;
}

impl<T> StoreResultExt<T> for liaison_store::Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Swallow the failure of a best-effort call, logging it at debug level.
pub(crate) fn ignore_transient<T, E>(result: std::result::Result<T, E>, what: &str) -> Option<T>
where
    E: std::fmt::Display,
{
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring failed {what}");
            None
        }
    }
}
