use thiserror::Error;

/// Failure to parse one of the shared identifier or enum types from text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown conversation kind: {0}")]
    ConversationKind(String),

    #[error("Invalid geo URI: {0}")]
    GeoUri(String),
}
