//! Error types for tether-connector.

use thiserror::Error;

use crate::effects::TokenId;

/// Errors raised synchronously at submission time.
///
/// Scheduling failures (timeouts, transport errors, cancellation) never show
/// up here; they are delivered to responders as [`crate::Failure`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("request has no URL")]
    MissingUrl,

    #[error("relative URL '{0}' used but the connector has no base URL")]
    MissingBaseUrl(String),

    #[error("unknown token: {0}")]
    UnknownToken(TokenId),

    #[error("connector driver is no longer running")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
