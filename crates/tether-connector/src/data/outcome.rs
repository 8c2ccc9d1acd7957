use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::data::request::WebRequest;
use crate::effects::{TokenData, TokenId};

/// What a transport produced for a completed fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    /// HTTP status, when the transport speaks HTTP.
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Payload {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            status: None,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Body interpreted as UTF-8, lossily.
    pub fn text(&self) -> std::borrow::Cow<'_, str> { String::from_utf8_lossy(&self.body) }
}

/// A token that resolved successfully.
#[derive(Debug, Clone)]
pub struct CompletedToken {
    pub id: TokenId,
    pub request: Arc<WebRequest>,
    /// Caller data attached at send or clone time.
    pub data: Option<TokenData>,
    /// Time between the start of the fetch and its completion.
    pub duration: Duration,
    pub payload: Payload,
}

impl CompletedToken {
    /// Caller data downcast to `D`.
    pub fn data<D: 'static>(&self) -> Option<&D> {
        self.data.as_deref().and_then(|data| data.downcast_ref())
    }
}

/// Value handed to a success callback, shaped by [`crate::ResponseMode`].
#[derive(Debug, Clone)]
pub enum Response {
    Token(CompletedToken),
    Raw(Payload),
}

impl Response {
    pub fn payload(&self) -> &Payload {
        match self {
            Response::Token(token) => &token.payload,
            Response::Raw(payload) => payload,
        }
    }

    pub fn into_payload(self) -> Payload {
        match self {
            Response::Token(token) => token.payload,
            Response::Raw(payload) => payload,
        }
    }

    pub fn token(&self) -> Option<&CompletedToken> {
        match self {
            Response::Token(token) => Some(token),
            Response::Raw(_) => None,
        }
    }
}

/// Why a token did not resolve successfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    #[error("request timeout after {after:?}: {url}")]
    Timeout { url: String, after: Duration },

    #[error("{0}")]
    Transport(String),

    #[error("request was disposed before completion")]
    Disposed,

    #[error("request was discarded by the concurrency policy")]
    Discarded,

    #[error("failed to extract resource: {0}")]
    Extraction(String),
}

impl Failure {
    pub fn is_timeout(&self) -> bool { matches!(self, Failure::Timeout { .. }) }
}

/// Result of one token, as delivered to a responder.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(Response),
    Failure(Failure),
}

impl Outcome {
    pub fn is_success(&self) -> bool { matches!(self, Outcome::Success(_)) }
}
