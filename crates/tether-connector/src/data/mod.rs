//! Immutable data types for request scheduling.
//!
//! This module contains the request descriptor, connector configuration,
//! outcomes delivered to responders and the status counters. None of these
//! types perform I/O.

pub mod options;
pub mod outcome;
pub mod request;
pub mod status;

pub use options::{ConcurrencyMode, ConnectorOptions, DiscardPolicy, ProcessingMode, ResponseMode};
pub use outcome::{CompletedToken, Failure, Outcome, Payload, Response};
pub use request::{Method, WebRequest};
pub use status::{Status, TokenStatus};
