//! Tick-driven HTTP request scheduling.
//!
//! A [`Connector`] accepts logical requests, multiplexes them onto a bounded
//! set of in-flight transport operations and delivers outcomes to
//! [`Responder`]s under a selectable ordering policy. Everything happens
//! inside [`Connector::tick`]; nothing blocks and no thread is spawned by the
//! core itself.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - [`data`] - Immutable requests, options and outcomes
//! - [`core`] - Pure transformations (URL resolution, scheduling decisions)
//! - [`effects`] - Transports, the connector state machine and its drivers
//!
//! # Key Features
//!
//! - **Concurrency policies**: unbounded, single-first, single-last, FIFO and FILO queues
//! - **Ordering policies**: async, submission-ordered, and wave-batched dispatch
//! - **Anti-starvation**: timeouts can be reset while a transfer makes progress
//! - **Single-flight**: [`Multiplicator`] shares one fetch between concurrent loads
//!
//! # Example
//!
//! ```
//! use tether_connector::{Connector, ConnectorOptions, MockTransport, Responder, WebRequest};
//!
//! let transport = MockTransport::new();
//! let mut connector = Connector::new(transport.clone(), ConnectorOptions::default());
//!
//! connector
//!     .send_with(
//!         WebRequest::get("mock://hello"),
//!         vec![Responder::new(|response| println!("{} bytes", response.payload().body.len()))],
//!     )
//!     .unwrap();
//!
//! connector.tick();
//! transport.complete("mock://hello", "hi");
//! connector.tick();
//! assert!(connector.is_idle());
//! ```

pub mod core;
pub mod data;
pub mod effects;
mod error;

pub use data::{
    CompletedToken, ConcurrencyMode, ConnectorOptions, DiscardPolicy, Failure, Method, Outcome,
    Payload, ProcessingMode, Response, ResponseMode, Status, TokenStatus, WebRequest,
};
pub use effects::{
    AsyncToken, Connector, ConnectorHandle, MockHandle, MockTransport, Multiplicator, Responder,
    TaskHandle, TokenData, TokenId, Transport, TransportHandle,
};

#[cfg(feature = "reqwest")]
pub use effects::ReqwestTransport;

pub use error::{Error, Result};
