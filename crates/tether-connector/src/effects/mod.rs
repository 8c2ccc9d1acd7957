//! Effectful side of the connector.
//!
//! Transports perform the actual I/O, the [`Connector`] owns token state and
//! runs callbacks, and [`ConnectorHandle`] drives a connector from a tokio
//! task. Everything stateful lives here; [`crate::core`] only decides.

mod connector;
mod driver;
mod mock;
mod multiplicator;
mod responder;
mod token;
mod transport;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use connector::Connector;
pub(crate) use connector::bust_stamp;
pub use driver::ConnectorHandle;
pub use mock::{MockHandle, MockTransport};
pub use multiplicator::{Extractor, Multiplicator};
pub use responder::{Fault, Responder};
pub use token::{AsyncToken, TokenData, TokenId};
pub use transport::{ProgressSink, TaskHandle, Transport, TransportHandle};
#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;

/// Lock a mutex, recovering the data if a callback panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
