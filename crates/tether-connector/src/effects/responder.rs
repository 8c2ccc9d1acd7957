use std::fmt;

use tracing::warn;

use crate::data::{Failure, Outcome, Response};

/// Connector-wide failure handler for responders without their own.
pub type Fault = dyn Fn(&Failure) + Send + Sync;

enum Callbacks {
    Split {
        on_success: Box<dyn FnOnce(Response) + Send>,
        on_failure: Option<Box<dyn FnOnce(Failure) + Send>>,
    },
    Outcome(Box<dyn FnOnce(Outcome) + Send>),
}

/// Callbacks attached to a token, invoked at most once.
///
/// # Examples
///
/// ```
/// use tether_connector::Responder;
///
/// let responder = Responder::new(|response| println!("{}", response.payload().text()))
///     .on_failure(|failure| eprintln!("request failed: {failure}"));
/// ```
pub struct Responder {
    callbacks: Callbacks,
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.callbacks {
            Callbacks::Split { on_failure: Some(_), .. } => "success+failure",
            Callbacks::Split { on_failure: None, .. } => "success",
            Callbacks::Outcome(_) => "outcome",
        };
        f.debug_struct("Responder").field("callbacks", &kind).finish()
    }
}

impl Responder {
    /// Responder with a success callback. Failures go to the connector's
    /// fault hook unless [`on_failure`](Self::on_failure) is set.
    pub fn new(on_success: impl FnOnce(Response) + Send + 'static) -> Self {
        Self {
            callbacks: Callbacks::Split {
                on_success: Box::new(on_success),
                on_failure: None,
            },
        }
    }

    /// Responder receiving either outcome through one callback.
    pub fn from_outcome(on_outcome: impl FnOnce(Outcome) + Send + 'static) -> Self {
        Self {
            callbacks: Callbacks::Outcome(Box::new(on_outcome)),
        }
    }

    /// Set the failure callback. Has no effect on an outcome responder.
    #[must_use]
    pub fn on_failure(mut self, on_failure: impl FnOnce(Failure) + Send + 'static) -> Self {
        if let Callbacks::Split { on_failure: slot, .. } = &mut self.callbacks {
            *slot = Some(Box::new(on_failure));
        }
        self
    }

    pub(crate) fn deliver(self, outcome: Outcome, fault: Option<&Fault>) {
        match (self.callbacks, outcome) {
            (Callbacks::Outcome(on_outcome), outcome) => on_outcome(outcome),
            (Callbacks::Split { on_success, .. }, Outcome::Success(response)) => on_success(response),
            (Callbacks::Split { on_failure: Some(on_failure), .. }, Outcome::Failure(failure)) => {
                on_failure(failure)
            }
            (Callbacks::Split { on_failure: None, .. }, Outcome::Failure(failure)) => match fault {
                Some(fault) => fault(&failure),
                None => warn!(%failure, "unhandled request failure"),
            },
        }
    }
}
