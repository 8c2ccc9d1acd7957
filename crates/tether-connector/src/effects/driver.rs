use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::core::prepare_request;
use crate::data::{ConnectorOptions, WebRequest};
use crate::effects::bust_stamp;
use crate::effects::connector::Connector;
use crate::effects::responder::Responder;
use crate::effects::token::{AsyncToken, TokenData, TokenId, TokenIds};
use crate::effects::transport::Transport;
use crate::error::{Error, Result};

type Exec<T> = Box<dyn FnOnce(&mut Connector<T>) + Send>;

enum Command<T: Transport> {
    Submit {
        token: AsyncToken,
        request: WebRequest,
        responders: Vec<Responder>,
        data: Option<TokenData>,
    },
    Cancel(TokenId),
    CancelAll,
    Exec(Exec<T>),
    Shutdown,
}

/// Cloneable handle to a [`Connector`] running on a tokio task.
///
/// The task ticks the connector every `period` while it has work and sleeps
/// on its command channel otherwise. Dropping every handle lets the task
/// finish outstanding work and exit.
///
/// Requests are validated against the options the connector had when it was
/// spawned; later changes through [`exec`](Self::exec) only affect scheduling.
pub struct ConnectorHandle<T: Transport> {
    commands: mpsc::UnboundedSender<Command<T>>,
    ids: TokenIds,
    options: Arc<ConnectorOptions>,
}

impl<T: Transport> Clone for ConnectorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            ids: self.ids.clone(),
            options: Arc::clone(&self.options),
        }
    }
}

impl<T> ConnectorHandle<T>
where
    T: Transport + Send + 'static,
{
    /// Move `connector` onto a new task on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn(connector: Connector<T>, period: Duration) -> (Self, JoinHandle<()>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let handle = Self {
            commands,
            ids: connector.ids(),
            options: Arc::new(connector.options().clone()),
        };
        let task = tokio::spawn(run(connector, receiver, period));
        (handle, task)
    }

    pub fn send(&self, request: WebRequest) -> Result<AsyncToken> {
        self.send_with_data(request, None, Vec::new())
    }

    pub fn send_with(&self, request: WebRequest, responders: Vec<Responder>) -> Result<AsyncToken> {
        self.send_with_data(request, None, responders)
    }

    /// Submit a request. URL errors are reported here, before anything
    /// reaches the connector task.
    pub fn send_with_data(
        &self,
        request: WebRequest,
        data: Option<TokenData>,
        responders: Vec<Responder>,
    ) -> Result<AsyncToken> {
        let id = self.ids.next();
        let request = prepare_request(&request, &self.options, &bust_stamp(id))?;
        let token = AsyncToken::new(id);
        self.command(Command::Submit {
            token: token.clone(),
            request,
            responders,
            data,
        })?;
        Ok(token)
    }

    pub fn cancel(&self, id: TokenId) -> Result<()> { self.command(Command::Cancel(id)) }

    pub fn cancel_all(&self) -> Result<()> { self.command(Command::CancelAll) }

    /// Run `f` on the connector task between ticks.
    pub fn exec(&self, f: impl FnOnce(&mut Connector<T>) + Send + 'static) -> Result<()> {
        self.command(Command::Exec(Box::new(f)))
    }

    /// Run `f` on the connector task and wait for its result.
    pub async fn query<R>(&self, f: impl FnOnce(&mut Connector<T>) -> R + Send + 'static) -> Result<R>
    where
        R: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        self.exec(move |connector| {
            let _ = reply.send(f(connector));
        })?;
        result.await.map_err(|_| Error::Closed)
    }

    /// Cancel everything and stop the task.
    pub fn shutdown(&self) -> Result<()> { self.command(Command::Shutdown) }

    pub fn is_closed(&self) -> bool { self.commands.is_closed() }

    fn command(&self, command: Command<T>) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Closed)
    }
}

async fn run<T: Transport>(
    mut connector: Connector<T>,
    mut commands: mpsc::UnboundedReceiver<Command<T>>,
    period: Duration,
) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut open = true;

    loop {
        if connector.is_subscribed() {
            tokio::select! {
                command = commands.recv(), if open => match command {
                    Some(command) => {
                        if !apply(&mut connector, command) {
                            break;
                        }
                    }
                    None => open = false,
                },
                _ = interval.tick() => {
                    connector.tick();
                }
            }
        } else if open {
            match commands.recv().await {
                Some(command) => {
                    if !apply(&mut connector, command) {
                        break;
                    }
                    interval.reset();
                }
                None => open = false,
            }
        } else {
            break;
        }
    }
    debug!("connector task stopped");
}

/// Returns `false` once the task should stop.
fn apply<T: Transport>(connector: &mut Connector<T>, command: Command<T>) -> bool {
    match command {
        Command::Submit {
            token,
            request,
            responders,
            data,
        } => connector.enqueue(&token, request, responders, data),
        Command::Cancel(id) => {
            connector.cancel(id);
        }
        Command::CancelAll => connector.cancel_all(),
        Command::Exec(f) => f(connector),
        Command::Shutdown => {
            connector.cancel_all();
            return false;
        }
    }
    true
}
