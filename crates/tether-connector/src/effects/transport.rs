use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures_util::task::noop_waker_ref;
use tokio::task::JoinHandle;

use crate::data::{Payload, WebRequest};

/// Network fetch primitive polled by the connector.
///
/// This trait is the only seam through which real I/O enters the scheduler.
/// Implementations handle their own protocol details, redirects, TLS and
/// error mapping.
///
/// # Implementations
///
/// - [`ReqwestTransport`](crate::ReqwestTransport): Production implementation using `reqwest`
/// - [`MockTransport`](crate::MockTransport): Scripted fetches for tests
pub trait Transport {
    /// In-flight fetch produced by [`begin`](Self::begin).
    type Handle: TransportHandle;

    /// Start fetching `request`. Must not block.
    fn begin(&self, request: &WebRequest) -> Self::Handle;
}

/// One in-flight fetch.
///
/// All methods are non-blocking. The connector never calls anything on a
/// handle after [`dispose`](Self::dispose).
pub trait TransportHandle: Send {
    /// Whether the fetch has finished, successfully or not.
    fn poll_done(&mut self) -> bool;

    /// Completion fraction in `[0, 1]`; `0` when the size is unknown.
    fn progress(&self) -> f32;

    /// Bytes received so far. Lets progress be observed on transfers of
    /// unknown length.
    fn bytes_received(&self) -> u64 { 0 }

    /// Transport-level error. A non-empty error wins over any payload.
    fn error(&self) -> Option<String>;

    /// Result of a finished fetch.
    fn payload(&self) -> Option<Payload>;

    /// Release the fetch. Whether it is aborted is up to the transport.
    fn dispose(&mut self);
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    total: AtomicU64,
}

/// Write side of a [`TaskHandle`]'s progress counters.
#[derive(Debug, Clone)]
pub struct ProgressSink(Arc<Counters>);

impl ProgressSink {
    /// Record the expected body length, when known.
    pub fn set_total(&self, total: Option<u64>) {
        self.0.total.store(total.unwrap_or(0), Ordering::Relaxed);
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.0.received.fetch_add(bytes, Ordering::Relaxed);
    }
}

type FetchResult = std::result::Result<Payload, String>;

/// A [`TransportHandle`] backed by a spawned tokio task.
///
/// The connector polls the task's [`JoinHandle`] with a no-op waker, so the
/// tick never blocks and never registers interest in a wakeup.
#[derive(Debug)]
pub struct TaskHandle {
    task: Option<JoinHandle<FetchResult>>,
    counters: Arc<Counters>,
    result: Option<FetchResult>,
}

impl TaskHandle {
    /// Spawn `fetch` on `runtime`. The future reports progress through the
    /// sink it is given.
    pub fn spawn<F, Fut>(runtime: &tokio::runtime::Handle, fetch: F) -> Self
    where
        F: FnOnce(ProgressSink) -> Fut,
        Fut: Future<Output = FetchResult> + Send + 'static,
    {
        let counters = Arc::new(Counters::default());
        let task = runtime.spawn(fetch(ProgressSink(Arc::clone(&counters))));
        Self {
            task: Some(task),
            counters,
            result: None,
        }
    }
}

impl TransportHandle for TaskHandle {
    fn poll_done(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }
        let Some(task) = self.task.as_mut() else {
            return false;
        };

        let mut cx = Context::from_waker(noop_waker_ref());
        let result = match Pin::new(task).poll(&mut cx) {
            Poll::Pending => return false,
            Poll::Ready(Ok(result)) => result,
            Poll::Ready(Err(join_error)) => Err(join_error.to_string()),
        };
        self.task = None;
        self.result = Some(result);
        true
    }

    fn progress(&self) -> f32 {
        if matches!(self.result, Some(Ok(_))) {
            return 1.0;
        }
        let total = self.counters.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let received = self.counters.received.load(Ordering::Relaxed);
        (received as f64 / total as f64).min(1.0) as f32
    }

    fn bytes_received(&self) -> u64 { self.counters.received.load(Ordering::Relaxed) }

    fn error(&self) -> Option<String> {
        match &self.result {
            Some(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }

    fn payload(&self) -> Option<Payload> {
        match &self.result {
            Some(Ok(payload)) => Some(payload.clone()),
            _ => None,
        }
    }

    fn dispose(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.result = None;
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) { self.dispose(); }
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use bytes::BytesMut;
    use futures_util::StreamExt;

    use super::*;
    use crate::data::Method;

    /// Production transport using `reqwest`, one tokio task per fetch.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
        runtime: tokio::runtime::Handle,
    }

    impl ReqwestTransport {
        /// Create a transport with a default client, spawning on `runtime`.
        pub fn new(runtime: tokio::runtime::Handle) -> Self {
            Self::with_client(reqwest::Client::new(), runtime)
        }

        pub fn with_client(client: reqwest::Client, runtime: tokio::runtime::Handle) -> Self {
            Self { client, runtime }
        }
    }

    impl Transport for ReqwestTransport {
        type Handle = TaskHandle;

        fn begin(&self, request: &WebRequest) -> TaskHandle {
            let mut builder = match request.method() {
                Method::Get => self.client.get(request.url()),
                Method::Post => self.client.post(request.url()),
            };

            for (key, value) in request.header_list() {
                builder = builder.header(key, value);
            }

            if let Some(body) = request.body() {
                builder = builder.body(body.clone());
            } else if !request.form().is_empty() {
                builder = builder.form(request.form());
            }

            TaskHandle::spawn(&self.runtime, move |sink| async move {
                let response = builder.send().await.map_err(|e| e.to_string())?;
                let status = response.status();
                sink.set_total(response.content_length());

                let headers = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value.to_str().ok().map(|v| (name.to_string(), v.to_string()))
                    })
                    .collect();

                let mut body = BytesMut::new();
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| e.to_string())?;
                    sink.add_bytes(chunk.len() as u64);
                    body.extend_from_slice(&chunk);
                }

                if !status.is_success() {
                    return Err(status.to_string());
                }

                Ok(Payload {
                    status: Some(status.as_u16()),
                    headers,
                    body: body.freeze(),
                })
            })
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestTransport;
