//! Scripted transport for tests and examples.

use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::data::{Payload, WebRequest};
use crate::effects::lock;
use crate::effects::transport::{Transport, TransportHandle};

#[derive(Debug)]
struct MockFetch {
    request: WebRequest,
    done: bool,
    progress: f32,
    bytes: u64,
    error: Option<String>,
    payload: Option<Payload>,
    disposed: bool,
}

/// Transport whose fetches only complete when a test says so.
///
/// Clones share state, so a test keeps one clone and hands the other to the
/// connector. Fetches are addressed by URL; operations apply to every
/// pending fetch of that URL.
///
/// # Examples
///
/// ```
/// use tether_connector::{MockTransport, Transport, TransportHandle, WebRequest};
///
/// let transport = MockTransport::new();
/// let mut handle = transport.begin(&WebRequest::get("mock://a"));
/// assert!(!handle.poll_done());
///
/// assert_eq!(transport.complete("mock://a", "body"), 1);
/// assert!(handle.poll_done());
/// assert_eq!(handle.payload().unwrap().text(), "body");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    fetches: Arc<Mutex<Vec<Arc<Mutex<MockFetch>>>>>,
}

impl MockTransport {
    pub fn new() -> Self { Self::default() }

    /// Number of fetches begun so far.
    pub fn begun(&self) -> usize { lock(&self.fetches).len() }

    /// Number of fetches begun for `url`.
    pub fn begun_for(&self, url: &str) -> usize { self.matching(url, |_| true).len() }

    /// Requests in the order their fetches began.
    pub fn requests(&self) -> Vec<WebRequest> {
        lock(&self.fetches).iter().map(|fetch| lock(fetch).request.clone()).collect()
    }

    /// Number of fetches for `url` that were disposed.
    pub fn disposed(&self, url: &str) -> usize { self.matching(url, |fetch| fetch.disposed).len() }

    /// Finish pending fetches of `url` with a 200 response.
    pub fn complete(&self, url: &str, body: impl Into<Bytes>) -> usize {
        self.complete_with(url, Payload::new(body).status(200))
    }

    /// Finish pending fetches of `url` with `payload`.
    pub fn complete_with(&self, url: &str, payload: Payload) -> usize {
        self.update(url, |fetch| {
            fetch.done = true;
            fetch.progress = 1.0;
            fetch.bytes = payload.body.len() as u64;
            fetch.payload = Some(payload.clone());
        })
    }

    /// Finish pending fetches of `url` with a transport error.
    pub fn fail(&self, url: &str, error: impl Into<String>) -> usize {
        let error = error.into();
        self.update(url, |fetch| {
            fetch.done = true;
            fetch.error = Some(error.clone());
        })
    }

    /// Report progress on pending fetches of `url`.
    pub fn advance(&self, url: &str, progress: f32, bytes: u64) -> usize {
        self.update(url, |fetch| {
            fetch.progress = progress;
            fetch.bytes = bytes;
        })
    }

    fn update(&self, url: &str, mut apply: impl FnMut(&mut MockFetch)) -> usize {
        let pending = self.matching(url, |fetch| !fetch.done && !fetch.disposed);
        for fetch in &pending {
            apply(&mut *lock(fetch));
        }
        pending.len()
    }

    fn matching(
        &self,
        url: &str,
        filter: impl Fn(&MockFetch) -> bool,
    ) -> Vec<Arc<Mutex<MockFetch>>> {
        lock(&self.fetches)
            .iter()
            .filter(|fetch| {
                let fetch = lock(fetch);
                fetch.request.url() == url && filter(&*fetch)
            })
            .cloned()
            .collect()
    }
}

impl Transport for MockTransport {
    type Handle = MockHandle;

    fn begin(&self, request: &WebRequest) -> MockHandle {
        let fetch = Arc::new(Mutex::new(MockFetch {
            request: request.clone(),
            done: false,
            progress: 0.0,
            bytes: 0,
            error: None,
            payload: None,
            disposed: false,
        }));
        lock(&self.fetches).push(Arc::clone(&fetch));
        MockHandle { fetch }
    }
}

/// Handle produced by [`MockTransport`].
#[derive(Debug)]
pub struct MockHandle {
    fetch: Arc<Mutex<MockFetch>>,
}

impl TransportHandle for MockHandle {
    fn poll_done(&mut self) -> bool { lock(&self.fetch).done }

    fn progress(&self) -> f32 { lock(&self.fetch).progress }

    fn bytes_received(&self) -> u64 { lock(&self.fetch).bytes }

    fn error(&self) -> Option<String> { lock(&self.fetch).error.clone() }

    fn payload(&self) -> Option<Payload> { lock(&self.fetch).payload.clone() }

    fn dispose(&mut self) { lock(&self.fetch).disposed = true; }
}
