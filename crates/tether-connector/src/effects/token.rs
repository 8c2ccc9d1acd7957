use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::data::{TokenStatus, WebRequest};
use crate::effects::responder::Responder;
use crate::effects::transport::TransportHandle;

/// Opaque caller data carried by a token and copied to its clones.
pub type TokenData = Arc<dyn Any + Send + Sync>;

/// Identifier of a token. Ids grow monotonically and are never reused, so a
/// stale id can only miss, never alias another token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(u64);

impl TokenId {
    pub fn from_raw(raw: u64) -> Self { Self(raw) }

    pub fn as_u64(self) -> u64 { self.0 }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

/// Shared id allocator, so handles can mint ids without a round trip.
#[derive(Debug, Clone, Default)]
pub(crate) struct TokenIds(Arc<AtomicU64>);

impl TokenIds {
    pub(crate) fn next(&self) -> TokenId { TokenId(self.0.fetch_add(1, Ordering::Relaxed) + 1) }
}

/// Caller-side handle of one logical request.
///
/// Cheap to clone. Disposing through the handle is cooperative: the
/// connector notices on its next tick, releases the transport and fails the
/// token's responders with [`crate::Failure::Disposed`].
#[derive(Debug, Clone)]
pub struct AsyncToken {
    id: TokenId,
    disposed: Arc<AtomicBool>,
}

impl AsyncToken {
    pub(crate) fn new(id: TokenId) -> Self {
        Self {
            id,
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> TokenId { self.id }

    /// Mark the token disposed. Idempotent.
    pub fn dispose(&self) { self.disposed.store(true, Ordering::Release); }

    pub fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }

    pub(crate) fn disposed_flag(&self) -> Arc<AtomicBool> { Arc::clone(&self.disposed) }
}

impl PartialEq for AsyncToken {
    fn eq(&self, other: &Self) -> bool { self.id == other.id }
}

impl Eq for AsyncToken {}

/// Connector-side state of one token.
pub(crate) struct TokenState<H> {
    pub(crate) request: Arc<WebRequest>,
    pub(crate) stage: TokenStatus,
    pub(crate) transport: Option<H>,
    pub(crate) responders: Vec<Responder>,
    pub(crate) timeout: Duration,
    pub(crate) is_timeout: bool,
    pub(crate) started: Option<Instant>,
    pub(crate) duration: Duration,
    pub(crate) data: Option<TokenData>,
    pub(crate) origin: Option<TokenId>,
    pub(crate) clones: Vec<TokenId>,
    disposed: Arc<AtomicBool>,
    observed: (f32, u64),
}

impl<H: TransportHandle> TokenState<H> {
    pub(crate) fn new(
        token: &AsyncToken,
        request: Arc<WebRequest>,
        responders: Vec<Responder>,
        timeout: Duration,
        data: Option<TokenData>,
    ) -> Self {
        Self {
            request,
            stage: TokenStatus::Queued,
            transport: None,
            responders,
            timeout,
            is_timeout: false,
            started: None,
            duration: Duration::ZERO,
            data,
            origin: None,
            clones: Vec::new(),
            disposed: token.disposed_flag(),
            observed: (0.0, 0),
        }
    }

    /// State of a clone waiting on `origin`'s fetch.
    pub(crate) fn linked(&self, token: &AsyncToken, origin: TokenId, data: Option<TokenData>) -> Self {
        let mut clone = Self::new(token, Arc::clone(&self.request), Vec::new(), self.timeout, data);
        clone.stage = TokenStatus::Linked;
        clone.origin = Some(origin);
        clone.started = self.started;
        clone
    }

    pub(crate) fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }

    /// Attach a freshly begun transport.
    pub(crate) fn start(&mut self, transport: H, now: Instant) {
        self.transport = Some(transport);
        self.started = Some(now);
        self.stage = TokenStatus::Active;
    }

    pub(crate) fn elapsed(&self, now: Instant) -> Duration {
        self.started.map(|started| now.saturating_duration_since(started)).unwrap_or_default()
    }

    /// Restart the timeout baseline when the transfer moved since the last
    /// look.
    pub(crate) fn check_progress(&mut self, now: Instant) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let current = (transport.progress(), transport.bytes_received());
        if current.0 > self.observed.0 || current.1 > self.observed.1 {
            self.observed = current;
            self.started = Some(now);
        }
    }

    /// Release the transport handle.
    pub(crate) fn release(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.dispose();
        }
    }

    /// Release the transport and mark the token non-reusable. Idempotent.
    pub(crate) fn dispose(&mut self) {
        self.disposed.store(true, Ordering::Release);
        self.release();
    }
}
