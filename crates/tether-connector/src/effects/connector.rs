//! The scheduler: a token state machine advanced one tick at a time.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::core::{plan_promotion, prepare_request, ready_prefix};
use crate::data::{
    CompletedToken, ConnectorOptions, DiscardPolicy, Failure, Outcome, ProcessingMode, Response,
    ResponseMode, Status, TokenStatus, WebRequest,
};
use crate::effects::responder::{Fault, Responder};
use crate::effects::token::{AsyncToken, TokenData, TokenId, TokenIds, TokenState};
use crate::effects::transport::{Transport, TransportHandle};
use crate::error::{Error, Result};

type ProgressListener = Box<dyn FnMut(Status) + Send>;
type IdleListener = Box<dyn FnMut() + Send>;

/// Multiplexes logical requests onto a bounded set of transport fetches.
///
/// Tokens move `queued → active → finished → dispatched`; a token disposed on
/// the way skips straight to dispatch with [`Failure::Disposed`]. Nothing
/// happens between calls to [`tick`](Self::tick), which the owner drives at
/// a roughly regular cadence (see [`ConnectorHandle`](crate::ConnectorHandle)
/// for a tokio driver).
///
/// Callbacks run inside `tick`. A panicking callback is logged and does not
/// affect other tokens.
pub struct Connector<T: Transport> {
    transport: T,
    options: ConnectorOptions,
    ids: TokenIds,
    tokens: HashMap<TokenId, TokenState<T::Handle>>,
    queued: VecDeque<TokenId>,
    active: Vec<TokenId>,
    finished: Vec<TokenId>,
    synced: VecDeque<TokenId>,
    subscribed: bool,
    wave_total: usize,
    wave_finished: usize,
    progress_listeners: Vec<ProgressListener>,
    idle_listeners: Vec<IdleListener>,
    fault: Option<Arc<Fault>>,
}

impl<T: Transport> Connector<T> {
    pub fn new(transport: T, options: ConnectorOptions) -> Self {
        Self {
            transport,
            options,
            ids: TokenIds::default(),
            tokens: HashMap::new(),
            queued: VecDeque::new(),
            active: Vec::new(),
            finished: Vec::new(),
            synced: VecDeque::new(),
            subscribed: false,
            wave_total: 0,
            wave_finished: 0,
            progress_listeners: Vec::new(),
            idle_listeners: Vec::new(),
            fault: None,
        }
    }

    pub fn options(&self) -> &ConnectorOptions { &self.options }

    /// Changes apply from the next tick on; tokens already submitted keep
    /// their timeout.
    pub fn options_mut(&mut self) -> &mut ConnectorOptions { &mut self.options }

    pub fn transport(&self) -> &T { &self.transport }

    /// Register a listener for `(active, finished, total)` changes.
    pub fn on_progress_change(&mut self, listener: impl FnMut(Status) + Send + 'static) {
        self.progress_listeners.push(Box::new(listener));
    }

    /// Register a listener fired once every token of a wave is resolved.
    pub fn on_all_processed(&mut self, listener: impl FnMut() + Send + 'static) {
        self.idle_listeners.push(Box::new(listener));
    }

    /// Failure handler for responders registered without one.
    pub fn set_fault(&mut self, fault: impl Fn(&Failure) + Send + Sync + 'static) {
        self.fault = Some(Arc::new(fault));
    }

    pub fn send(&mut self, request: WebRequest) -> Result<AsyncToken> {
        self.send_with_data(request, None, Vec::new())
    }

    pub fn send_with(&mut self, request: WebRequest, responders: Vec<Responder>) -> Result<AsyncToken> {
        self.send_with_data(request, None, responders)
    }

    /// Submit a request. Returns immediately; the fetch starts on a later
    /// tick, as the concurrency mode allows.
    ///
    /// # Errors
    ///
    /// [`Error::MissingUrl`] for an empty URL, [`Error::MissingBaseUrl`] for
    /// a `~` URL without a configured base.
    pub fn send_with_data(
        &mut self,
        request: WebRequest,
        data: Option<TokenData>,
        responders: Vec<Responder>,
    ) -> Result<AsyncToken> {
        let id = self.ids.next();
        let request = prepare_request(&request, &self.options, &bust_stamp(id))?;
        let token = AsyncToken::new(id);
        self.enqueue(&token, request, responders, data);
        Ok(token)
    }

    pub(crate) fn ids(&self) -> TokenIds { self.ids.clone() }

    /// Queue an already prepared request under a caller-minted token.
    pub(crate) fn enqueue(
        &mut self,
        token: &AsyncToken,
        request: WebRequest,
        responders: Vec<Responder>,
        data: Option<TokenData>,
    ) {
        let id = token.id();
        debug!(token = %id, method = %request.method(), url = request.url(), "request queued");

        let state = TokenState::new(token, Arc::new(request), responders, self.options.timeout, data);
        self.tokens.insert(id, state);
        self.queued.push_back(id);
        if self.options.processing.is_ordered() {
            self.synced.push_back(id);
        }

        self.wave_total += 1;
        self.subscribed = true;
        self.notify_progress();
    }

    /// Create a token sharing `origin`'s fetch.
    ///
    /// The clone carries `data` and no responders. It resolves together with
    /// its origin, after the origin's own responders. Clones of clones link
    /// to the token owning the fetch.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownToken`] when `origin` is gone or already dispatched.
    pub fn clone_token(&mut self, origin: TokenId, data: Option<TokenData>) -> Result<AsyncToken> {
        let root = match self.tokens.get(&origin) {
            Some(state) => state.origin.unwrap_or(origin),
            None => return Err(Error::UnknownToken(origin)),
        };
        let token = AsyncToken::new(self.ids.next());

        let Some(root_state) = self.tokens.get_mut(&root) else {
            return Err(Error::UnknownToken(origin));
        };
        if root_state.stage == TokenStatus::Retained {
            return Err(Error::UnknownToken(origin));
        }

        let clone = root_state.linked(&token, root, data);
        root_state.clones.push(token.id());
        self.tokens.insert(token.id(), clone);
        debug!(token = %token.id(), origin = %root, "token cloned");
        Ok(token)
    }

    /// Attach another responder to a token that has not been dispatched.
    pub fn add_responder(&mut self, id: TokenId, responder: Responder) -> Result<()> {
        match self.tokens.get_mut(&id) {
            Some(state) if state.stage != TokenStatus::Retained => {
                state.responders.push(responder);
                Ok(())
            }
            _ => Err(Error::UnknownToken(id)),
        }
    }

    /// Dispose a token and forget it. Its responders are dropped without a
    /// call; its clones resolve with [`Failure::Disposed`].
    ///
    /// Returns `false` for unknown ids.
    pub fn cancel(&mut self, id: TokenId) -> bool {
        let Some(mut state) = self.tokens.remove(&id) else {
            return false;
        };
        state.dispose();
        self.unlink(id, &state);
        if counts_toward_wave(state.stage) {
            self.wave_finished += 1;
        }
        debug!(token = %id, stage = %state.stage, "request canceled");

        for clone in mem::take(&mut state.clones) {
            if let Some(clone_state) = self.tokens.remove(&clone) {
                self.fail_all(clone, clone_state, Failure::Disposed);
            }
        }
        self.notify_progress();
        true
    }

    /// Dispose and forget every token, without any callback.
    pub fn cancel_all(&mut self) {
        for (id, mut state) in self.tokens.drain() {
            state.dispose();
            if counts_toward_wave(state.stage) {
                self.wave_finished += 1;
            }
            debug!(token = %id, stage = %state.stage, "request canceled");
        }
        self.queued.clear();
        self.active.clear();
        self.finished.clear();
        self.synced.clear();
        self.notify_progress();
    }

    /// Drop a token retained because auto-dispose is off.
    pub fn release(&mut self, id: TokenId) -> bool {
        match self.tokens.get(&id) {
            Some(state) if state.stage == TokenStatus::Retained => {
                if let Some(mut state) = self.tokens.remove(&id) {
                    state.dispose();
                }
                true
            }
            _ => false,
        }
    }

    pub fn token_status(&self, id: TokenId) -> Option<TokenStatus> {
        self.tokens.get(&id).map(|state| state.stage)
    }

    /// Transport progress of a token, read through its origin for clones.
    pub fn progress(&self, id: TokenId) -> Option<f32> {
        let state = self.tokens.get(&id)?;
        let owner = match state.origin {
            Some(origin) => self.tokens.get(&origin)?,
            None => state,
        };
        owner.transport.as_ref().map(|transport| transport.progress())
    }

    pub fn status(&self) -> Status {
        Status {
            active: self.active.len(),
            finished: self.wave_finished,
            total: self.wave_total,
        }
    }

    /// Number of tokens queued, active or finished.
    pub fn len(&self) -> usize { self.queued.len() + self.active.len() + self.finished.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Nothing left to schedule or dispatch.
    pub fn is_idle(&self) -> bool { self.is_empty() && self.synced.is_empty() }

    /// Whether the connector still wants ticks.
    pub fn is_subscribed(&self) -> bool { self.subscribed }

    /// Advance every token by one step: start queued fetches, detect
    /// finished and timed out ones, dispatch by processing mode.
    ///
    /// Returns whether the connector still wants ticks.
    pub fn tick(&mut self) -> bool {
        if !self.subscribed {
            return false;
        }

        let now = Instant::now();
        self.process_queued(now);
        self.process_active(now);
        self.process_finished();

        if self.is_idle() {
            if self.wave_total > 0 {
                debug!(requests = self.wave_total, "all requests processed");
                self.wave_total = 0;
                self.wave_finished = 0;
                for listener in &mut self.idle_listeners {
                    if panic::catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                        error!("all-processed listener panicked");
                    }
                }
            }
            debug!("connector idle, unsubscribing from ticks");
            self.subscribed = false;
        }
        self.subscribed
    }

    fn process_queued(&mut self, now: Instant) {
        let mut changed = false;

        let (disposed, live): (Vec<_>, Vec<_>) = mem::take(&mut self.queued)
            .into_iter()
            .partition(|id| self.tokens.get(id).is_none_or(|state| state.is_disposed()));
        self.queued = live.into();
        for id in disposed {
            if self.tokens.contains_key(&id) {
                debug!(token = %id, "disposed while queued");
                self.move_to_finished(id, now);
            }
        }

        let plan = plan_promotion(
            self.options.concurrency,
            self.queued.len(),
            self.active.len(),
            self.options.concurrency_limit(),
        );

        if plan.abandon_active {
            for id in mem::take(&mut self.active) {
                self.discard(id, "abandoned for a newer request");
            }
            changed = true;
        }

        let snapshot: Vec<TokenId> = self.queued.drain(..).collect();
        for &index in &plan.promote {
            let id = snapshot[index];
            if let Some(state) = self.tokens.get_mut(&id) {
                let transport = state.request.create_transport(&self.transport);
                state.start(transport, now);
                self.active.push(id);
                debug!(token = %id, url = state.request.url(), "request started");
                changed = true;
            }
        }
        for &index in &plan.discard {
            self.discard(snapshot[index], "dropped by the concurrency policy");
            changed = true;
        }
        self.queued = snapshot
            .into_iter()
            .enumerate()
            .filter(|(index, _)| !plan.promote.contains(index) && !plan.discard.contains(index))
            .map(|(_, id)| id)
            .collect();

        if changed {
            self.notify_progress();
        }
    }

    fn process_active(&mut self, now: Instant) {
        let reset_on_progress = self.options.reset_timeout_on_progress;
        let mut index = 0;
        while index < self.active.len() {
            let id = self.active[index];
            let Some(state) = self.tokens.get_mut(&id) else {
                self.active.remove(index);
                continue;
            };

            // Disposed tokens have released their transport; check first.
            let done = if state.is_disposed() {
                true
            } else {
                if reset_on_progress {
                    state.check_progress(now);
                }
                if !state.timeout.is_zero() && state.elapsed(now) > state.timeout {
                    state.is_timeout = true;
                    true
                } else {
                    state.transport.as_mut().is_some_and(|transport| transport.poll_done())
                }
            };

            if done {
                self.active.remove(index);
                self.move_to_finished(id, now);
            } else {
                index += 1;
            }
        }
    }

    fn process_finished(&mut self) {
        match self.options.processing {
            ProcessingMode::Async => {
                for id in mem::take(&mut self.finished) {
                    self.dispatch(id);
                }
            }
            ProcessingMode::Sync | ProcessingMode::SyncAll => {
                // SyncAll waits until nothing of the wave is left to start or finish.
                let pending = !self.active.is_empty() || !self.queued.is_empty();
                if self.options.processing == ProcessingMode::SyncAll && pending {
                    return;
                }

                // Submitted before the mode became ordered: nothing to wait for.
                let (untracked, tracked): (Vec<_>, Vec<_>) = mem::take(&mut self.finished)
                    .into_iter()
                    .partition(|id| !self.synced.contains(id));
                self.finished = tracked;
                for id in untracked {
                    self.dispatch(id);
                }

                let ready = ready_prefix(self.synced.iter().copied(), |id| self.finished.contains(id));
                let batch: Vec<TokenId> = self.synced.drain(..ready).collect();
                for id in batch {
                    self.finished.retain(|finished| *finished != id);
                    self.dispatch(id);
                }
            }
        }
    }

    fn move_to_finished(&mut self, id: TokenId, now: Instant) {
        if let Some(state) = self.tokens.get_mut(&id) {
            state.duration = state.elapsed(now);
            state.stage = TokenStatus::Finished;
            self.finished.push(id);
        }
    }

    /// Hand a finished token's outcome to its responders and its clones.
    fn dispatch(&mut self, id: TokenId) {
        // Left over when the mode switched from ordered to async mid-wave.
        self.synced.retain(|synced| *synced != id);
        let Some(mut state) = self.tokens.remove(&id) else {
            return;
        };
        self.wave_finished += 1;

        let outcome = self.resolve(id, &mut state);
        match &outcome {
            Outcome::Success(_) => {
                debug!(token = %id, duration = ?state.duration, "request succeeded")
            }
            Outcome::Failure(failure) => debug!(token = %id, %failure, "request failed"),
        }

        for responder in mem::take(&mut state.responders) {
            self.deliver(id, responder, outcome.clone());
        }

        for clone_id in mem::take(&mut state.clones) {
            let Some(mut clone) = self.tokens.remove(&clone_id) else {
                continue;
            };
            let clone_outcome = if clone.is_disposed() {
                Outcome::Failure(Failure::Disposed)
            } else {
                retarget(&outcome, clone_id, clone.data.clone())
            };
            clone.dispose();
            for responder in mem::take(&mut clone.responders) {
                self.deliver(clone_id, responder, clone_outcome.clone());
            }
        }

        if self.options.auto_dispose_resources || state.is_disposed() {
            state.dispose();
        } else {
            state.stage = TokenStatus::Retained;
            self.tokens.insert(id, state);
        }
        self.notify_progress();
    }

    /// Outcome of a finished token. Disposal, then timeout, then transport
    /// error, then success.
    fn resolve(&self, id: TokenId, state: &mut TokenState<T::Handle>) -> Outcome {
        if state.is_disposed() {
            return Outcome::Failure(Failure::Disposed);
        }
        if state.is_timeout {
            state.release();
            return Outcome::Failure(Failure::Timeout {
                url: state.request.url().to_string(),
                after: state.timeout,
            });
        }
        let Some(transport) = state.transport.as_ref() else {
            return Outcome::Failure(Failure::Disposed);
        };
        if let Some(error) = transport.error().filter(|error| !error.is_empty()) {
            return Outcome::Failure(Failure::Transport(error));
        }

        let payload = transport.payload().unwrap_or_default();
        let response = match self.options.response_mode {
            ResponseMode::Raw => Response::Raw(payload),
            ResponseMode::Token => Response::Token(CompletedToken {
                id,
                request: Arc::clone(&state.request),
                data: state.data.clone(),
                duration: state.duration,
                payload,
            }),
        };
        Outcome::Success(response)
    }

    /// Drop a token the concurrency policy will never run.
    fn discard(&mut self, id: TokenId, reason: &str) {
        self.synced.retain(|synced| *synced != id);
        let Some(mut state) = self.tokens.remove(&id) else {
            return;
        };
        state.dispose();
        self.wave_finished += 1;
        warn!(
            token = %id,
            url = state.request.url(),
            mode = %self.options.concurrency,
            "request {reason}"
        );

        let clones: Vec<_> = mem::take(&mut state.clones)
            .into_iter()
            .filter_map(|clone| self.tokens.remove(&clone).map(|state| (clone, state)))
            .collect();
        if self.options.discard_policy == DiscardPolicy::Fail {
            self.fail_all(id, state, Failure::Discarded);
            for (clone, clone_state) in clones {
                self.fail_all(clone, clone_state, Failure::Discarded);
            }
        }
    }

    fn fail_all(&mut self, id: TokenId, mut state: TokenState<T::Handle>, failure: Failure) {
        state.dispose();
        for responder in mem::take(&mut state.responders) {
            self.deliver(id, responder, Outcome::Failure(failure.clone()));
        }
    }

    /// Remove a token from every collection and from its origin's clones.
    fn unlink(&mut self, id: TokenId, state: &TokenState<T::Handle>) {
        self.queued.retain(|queued| *queued != id);
        self.active.retain(|active| *active != id);
        self.finished.retain(|finished| *finished != id);
        self.synced.retain(|synced| *synced != id);
        if let Some(origin) = state.origin.and_then(|origin| self.tokens.get_mut(&origin)) {
            origin.clones.retain(|clone| *clone != id);
        }
    }

    fn deliver(&self, id: TokenId, responder: Responder, outcome: Outcome) {
        let fault = self.fault.as_deref();
        let delivered =
            panic::catch_unwind(AssertUnwindSafe(move || responder.deliver(outcome, fault)));
        if delivered.is_err() {
            error!(token = %id, "responder panicked, continuing with remaining responders");
        }
    }

    fn notify_progress(&mut self) {
        let status = self.status();
        for listener in &mut self.progress_listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(status))).is_err() {
                error!("progress listener panicked");
            }
        }
    }
}

/// Whether a token in `stage` is part of the wave counters.
fn counts_toward_wave(stage: TokenStatus) -> bool {
    matches!(stage, TokenStatus::Queued | TokenStatus::Active | TokenStatus::Finished)
}

/// The origin's outcome as seen by one of its clones.
fn retarget(outcome: &Outcome, id: TokenId, data: Option<TokenData>) -> Outcome {
    match outcome {
        Outcome::Success(Response::Token(token)) => Outcome::Success(Response::Token(CompletedToken {
            id,
            data,
            ..token.clone()
        })),
        other => other.clone(),
    }
}

pub(crate) fn bust_stamp(id: TokenId) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("{millis}{:04}", id.as_u64() % 10_000)
}
