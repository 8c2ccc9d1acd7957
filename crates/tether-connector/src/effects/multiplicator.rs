use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::debug;

use crate::data::{Failure, Outcome, Payload, WebRequest};
use crate::effects::connector::Connector;
use crate::effects::lock;
use crate::effects::responder::Responder;
use crate::effects::token::AsyncToken;
use crate::effects::transport::Transport;
use crate::error::Result;

/// Converts a fetched payload into a typed resource.
pub type Extractor<R> = dyn Fn(&Payload) -> std::result::Result<R, String> + Send + Sync;

type RequestBuilder = dyn Fn(&str) -> WebRequest + Send + Sync;
type Loaded<R> = std::result::Result<Arc<R>, Failure>;

struct InFlight<R> {
    token: AsyncToken,
    slot: Arc<OnceLock<Loaded<R>>>,
}

struct Shared<R> {
    cache: HashMap<String, Arc<R>>,
    in_flight: HashMap<String, InFlight<R>>,
}

/// Single-flight loader on top of a [`Connector`].
///
/// Concurrent loads of one path share a single fetch: the first load sends a
/// request, later ones clone its token. The extractor runs once per fetch and
/// every caller receives the same `Arc<R>`, which is then cached by path.
/// Failures reach every caller and are not cached.
///
/// Clones share state.
pub struct Multiplicator<R> {
    shared: Arc<Mutex<Shared<R>>>,
    extractor: Arc<Extractor<R>>,
    request_for: Arc<RequestBuilder>,
}

impl<R> Clone for Multiplicator<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            extractor: Arc::clone(&self.extractor),
            request_for: Arc::clone(&self.request_for),
        }
    }
}

impl<R: Send + Sync + 'static> Multiplicator<R> {
    /// Loader fetching each path with a plain GET.
    pub fn new(extractor: impl Fn(&Payload) -> std::result::Result<R, String> + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                cache: HashMap::new(),
                in_flight: HashMap::new(),
            })),
            extractor: Arc::new(extractor),
            request_for: Arc::new(|path: &str| WebRequest::get(path)),
        }
    }

    /// Build the request for a path with `request_for` instead.
    #[must_use]
    pub fn with_request(mut self, request_for: impl Fn(&str) -> WebRequest + Send + Sync + 'static) -> Self {
        self.request_for = Arc::new(request_for);
        self
    }

    /// Load `path`, calling `callback` once with the resource or the failure.
    ///
    /// A cached path calls `callback` before returning and yields `None`.
    /// Otherwise the token the load waits on is returned: a fresh one, or a
    /// clone of the token already fetching `path`.
    ///
    /// # Errors
    ///
    /// The connector's submission errors for a fresh fetch.
    pub fn load<T: Transport>(
        &self,
        connector: &mut Connector<T>,
        path: &str,
        callback: impl FnOnce(Loaded<R>) + Send + 'static,
    ) -> Result<Option<AsyncToken>> {
        let cached = lock(&self.shared).cache.get(path).cloned();
        if let Some(value) = cached {
            debug!(path, "resource cache hit");
            callback(Ok(value));
            return Ok(None);
        }

        let in_flight = lock(&self.shared)
            .in_flight
            .get(path)
            .map(|entry| (entry.token.clone(), Arc::clone(&entry.slot)));
        if let Some((origin, slot)) = in_flight {
            if !origin.is_disposed() {
                if let Ok(clone) = connector.clone_token(origin.id(), None) {
                    connector.add_responder(clone.id(), self.responder(path, slot, callback))?;
                    debug!(path, origin = %origin.id(), token = %clone.id(), "joined in-flight fetch");
                    return Ok(Some(clone));
                }
            }
            debug!(path, origin = %origin.id(), "in-flight fetch is gone, fetching again");
            remove_in_flight(&mut lock(&self.shared).in_flight, path, &slot);
        }

        let slot = Arc::new(OnceLock::new());
        let request = (self.request_for)(path);
        let responder = self.responder(path, Arc::clone(&slot), callback);
        let token = connector.send_with(request, vec![responder])?;
        lock(&self.shared).in_flight.insert(
            path.to_string(),
            InFlight {
                token: token.clone(),
                slot,
            },
        );
        Ok(Some(token))
    }

    pub fn get(&self, path: &str) -> Option<Arc<R>> { lock(&self.shared).cache.get(path).cloned() }

    pub fn contains(&self, path: &str) -> bool { lock(&self.shared).cache.contains_key(path) }

    /// Forget a cached resource. In-flight fetches are unaffected.
    pub fn evict(&self, path: &str) -> Option<Arc<R>> { lock(&self.shared).cache.remove(path) }

    pub fn clear(&self) { lock(&self.shared).cache.clear(); }

    /// Number of paths currently being fetched.
    pub fn in_flight(&self) -> usize { lock(&self.shared).in_flight.len() }

    fn responder(
        &self,
        path: &str,
        slot: Arc<OnceLock<Loaded<R>>>,
        callback: impl FnOnce(Loaded<R>) + Send + 'static,
    ) -> Responder {
        let shared = Arc::clone(&self.shared);
        let extractor = Arc::clone(&self.extractor);
        let path = path.to_string();

        Responder::from_outcome(move |outcome| {
            let result = match outcome {
                Outcome::Failure(failure) => Err(failure),
                Outcome::Success(response) => slot
                    .get_or_init(|| {
                        extractor(response.payload())
                            .map(Arc::new)
                            .map_err(Failure::Extraction)
                    })
                    .clone(),
            };

            {
                let mut shared = lock(&shared);
                remove_in_flight(&mut shared.in_flight, &path, &slot);
                if let Ok(value) = &result {
                    shared.cache.insert(path, Arc::clone(value));
                }
            }
            callback(result);
        })
    }
}

/// Drop the in-flight entry for `path` if it still belongs to `slot`.
fn remove_in_flight<R>(in_flight: &mut HashMap<String, InFlight<R>>, path: &str, slot: &Arc<OnceLock<Loaded<R>>>) {
    if in_flight.get(path).is_some_and(|entry| Arc::ptr_eq(&entry.slot, slot)) {
        in_flight.remove(path);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::data::ConnectorOptions;
    use crate::effects::mock::MockTransport;

    fn setup() -> (MockTransport, Connector<MockTransport>, Multiplicator<String>, Arc<AtomicUsize>) {
        let transport = MockTransport::new();
        let connector = Connector::new(transport.clone(), ConnectorOptions::default());
        let extractions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&extractions);
        let loader = Multiplicator::new(move |payload: &Payload| {
            counter.fetch_add(1, Ordering::SeqCst);
            match payload.text().as_ref() {
                "" => Err("empty body".to_string()),
                text => Ok(text.to_uppercase()),
            }
        });
        (transport, connector, loader, extractions)
    }

    fn collect(results: &Arc<Mutex<Vec<Loaded<String>>>>) -> impl FnOnce(Loaded<String>) + Send + 'static {
        let results = Arc::clone(results);
        move |result| results.lock().unwrap().push(result)
    }

    #[test]
    fn test_concurrent_loads_share_one_fetch() {
        let (transport, mut connector, loader, extractions) = setup();
        let results = Arc::new(Mutex::new(Vec::new()));

        let first = loader.load(&mut connector, "mock://res", collect(&results)).unwrap().unwrap();
        connector.tick();
        let second = loader.load(&mut connector, "mock://res", collect(&results)).unwrap().unwrap();
        let third = loader.load(&mut connector, "mock://res", collect(&results)).unwrap().unwrap();
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(loader.in_flight(), 1);

        transport.complete("mock://res", "payload");
        connector.tick();

        assert_eq!(transport.begun_for("mock://res"), 1);
        assert_eq!(extractions.load(Ordering::SeqCst), 1);
        assert_eq!(loader.in_flight(), 0);

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 3);
        let values: Vec<_> = results.iter().map(|result| result.clone().unwrap()).collect();
        assert_eq!(*values[0], "PAYLOAD");
        assert!(values.iter().all(|value| Arc::ptr_eq(value, &values[0])));
    }

    #[test]
    fn test_cached_path_answers_synchronously() {
        let (transport, mut connector, loader, _) = setup();
        let results = Arc::new(Mutex::new(Vec::new()));
        loader.load(&mut connector, "mock://res", collect(&results)).unwrap();
        connector.tick();
        transport.complete("mock://res", "cached");
        connector.tick();

        let token = loader.load(&mut connector, "mock://res", collect(&results)).unwrap();
        assert!(token.is_none());
        assert_eq!(results.lock().unwrap().len(), 2);
        assert!(loader.contains("mock://res"));
        assert_eq!(transport.begun(), 1);

        assert_eq!(loader.evict("mock://res").as_deref().map(String::as_str), Some("CACHED"));
        assert!(loader.get("mock://res").is_none());
    }

    #[test]
    fn test_failures_are_shared_and_not_cached() {
        let (transport, mut connector, loader, extractions) = setup();
        let results = Arc::new(Mutex::new(Vec::new()));
        loader.load(&mut connector, "mock://res", collect(&results)).unwrap();
        loader.load(&mut connector, "mock://res", collect(&results)).unwrap();
        connector.tick();
        transport.complete("mock://res", "");
        connector.tick();

        assert_eq!(extractions.load(Ordering::SeqCst), 1);
        for result in results.lock().unwrap().iter() {
            assert_eq!(result.clone().unwrap_err(), Failure::Extraction("empty body".to_string()));
        }
        assert!(!loader.contains("mock://res"));

        loader.load(&mut connector, "mock://res", collect(&results)).unwrap();
        connector.tick();
        assert_eq!(transport.begun_for("mock://res"), 2);
    }

    #[test]
    fn test_canceled_fetch_is_replaced() {
        let (transport, mut connector, loader, _) = setup();
        let results = Arc::new(Mutex::new(Vec::new()));
        let token = loader.load(&mut connector, "mock://res", collect(&results)).unwrap().unwrap();
        connector.tick();
        connector.cancel(token.id());

        let fresh = loader.load(&mut connector, "mock://res", collect(&results)).unwrap().unwrap();
        assert_ne!(fresh, token);
        connector.tick();
        transport.complete("mock://res", "again");
        connector.tick();

        assert_eq!(transport.begun_for("mock://res"), 2);
        assert_eq!(results.lock().unwrap().len(), 1);
        assert_eq!(loader.get("mock://res").as_deref().map(String::as_str), Some("AGAIN"));
    }

    #[test]
    fn test_custom_request_builder() {
        let (transport, mut connector, loader, _) = setup();
        let loader = loader.with_request(|path| WebRequest::get(format!("mock://cdn/{path}")));
        loader.load(&mut connector, "logo.png", |_| {}).unwrap();
        connector.tick();
        assert_eq!(transport.begun_for("mock://cdn/logo.png"), 1);
    }
}
