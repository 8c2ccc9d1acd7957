use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// How many requests may be in flight and what happens to the excess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConcurrencyMode {
    /// Promote every queued request on each tick.
    #[default]
    Multiple,

    /// At most one request in flight. Requests submitted while one is queued
    /// or running are discarded; the oldest one wins.
    SingleFirst,

    /// At most one request in flight. A newer request abandons the running
    /// one; the newest one wins.
    SingleLast,

    /// Up to `max_concurrent_requests` in flight, oldest first.
    FifoQueued,

    /// Up to `max_concurrent_requests` in flight, newest first.
    FiloQueued,
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyMode::Multiple => write!(f, "multiple"),
            ConcurrencyMode::SingleFirst => write!(f, "single-first"),
            ConcurrencyMode::SingleLast => write!(f, "single-last"),
            ConcurrencyMode::FifoQueued => write!(f, "fifo-queued"),
            ConcurrencyMode::FiloQueued => write!(f, "filo-queued"),
        }
    }
}

/// In which order finished requests are handed to their responders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingMode {
    /// Dispatch as soon as a request finishes.
    #[default]
    Async,

    /// Dispatch in submission order; a finished request waits for every
    /// request submitted before it.
    Sync,

    /// Like `Sync`, but nothing is dispatched while any request is in flight.
    SyncAll,
}

impl ProcessingMode {
    pub fn is_ordered(self) -> bool { !matches!(self, ProcessingMode::Async) }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingMode::Async => write!(f, "async"),
            ProcessingMode::Sync => write!(f, "sync"),
            ProcessingMode::SyncAll => write!(f, "sync-all"),
        }
    }
}

/// What a success callback receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseMode {
    /// The completed token: id, request, caller data, latency and payload.
    #[default]
    Token,

    /// Only the transport payload.
    Raw,
}

/// What happens to responders of requests dropped by a single-flight
/// concurrency mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscardPolicy {
    /// Drop them without a callback.
    #[default]
    Silent,

    /// Invoke their failure callbacks with [`crate::Failure::Discarded`].
    Fail,
}

/// Configuration of a [`crate::Connector`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tether_connector::{ConcurrencyMode, ConnectorOptions, ProcessingMode};
///
/// let options = ConnectorOptions::default()
///     .concurrency(ConcurrencyMode::FifoQueued)
///     .max_concurrent_requests(4)
///     .processing(ProcessingMode::Sync)
///     .timeout(Duration::from_secs(10))
///     .base_url("https://example.com/api");
///
/// assert_eq!(options.max_concurrent_requests, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectorOptions {
    /// Base for `~`-prefixed request URLs.
    ///
    /// Default: None
    pub base_url: Option<String>,

    /// Default: [`ConcurrencyMode::Multiple`]
    pub concurrency: ConcurrencyMode,

    /// Default: [`ProcessingMode::Async`]
    pub processing: ProcessingMode,

    /// Upper bound for the queued concurrency modes. Values below 1 are
    /// treated as 1.
    ///
    /// Default: 4
    pub max_concurrent_requests: usize,

    /// Budget per request, measured from the moment it starts. Zero disables
    /// the timeout.
    ///
    /// Default: 30s
    #[serde(with = "secs")]
    pub timeout: Duration,

    /// Restart the timeout whenever the transport reports progress.
    ///
    /// Default: false
    pub reset_timeout_on_progress: bool,

    /// Release transport handles right after dispatch. When off, dispatched
    /// tokens are retained until [`crate::Connector::release`].
    ///
    /// Default: true
    pub auto_dispose_resources: bool,

    /// Default: [`ResponseMode::Token`]
    pub response_mode: ResponseMode,

    /// Default: [`DiscardPolicy::Silent`]
    pub discard_policy: DiscardPolicy,

    /// Cache-bust every request, not only those asking for it.
    ///
    /// Default: false
    pub cache_bust: bool,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            concurrency: ConcurrencyMode::default(),
            processing: ProcessingMode::default(),
            max_concurrent_requests: 4,
            timeout: Duration::from_secs(30),
            reset_timeout_on_progress: false,
            auto_dispose_resources: true,
            response_mode: ResponseMode::default(),
            discard_policy: DiscardPolicy::default(),
            cache_bust: false,
        }
    }
}

impl ConnectorOptions {
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn concurrency(mut self, concurrency: ConcurrencyMode) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn processing(mut self, processing: ProcessingMode) -> Self {
        self.processing = processing;
        self
    }

    #[must_use]
    pub fn max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn reset_timeout_on_progress(mut self, reset: bool) -> Self {
        self.reset_timeout_on_progress = reset;
        self
    }

    #[must_use]
    pub fn auto_dispose_resources(mut self, auto_dispose: bool) -> Self {
        self.auto_dispose_resources = auto_dispose;
        self
    }

    #[must_use]
    pub fn response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }

    #[must_use]
    pub fn discard_policy(mut self, policy: DiscardPolicy) -> Self {
        self.discard_policy = policy;
        self
    }

    #[must_use]
    pub fn cache_bust(mut self, cache_bust: bool) -> Self {
        self.cache_bust = cache_bust;
        self
    }

    /// `max_concurrent_requests`, never below one.
    pub fn concurrency_limit(&self) -> usize { self.max_concurrent_requests.max(1) }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, de::Error};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectorOptions::default();
        assert_eq!(options.concurrency, ConcurrencyMode::Multiple);
        assert_eq!(options.processing, ProcessingMode::Async);
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert!(options.auto_dispose_resources);
        assert!(!options.reset_timeout_on_progress);
    }

    #[test]
    fn test_concurrency_limit_clamped() {
        let options = ConnectorOptions::default().max_concurrent_requests(0);
        assert_eq!(options.concurrency_limit(), 1);
    }

    #[test]
    fn test_deserialize_from_toml() {
        let options: ConnectorOptions = toml::from_str(
            r#"
            base_url = "https://example.com"
            concurrency = "filo-queued"
            processing = "sync-all"
            max_concurrent_requests = 2
            timeout = 1.5
            discard_policy = "fail"
            "#,
        )
        .unwrap();

        assert_eq!(options.base_url.as_deref(), Some("https://example.com"));
        assert_eq!(options.concurrency, ConcurrencyMode::FiloQueued);
        assert_eq!(options.processing, ProcessingMode::SyncAll);
        assert_eq!(options.max_concurrent_requests, 2);
        assert_eq!(options.timeout, Duration::from_millis(1500));
        assert_eq!(options.discard_policy, DiscardPolicy::Fail);
        assert!(options.auto_dispose_resources);
    }

    #[test]
    fn test_deserialize_rejects_negative_timeout() {
        let result: Result<ConnectorOptions, _> = toml::from_str("timeout = -1.0");
        assert!(result.is_err());
    }
}
