use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tether_connector::{
    Connector, ConnectorHandle, Failure, Multiplicator, Outcome, Payload, ReqwestTransport,
    Responder, Response, Transport, WebRequest,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cli::FetchArg;
use crate::config::Settings;
use crate::tracker::{ProgressTracker, ProgressTrackerConfig, Tracker};

/// Per-run bookkeeping shared by every responder.
#[derive(Clone)]
struct Report {
    tracker: ProgressTracker,
    successes: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl Report {
    fn new(tracker: ProgressTracker) -> Self {
        Self {
            tracker,
            successes: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn success(&self, index: usize, url: &str, payload: &Payload, elapsed: Option<Duration>) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.tracker.println(&success_line(index, url, payload, elapsed));
    }

    fn failure(&self, index: usize, url: &str, failure: &Failure) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.tracker.println(&failure_line(index, url, failure));
    }

    fn outcome(&self, index: usize, url: &str, outcome: Outcome) {
        match outcome {
            Outcome::Success(Response::Token(token)) => {
                self.success(index, url, &token.payload, Some(token.duration))
            }
            Outcome::Success(Response::Raw(payload)) => self.success(index, url, &payload, None),
            Outcome::Failure(failure) => self.failure(index, url, &failure),
        }
    }

    /// URLs that never reached a responder were dropped by the concurrency
    /// mode without a callback.
    fn tally(&self, total: usize) -> Tally {
        let ok = self.successes.load(Ordering::Relaxed);
        let failed = self.failures.load(Ordering::Relaxed);
        Tally {
            ok,
            failed,
            dropped: total.saturating_sub(ok + failed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tally {
    ok: usize,
    failed: usize,
    dropped: usize,
}

impl Tally {
    fn all_ok(&self) -> bool { self.failed == 0 && self.dropped == 0 }
}

pub async fn run(arg: FetchArg) -> Result<ExitCode> {
    let settings = Settings::resolve(&arg)?;
    debug!(?settings, "resolved fetch settings");

    let transport = ReqwestTransport::new(tokio::runtime::Handle::current());
    let report = Report::new(ProgressTracker::new(ProgressTrackerConfig {
        len: arg.urls.len() as u64,
        hidden: arg.quiet,
    }));

    let mut connector = Connector::new(transport, settings.options.clone());
    let (done, processed) = oneshot::channel();
    submit(&mut connector, &arg.urls, settings.dedupe, &report, done)?;

    let (handle, task) = ConnectorHandle::spawn(connector, settings.tick);
    processed.await.context("connector stopped before finishing")?;
    handle.shutdown()?;
    task.await.context("connector task failed")?;

    let tally = report.tally(arg.urls.len());
    report.tracker.finish(Some(format!(
        "{} ok, {} failed, {} dropped",
        tally.ok, tally.failed, tally.dropped
    )));
    if tally.dropped > 0 {
        warn!(dropped = tally.dropped, concurrency = %settings.options.concurrency, "requests dropped without a response");
    }
    info!(requests = arg.urls.len(), failures = tally.failed, "fetch finished");

    Ok(if tally.all_ok() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Queue every URL and hook the tracker up to the connector's notifications.
fn submit<T: Transport>(
    connector: &mut Connector<T>,
    urls: &[String],
    dedupe: bool,
    report: &Report,
    done: oneshot::Sender<()>,
) -> Result<()> {
    let tracker = report.tracker.clone();
    connector.on_progress_change(move |status| tracker.update(status));
    let mut done = Some(done);
    connector.on_all_processed(move || {
        if let Some(done) = done.take() {
            let _ = done.send(());
        }
    });

    let loader = Multiplicator::new(|payload: &Payload| Ok::<_, String>(payload.clone()));
    for (index, url) in urls.iter().enumerate() {
        let report = report.clone();
        let target = url.clone();
        if dedupe {
            loader
                .load(connector, url, move |loaded| match loaded {
                    Ok(payload) => report.success(index, &target, &payload, None),
                    Err(failure) => report.failure(index, &target, &failure),
                })
                .with_context(|| format!("invalid url: {url}"))?;
        } else {
            connector
                .send_with(
                    WebRequest::get(url.as_str()),
                    vec![Responder::from_outcome(move |outcome| report.outcome(index, &target, outcome))],
                )
                .with_context(|| format!("invalid url: {url}"))?;
        }
    }
    Ok(())
}

fn success_line(index: usize, url: &str, payload: &Payload, elapsed: Option<Duration>) -> String {
    let status = payload.status.map_or_else(|| "-".to_string(), |status| status.to_string());
    let mut line = format!("[{index}] {url} {status} {} bytes", payload.body.len());
    if let Some(elapsed) = elapsed {
        line.push_str(&format!(" in {}ms", elapsed.as_millis()));
    }
    line
}

fn failure_line(index: usize, url: &str, failure: &Failure) -> String {
    format!("[{index}] {url} failed: {failure}")
}
