//! Scheduling integration tests for tether-connector.
//!
//! These drive a connector tick by tick against the scripted transport and
//! check ordering, concurrency bounds, timeouts and notifications.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tether_connector::{
    ConcurrencyMode, Connector, ConnectorOptions, DiscardPolicy, Failure, MockTransport,
    ProcessingMode, Responder, Status, WebRequest,
};
use tokio::time;

type Log = Arc<Mutex<Vec<String>>>;

fn setup(options: ConnectorOptions) -> (MockTransport, Connector<MockTransport>, Log) {
    let transport = MockTransport::new();
    let connector = Connector::new(transport.clone(), options);
    (transport, connector, Arc::new(Mutex::new(Vec::new())))
}

/// Responder logging `name` on success and `name:<failure>` otherwise.
fn responder(log: &Log, name: &str) -> Responder {
    let (ok, err) = (Arc::clone(log), Arc::clone(log));
    let (ok_name, err_name) = (name.to_string(), name.to_string());
    Responder::new(move |_| ok.lock().unwrap().push(ok_name))
        .on_failure(move |failure| err.lock().unwrap().push(format!("{err_name}:{failure}")))
}

fn send(connector: &mut Connector<MockTransport>, log: &Log, name: &str) {
    connector
        .send_with(WebRequest::get(format!("mock://{name}")), vec![responder(log, name)])
        .unwrap();
}

fn entries(log: &Log) -> Vec<String> { log.lock().unwrap().clone() }

fn begun_urls(transport: &MockTransport) -> Vec<String> {
    transport.requests().iter().map(|request| request.url().to_string()).collect()
}

#[test]
fn test_sync_dispatches_in_submission_order() {
    let (transport, mut connector, log) =
        setup(ConnectorOptions::default().processing(ProcessingMode::Sync));
    for name in ["a", "b", "c"] {
        send(&mut connector, &log, name);
    }
    connector.tick();
    assert_eq!(transport.begun(), 3);

    transport.complete("mock://b", "b");
    connector.tick();
    assert!(entries(&log).is_empty());

    transport.complete("mock://a", "a");
    connector.tick();
    assert_eq!(entries(&log), vec!["a", "b"]);

    transport.complete("mock://c", "c");
    connector.tick();
    assert_eq!(entries(&log), vec!["a", "b", "c"]);
    assert!(connector.is_idle());
}

#[test]
fn test_sync_all_waits_for_the_whole_wave() {
    let (transport, mut connector, log) =
        setup(ConnectorOptions::default().processing(ProcessingMode::SyncAll));
    for name in ["a", "b", "c"] {
        send(&mut connector, &log, name);
    }
    connector.tick();

    transport.complete("mock://c", "");
    transport.complete("mock://a", "");
    connector.tick();
    connector.tick();
    assert!(entries(&log).is_empty());

    transport.fail("mock://b", "connection reset");
    connector.tick();
    assert_eq!(entries(&log), vec!["a", "b:connection reset", "c"]);
}

#[test]
fn test_async_dispatches_in_finish_order() {
    let (transport, mut connector, log) = setup(ConnectorOptions::default());
    for name in ["a", "b"] {
        send(&mut connector, &log, name);
    }
    connector.tick();
    transport.complete("mock://b", "");
    connector.tick();
    assert_eq!(entries(&log), vec!["b"]);
}

#[test]
fn test_fifo_respects_limit() {
    let options = ConnectorOptions::default()
        .concurrency(ConcurrencyMode::FifoQueued)
        .max_concurrent_requests(2);
    let (transport, mut connector, log) = setup(options);
    for name in ["u0", "u1", "u2", "u3", "u4"] {
        send(&mut connector, &log, name);
    }

    connector.tick();
    assert_eq!(begun_urls(&transport), vec!["mock://u0", "mock://u1"]);
    assert_eq!(connector.status().active, 2);

    transport.complete("mock://u0", "");
    connector.tick();
    assert_eq!(entries(&log), vec!["u0"]);
    assert_eq!(transport.begun(), 2);

    connector.tick();
    assert_eq!(begun_urls(&transport)[2], "mock://u2");
    assert_eq!(connector.status().active, 2);
}

#[test]
fn test_filo_starts_newest_first() {
    let options = ConnectorOptions::default()
        .concurrency(ConcurrencyMode::FiloQueued)
        .max_concurrent_requests(2);
    let (transport, mut connector, log) = setup(options);
    for name in ["u0", "u1", "u2", "u3", "u4"] {
        send(&mut connector, &log, name);
    }

    connector.tick();
    assert_eq!(begun_urls(&transport), vec!["mock://u4", "mock://u3"]);
    assert_eq!(connector.len(), 5);
}

#[test]
fn test_single_last_supersedes_active_request() {
    let options = ConnectorOptions::default()
        .concurrency(ConcurrencyMode::SingleLast)
        .max_concurrent_requests(1);
    let (transport, mut connector, log) = setup(options);

    send(&mut connector, &log, "a");
    connector.tick();
    send(&mut connector, &log, "b");
    connector.tick();

    assert_eq!(transport.disposed("mock://a"), 1);
    assert_eq!(transport.complete("mock://a", "late"), 0);
    transport.complete("mock://b", "");
    connector.tick();

    assert_eq!(entries(&log), vec!["b"]);
    assert!(!connector.is_subscribed());
}

#[test]
fn test_single_last_keeps_only_newest_queued() {
    let options = ConnectorOptions::default()
        .concurrency(ConcurrencyMode::SingleLast)
        .discard_policy(DiscardPolicy::Fail);
    let (transport, mut connector, log) = setup(options);
    for name in ["a", "b", "c"] {
        send(&mut connector, &log, name);
    }

    connector.tick();
    assert_eq!(begun_urls(&transport), vec!["mock://c"]);
    let discarded = format!("{}", Failure::Discarded);
    assert_eq!(entries(&log), vec![format!("a:{discarded}"), format!("b:{discarded}")]);
}

#[test]
fn test_single_first_drops_newcomers_silently() {
    let options = ConnectorOptions::default().concurrency(ConcurrencyMode::SingleFirst);
    let (transport, mut connector, log) = setup(options);

    send(&mut connector, &log, "a");
    connector.tick();
    send(&mut connector, &log, "b");
    connector.tick();

    assert_eq!(transport.begun(), 1);
    assert_eq!(connector.status(), Status { active: 1, finished: 1, total: 2 });

    transport.complete("mock://a", "");
    connector.tick();
    assert_eq!(entries(&log), vec!["a"]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_resolves_stalled_request() {
    let (transport, mut connector, log) =
        setup(ConnectorOptions::default().timeout(Duration::from_secs(1)));
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    connector.on_progress_change(move |status| sink.lock().unwrap().push(status));
    let processed = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&processed);
    connector.on_all_processed(move || *counter.lock().unwrap() += 1);

    send(&mut connector, &log, "slow");
    for _ in 0..11 {
        connector.tick();
        time::advance(Duration::from_millis(100)).await;
    }
    assert!(entries(&log).is_empty());
    assert_eq!(statuses.lock().unwrap().last(), Some(&Status { active: 1, finished: 0, total: 1 }));

    connector.tick();
    let log = entries(&log);
    assert_eq!(log.len(), 1);
    assert!(log[0].starts_with("slow:"));
    assert!(log[0].contains("timeout"));

    assert_eq!(statuses.lock().unwrap().last(), Some(&Status { active: 0, finished: 1, total: 1 }));
    assert_eq!(*processed.lock().unwrap(), 1);
    assert_eq!(transport.disposed("mock://slow"), 1);
    assert!(!connector.is_subscribed());
}

#[tokio::test(start_paused = true)]
async fn test_progress_extends_timeout() {
    let options = ConnectorOptions::default()
        .timeout(Duration::from_secs(1))
        .reset_timeout_on_progress(true);
    let (transport, mut connector, log) = setup(options);
    send(&mut connector, &log, "big");

    for step in 1..=30u64 {
        time::advance(Duration::from_millis(100)).await;
        if step % 5 == 0 {
            transport.advance("mock://big", 0.0, step * 1024);
        }
        connector.tick();
    }
    assert!(entries(&log).is_empty());
    assert_eq!(connector.status().active, 1);

    for _ in 0..11 {
        time::advance(Duration::from_millis(100)).await;
        connector.tick();
    }
    assert_eq!(entries(&log).len(), 1);
    assert!(entries(&log)[0].contains("timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_without_reset_progress_does_not_help() {
    let (transport, mut connector, log) =
        setup(ConnectorOptions::default().timeout(Duration::from_secs(1)));
    send(&mut connector, &log, "big");

    for step in 1..=12u64 {
        time::advance(Duration::from_millis(100)).await;
        transport.advance("mock://big", step as f32 / 100.0, step * 1024);
        connector.tick();
    }
    assert_eq!(entries(&log).len(), 1);
}

#[test]
fn test_responders_fire_at_most_once() {
    let (transport, mut connector, _) = setup(ConnectorOptions::default());
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    connector
        .send_with(
            WebRequest::get("mock://a"),
            vec![Responder::new(move |_| *counter.lock().unwrap() += 1)],
        )
        .unwrap();

    connector.tick();
    transport.complete("mock://a", "");
    for _ in 0..5 {
        connector.tick();
    }
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[test]
fn test_idle_connector_stops_ticking_until_next_send() {
    let (transport, mut connector, log) = setup(ConnectorOptions::default());
    assert!(!connector.tick());

    send(&mut connector, &log, "a");
    assert!(connector.is_subscribed());
    assert!(connector.tick());
    transport.complete("mock://a", "");
    assert!(!connector.tick());
    assert!(!connector.tick());

    send(&mut connector, &log, "b");
    assert!(connector.tick());
    assert_eq!(transport.begun(), 2);
}

#[test]
fn test_dispose_while_queued_never_starts() {
    let (transport, mut connector, log) = setup(ConnectorOptions::default());
    let token = connector
        .send_with(WebRequest::get("mock://a"), vec![responder(&log, "a")])
        .unwrap();
    token.dispose();

    connector.tick();
    assert_eq!(transport.begun(), 0);
    assert_eq!(entries(&log), vec![format!("a:{}", Failure::Disposed)]);
    assert!(connector.is_idle());
}

#[test]
fn test_dispose_while_active_releases_transport() {
    let (transport, mut connector, log) = setup(ConnectorOptions::default());
    let token = connector
        .send_with(WebRequest::get("mock://a"), vec![responder(&log, "a")])
        .unwrap();
    connector.tick();
    token.dispose();
    connector.tick();

    assert_eq!(transport.disposed("mock://a"), 1);
    assert_eq!(entries(&log), vec![format!("a:{}", Failure::Disposed)]);
}

#[test]
fn test_panicking_responder_is_isolated() {
    let (transport, mut connector, log) = setup(ConnectorOptions::default());
    connector
        .send_with(
            WebRequest::get("mock://a"),
            vec![Responder::new(|_| panic!("responder bug")), responder(&log, "a")],
        )
        .unwrap();
    send(&mut connector, &log, "b");

    connector.tick();
    transport.complete("mock://a", "");
    transport.complete("mock://b", "");
    connector.tick();

    assert_eq!(entries(&log), vec!["a", "b"]);
    assert!(connector.is_idle());
}

#[test]
fn test_fault_hook_catches_unhandled_failures() {
    let (transport, mut connector, log) = setup(ConnectorOptions::default());
    let sink = Arc::clone(&log);
    connector.set_fault(move |failure| sink.lock().unwrap().push(format!("fault:{failure}")));
    connector
        .send_with(WebRequest::get("mock://a"), vec![Responder::new(|_| {})])
        .unwrap();

    connector.tick();
    transport.fail("mock://a", "404 Not Found");
    connector.tick();
    assert_eq!(entries(&log), vec!["fault:404 Not Found"]);
}

#[test]
fn test_status_counts_a_wave() {
    let (transport, mut connector, log) = setup(ConnectorOptions::default());
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    connector.on_progress_change(move |status| sink.lock().unwrap().push(status));

    send(&mut connector, &log, "a");
    send(&mut connector, &log, "b");
    connector.tick();
    transport.complete("mock://a", "");
    transport.complete("mock://b", "");
    connector.tick();

    assert_eq!(
        *statuses.lock().unwrap(),
        vec![
            Status { active: 0, finished: 0, total: 1 },
            Status { active: 0, finished: 0, total: 2 },
            Status { active: 2, finished: 0, total: 2 },
            Status { active: 0, finished: 1, total: 2 },
            Status { active: 0, finished: 2, total: 2 },
        ]
    );
    assert_eq!(connector.status(), Status::default());
}

#[test]
fn test_cancel_completes_the_wave() {
    let (_, mut connector, log) = setup(ConnectorOptions::default());
    let processed = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&processed);
    connector.on_all_processed(move || *counter.lock().unwrap() += 1);

    let token = connector
        .send_with(WebRequest::get("mock://a"), vec![responder(&log, "a")])
        .unwrap();
    connector.tick();
    assert!(connector.cancel(token.id()));
    assert!(!connector.tick());

    assert!(entries(&log).is_empty());
    assert_eq!(*processed.lock().unwrap(), 1);
}

#[test]
fn test_switching_to_sync_mid_wave() {
    let (transport, mut connector, log) = setup(ConnectorOptions::default());
    send(&mut connector, &log, "a");
    connector.options_mut().processing = ProcessingMode::Sync;
    send(&mut connector, &log, "b");
    connector.tick();

    transport.complete("mock://a", "");
    connector.tick();
    assert_eq!(entries(&log), vec!["a"]);
}

#[test]
fn test_switching_to_async_mid_wave() {
    let (transport, mut connector, log) =
        setup(ConnectorOptions::default().processing(ProcessingMode::Sync));
    let processed = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&processed);
    connector.on_all_processed(move || *counter.lock().unwrap() += 1);

    send(&mut connector, &log, "a");
    connector.tick();
    connector.options_mut().processing = ProcessingMode::Async;

    transport.complete("mock://a", "");
    connector.tick();
    assert_eq!(entries(&log), vec!["a"]);
    assert!(connector.is_idle());
    assert!(!connector.is_subscribed());
    assert_eq!(*processed.lock().unwrap(), 1);
}

#[test]
fn test_sync_all_waits_for_queued_requests() {
    let (transport, mut connector, log) = setup(
        ConnectorOptions::default()
            .processing(ProcessingMode::SyncAll)
            .concurrency(ConcurrencyMode::FifoQueued)
            .max_concurrent_requests(1),
    );
    for name in ["a", "b", "c"] {
        send(&mut connector, &log, name);
    }
    connector.tick();
    assert_eq!(begun_urls(&transport), vec!["mock://a"]);

    transport.complete("mock://a", "");
    connector.tick();
    connector.tick();
    assert!(entries(&log).is_empty());
    assert_eq!(begun_urls(&transport), vec!["mock://a", "mock://b"]);

    transport.complete("mock://b", "");
    connector.tick();
    connector.tick();
    assert!(entries(&log).is_empty());

    transport.complete("mock://c", "");
    connector.tick();
    assert_eq!(entries(&log), vec!["a", "b", "c"]);
    assert!(connector.is_idle());
}

#[test]
fn test_cache_bust_applies_to_every_request() {
    let (transport, mut connector, log) =
        setup(ConnectorOptions::default().cache_bust(true).base_url("mock://host"));
    connector
        .send_with(WebRequest::get("~/feed?page=2"), vec![responder(&log, "feed")])
        .unwrap();
    connector.tick();

    let url = begun_urls(&transport).remove(0);
    assert!(url.starts_with("mock://host/feed?page=2&nocache="));
}
