//! Watcher loop behavior against scripted event streams
//!
//! Uses a paused tokio clock so the reconnect backoff elapses instantly.

mod common;

use common::{MockAdapter, StreamScript};
use coldfront::watcher::EventStreamWatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn spawn_watcher(
    adapter: Arc<MockAdapter>,
    shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let watcher = EventStreamWatcher::new(
        adapter,
        "container",
        None,
        "/internal/events",
        shutdown_rx,
    );
    tokio::spawn(watcher.run())
}

async fn run_watcher_for(adapter: Arc<MockAdapter>, virtual_time: Duration) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = spawn_watcher(Arc::clone(&adapter), shutdown_rx);

    tokio::time::sleep(virtual_time).await;

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn activity_events_renew_idle_timeout_exactly_once_each() {
    let adapter = Arc::new(MockAdapter::new());
    adapter.push_stream(StreamScript::Chunks(vec![
        b"event: session_activity\ndata: {\"session\":\"a\"}\n\n",
        b"event: output_delta\ndata: chunk\n\n",
        b"event: session_activity\ndata: {\"session\":\"a\"}\n\n",
        b"event: status\ndata: idle\n\n",
    ]));

    run_watcher_for(Arc::clone(&adapter), Duration::from_secs(10)).await;

    assert_eq!(adapter.renewals(), 2);
}

#[tokio::test(start_paused = true)]
async fn non_activity_events_never_renew() {
    let adapter = Arc::new(MockAdapter::new());
    adapter.push_stream(StreamScript::Chunks(vec![
        b"event: output_delta\ndata: a\n\n",
        b"event: status\ndata: busy\n\n",
        b"data: untyped\n\n",
    ]));

    run_watcher_for(Arc::clone(&adapter), Duration::from_secs(10)).await;

    assert_eq!(adapter.renewals(), 0);
}

#[tokio::test(start_paused = true)]
async fn stream_end_reconnects_through_backoff() {
    let adapter = Arc::new(MockAdapter::new());
    adapter.push_stream(StreamScript::Chunks(vec![
        b"event: session_activity\ndata: {}\n\n",
    ]));
    adapter.push_stream(StreamScript::Chunks(vec![
        b"event: session_activity\ndata: {}\n\n",
    ]));

    run_watcher_for(Arc::clone(&adapter), Duration::from_secs(60)).await;

    // Both scripted streams were consumed, so the feed was re-opened after
    // the first one ended
    assert!(adapter.stream_opens() >= 2);
    assert_eq!(adapter.renewals(), 2);
}

#[tokio::test(start_paused = true)]
async fn decode_errors_are_nonfatal_and_reconnect() {
    let adapter = Arc::new(MockAdapter::new());
    adapter.push_stream(StreamScript::ChunksThenError(vec![
        b"event: session_activity\ndata: {}\n\n",
    ]));
    adapter.push_stream(StreamScript::Chunks(vec![
        b"event: session_activity\ndata: {}\n\n",
    ]));

    run_watcher_for(Arc::clone(&adapter), Duration::from_secs(60)).await;

    assert!(adapter.stream_opens() >= 2);
    assert_eq!(adapter.renewals(), 2);
}

#[tokio::test(start_paused = true)]
async fn connection_failures_keep_retrying() {
    let adapter = Arc::new(MockAdapter::new());
    for _ in 0..5 {
        adapter.push_stream(StreamScript::Fail);
    }

    // Five failures at 2s, 4s, 8s, 16s, 30s of backoff fit inside 90s
    run_watcher_for(Arc::clone(&adapter), Duration::from_secs(90)).await;

    assert!(adapter.stream_opens() >= 5);
    assert_eq!(adapter.renewals(), 0);
}

#[tokio::test(start_paused = true)]
async fn absent_stream_backs_off_without_reset_until_acquisition() {
    let adapter = Arc::new(MockAdapter::new());
    for _ in 0..3 {
        adapter.push_stream(StreamScript::NoStream);
    }
    adapter.push_stream(StreamScript::Chunks(vec![b"event: status\ndata: ok\n\n"]));
    // Subsequent attempts fall through to NoStream again

    run_watcher_for(Arc::clone(&adapter), Duration::from_secs(30)).await;

    let gaps = adapter.open_gaps();
    assert!(gaps.len() >= 5, "expected at least 6 opens, saw gaps {gaps:?}");
    // A yielded-but-unreadable open does not reset the delay: it keeps
    // doubling across the NoStream run
    assert_eq!(gaps[0], Duration::from_millis(2000));
    assert_eq!(gaps[1], Duration::from_millis(4000));
    assert_eq!(gaps[2], Duration::from_millis(8000));
    // Acquiring a real stream resets the delay, so after it ends the next
    // reconnect comes back at the initial delay and doubles again
    assert_eq!(gaps[3], Duration::from_millis(2000));
    assert_eq!(gaps[4], Duration::from_millis(4000));
}

#[tokio::test(start_paused = true)]
async fn dropped_shutdown_sender_ends_the_loop() {
    let adapter = Arc::new(MockAdapter::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = spawn_watcher(Arc::clone(&adapter), shutdown_rx);

    drop(shutdown_tx);

    // The loop must treat the closed channel as shutdown instead of
    // spinning through reconnect attempts with no backoff
    handle.await.unwrap();
    assert!(adapter.stream_opens() <= 1);
}

#[tokio::test(start_paused = true)]
async fn absent_stream_is_not_an_error() {
    let adapter = Arc::new(MockAdapter::new());
    adapter.push_stream(StreamScript::NoStream);
    adapter.push_stream(StreamScript::Chunks(vec![
        b"event: session_activity\ndata: {}\n\n",
    ]));

    run_watcher_for(Arc::clone(&adapter), Duration::from_secs(60)).await;

    assert!(adapter.stream_opens() >= 2);
    assert_eq!(adapter.renewals(), 1);
}
