use std::sync::Arc;
use std::time::Duration;

use core_test_support::ScriptedTransport;
use core_test_support::custom_frame;
use livesync_core::StreamClient;
use livesync_core::clock::Clock;
use livesync_core::clock::ManualClock;
use livesync_core::clock::TokioClock;
use livesync_core::stream::ReconnectBackoff;
use livesync_core::stream::StreamState;
use livesync_core::stream::StreamUpdate;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio::time::sleep;

const STREAM_URL: &str = "http://localhost:7062/api/agui/stream";

fn client_with(
    transport: &Arc<ScriptedTransport>,
    channels: &[&str],
    clock: Arc<dyn Clock>,
) -> (StreamClient, mpsc::UnboundedReceiver<StreamUpdate>) {
    StreamClient::new(
        STREAM_URL,
        channels,
        ReconnectBackoff::default(),
        transport.clone(),
        clock,
    )
}

fn client(transport: &Arc<ScriptedTransport>) -> (StreamClient, mpsc::UnboundedReceiver<StreamUpdate>) {
    client_with(transport, &["ticket.created"], Arc::new(TokioClock::new()))
}

fn drain(updates: &mut mpsc::UnboundedReceiver<StreamUpdate>) -> Vec<StreamUpdate> {
    let mut drained = Vec::new();
    while let Ok(update) = updates.try_recv() {
        drained.push(update);
    }
    drained
}

fn status(connected: bool) -> StreamUpdate {
    StreamUpdate::Status { connected }
}

fn event_names(updates: &[StreamUpdate]) -> Vec<String> {
    updates
        .iter()
        .filter_map(|update| match update {
            StreamUpdate::Event(event) => Some(event.name.clone()),
            StreamUpdate::Status { .. } => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn failed_opens_back_off_exponentially_up_to_the_cap() {
    let transport = ScriptedTransport::new();
    let (client, mut updates) = client(&transport);

    client.connect();
    sleep(Duration::from_millis(20_000)).await;

    let opened = transport.opened_at();
    let gaps: Vec<u128> = opened
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis())
        .collect();
    assert_eq!(vec![500, 1_000, 2_000, 4_000, 5_000, 5_000], gaps);
    assert_eq!(vec![status(false); 7], drain(&mut updates));
    assert_eq!(StreamState::Backoff, client.state());
    assert!(client.has_pending_reconnect());

    client.unload();
    sleep(Duration::from_millis(30_000)).await;
    assert_eq!(7, transport.opens());
    assert!(drain(&mut updates).is_empty());
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_backoff() {
    let transport = ScriptedTransport::new();
    transport.fail_next();
    transport.fail_next();
    let sender = transport.open_next();
    let (client, mut updates) = client(&transport);

    client.connect();
    sleep(Duration::from_millis(2_000)).await;
    assert_eq!(StreamState::Open, client.state());
    assert_eq!(0, client.reconnect_attempt());

    let closed_at = Instant::now();
    drop(sender);
    sleep(Duration::from_millis(700)).await;

    let opened = transport.opened_at();
    assert_eq!(4, opened.len());
    assert_eq!(Duration::from_millis(500), opened[3] - closed_at);
    assert_eq!(
        vec![status(false), status(false), status(true), status(false), status(false)],
        drain(&mut updates)
    );
}

#[tokio::test(start_paused = true)]
async fn repeated_connect_keeps_a_single_connection() {
    let transport = ScriptedTransport::new();
    let _sender = transport.open_next();
    let (client, mut updates) = client(&transport);

    client.connect();
    client.connect();
    client.connect();
    assert_eq!(StreamState::Connecting, client.state());
    assert_eq!(1, client.opens());

    sleep(Duration::from_millis(10)).await;
    client.connect();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(StreamState::Open, client.state());
    assert_eq!(1, transport.opens());
    assert_eq!(vec![status(true)], drain(&mut updates));
}

#[tokio::test(start_paused = true)]
async fn only_subscribed_and_default_channel_custom_events_are_delivered() {
    let transport = ScriptedTransport::new();
    let sender = transport.open_next();
    let (client, mut updates) = client(&transport);

    client.connect();
    sleep(Duration::from_millis(10)).await;

    sender.send_event("ticket.created", 1_000, json!({"ticketId": "t-1"}));
    sender.send_event("run.step", 1_001, json!({"runId": "r-1"}));
    sender.send_frame(
        "message",
        &custom_frame("ticket.closed", 1_002, json!({"ticketId": "t-1"})),
    );
    sender.send_frame("message", r#"{"type":"RUN_STARTED"}"#);
    sender.send_frame("message", "keep-alive");
    sender.send_frame("message", "");
    sleep(Duration::from_millis(10)).await;

    let received = drain(&mut updates);
    assert_eq!(status(true), received[0]);
    assert_eq!(vec!["ticket.created", "ticket.closed"], event_names(&received));
    assert_eq!(StreamState::Open, client.state());
}

#[tokio::test(start_paused = true)]
async fn missing_timestamp_defaults_to_receipt_time() {
    let transport = ScriptedTransport::new();
    let sender = transport.open_next();
    let clock = Arc::new(ManualClock::new(42_000));
    let (client, mut updates) = client_with(&transport, &["ticket.created"], clock);

    client.connect();
    sleep(Duration::from_millis(10)).await;
    sender.send_frame(
        "ticket.created",
        &json!({"type": "CUSTOM", "name": "ticket.created", "value": {"ticketId": "t-9"}})
            .to_string(),
    );
    sleep(Duration::from_millis(10)).await;

    let received = drain(&mut updates);
    let Some(StreamUpdate::Event(event)) = received.last() else {
        panic!("expected an event, got {received:?}");
    };
    assert_eq!(42_000, event.timestamp);
    assert_eq!(Some("t-9".to_string()), event.correlation_id);
}

#[tokio::test(start_paused = true)]
async fn read_error_schedules_reconnect() {
    let transport = ScriptedTransport::new();
    let sender = transport.open_next();
    let (client, mut updates) = client(&transport);

    client.connect();
    sleep(Duration::from_millis(10)).await;
    sender.fail("invalid utf-8 in chunk");
    sleep(Duration::from_millis(10)).await;

    assert_eq!(StreamState::Backoff, client.state());
    assert!(client.has_pending_reconnect());
    assert_eq!(vec![status(true), status(false)], drain(&mut updates));
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_silent_and_connect_reopens() {
    let transport = ScriptedTransport::new();
    let _first = transport.open_next();
    let (client, mut updates) = client(&transport);

    client.connect();
    sleep(Duration::from_millis(10)).await;
    client.disconnect();
    client.disconnect();

    assert_eq!(StreamState::Closed, client.state());
    assert!(!client.has_pending_reconnect());
    sleep(Duration::from_millis(10_000)).await;
    assert_eq!(1, transport.opens());
    assert_eq!(vec![status(true)], drain(&mut updates));

    let _second = transport.open_next();
    client.connect();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(StreamState::Open, client.state());
    assert_eq!(2, transport.opens());
    assert_eq!(vec![status(true)], drain(&mut updates));
}

#[tokio::test(start_paused = true)]
async fn connect_during_backoff_replaces_the_timer() {
    let transport = ScriptedTransport::new();
    transport.fail_next();
    let _sender = transport.open_next();
    let (client, mut updates) = client(&transport);

    client.connect();
    sleep(Duration::from_millis(100)).await;
    assert!(client.has_pending_reconnect());

    client.connect();
    assert!(!client.has_pending_reconnect());
    sleep(Duration::from_millis(5_000)).await;

    assert_eq!(StreamState::Open, client.state());
    assert_eq!(2, transport.opens());
    assert_eq!(vec![status(false), status(true)], drain(&mut updates));
}

#[tokio::test(start_paused = true)]
async fn unload_cancels_pending_reconnect_for_good() {
    let transport = ScriptedTransport::new();
    transport.fail_next();
    let (client, mut updates) = client(&transport);

    client.connect();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(StreamState::Backoff, client.state());

    client.unload();
    assert_eq!(StreamState::Closed, client.state());
    assert!(!client.has_pending_reconnect());

    client.connect();
    sleep(Duration::from_millis(10_000)).await;

    assert_eq!(StreamState::Closed, client.state());
    assert_eq!(1, transport.opens());
    assert_eq!(vec![status(false)], drain(&mut updates));
}

#[tokio::test(start_paused = true)]
async fn disconnect_on_the_reconnect_instant_stays_closed() {
    let transport = ScriptedTransport::new();
    transport.fail_next();
    let (client, _updates) = client(&transport);

    client.connect();
    sleep(Duration::from_millis(500)).await;
    client.disconnect();
    let opens = client.opens();

    sleep(Duration::from_millis(30_000)).await;

    assert_eq!(StreamState::Closed, client.state());
    assert!(!client.has_pending_reconnect());
    assert_eq!(opens, client.opens());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_racing_the_reconnect_timer_stays_closed() {
    for delay_us in [0_u64, 50, 100, 200, 400, 800] {
        let transport = ScriptedTransport::new();
        transport.fail_next();
        let (client, _updates) = StreamClient::new(
            STREAM_URL,
            &["ticket.created"],
            ReconnectBackoff::new(Duration::from_millis(1), Duration::from_millis(1)),
            transport.clone(),
            Arc::new(TokioClock::new()),
        );

        client.connect();
        sleep(Duration::from_millis(1) + Duration::from_micros(delay_us)).await;
        client.disconnect();
        let opens = client.opens();

        sleep(Duration::from_millis(50)).await;

        assert_eq!(StreamState::Closed, client.state());
        assert!(!client.has_pending_reconnect());
        assert_eq!(opens, client.opens());
    }
}
