use std::sync::Arc;
use std::time::Duration;

use core_test_support::custom_frame;
use core_test_support::sse_body;
use core_test_support::sse_response;
use futures::StreamExt;
use livesync_core::StreamClient;
use livesync_core::StreamError;
use livesync_core::clock::SystemClock;
use livesync_core::stream::EventTransport;
use livesync_core::stream::HttpEventTransport;
use livesync_core::stream::ReconnectBackoff;
use livesync_core::stream::SseFrame;
use livesync_core::stream::StreamState;
use livesync_core::stream::StreamUpdate;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;

const STREAM_PATH: &str = "/api/agui/stream";

async fn mount_stream(server: &MockServer, body: String) {
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .and(header("accept", "text/event-stream"))
        .respond_with(sse_response(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn frames_carry_event_name_and_default_channel() {
    let server = MockServer::start().await;
    let created = custom_frame("ticket.created", 1_000, json!({"ticketId": "t-1"}));
    let heartbeat = json!({"type": "HEARTBEAT"}).to_string();
    mount_stream(
        &server,
        sse_body(&[(Some("ticket.created"), &created), (None, &heartbeat)]),
    )
    .await;

    let transport = HttpEventTransport::default();
    let frames: Vec<SseFrame> = transport
        .open(&format!("{}{STREAM_PATH}", server.uri()))
        .await
        .expect("stream opens")
        .map(|frame| frame.expect("frame decodes"))
        .collect()
        .await;

    assert_eq!(
        vec![
            SseFrame::new("ticket.created", created),
            SseFrame::new("message", heartbeat),
        ],
        frames
    );
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let transport = HttpEventTransport::default();
    let err = match transport
        .open(&format!("{}{STREAM_PATH}", server.uri()))
        .await
    {
        Ok(_) => panic!("500 must not open a stream"),
        Err(err) => err,
    };

    assert!(
        matches!(err, StreamError::Status { status: 500 }),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn client_delivers_events_over_http_then_reports_close() {
    let server = MockServer::start().await;
    let created = custom_frame("ticket.created", 1_000, json!({"ticketId": "t-1"}));
    let foreign = custom_frame("other.thing", 1_001, json!({}));
    mount_stream(
        &server,
        sse_body(&[
            (Some("ticket.created"), &created),
            (Some("other.thing"), &foreign),
        ]),
    )
    .await;

    let (client, mut updates) = StreamClient::new(
        format!("{}{STREAM_PATH}", server.uri()),
        &["ticket.created"],
        ReconnectBackoff::new(Duration::from_secs(30), Duration::from_secs(30)),
        Arc::new(HttpEventTransport::default()),
        Arc::new(SystemClock),
    );
    client.connect();

    let mut received = Vec::new();
    while received.len() < 3 {
        let update = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .expect("update arrives")
            .expect("client alive");
        received.push(update);
    }

    assert_eq!(StreamUpdate::Status { connected: true }, received[0]);
    let StreamUpdate::Event(event) = &received[1] else {
        panic!("expected an event, got {:?}", received[1]);
    };
    assert_eq!("ticket.created", event.name);
    assert_eq!(Some("t-1"), event.value.get("ticketId").and_then(|v| v.as_str()));
    assert_eq!(StreamUpdate::Status { connected: false }, received[2]);
    assert_eq!(StreamState::Backoff, client.state());

    client.unload();
    assert_eq!(StreamState::Closed, client.state());
    assert!(!client.has_pending_reconnect());
}
