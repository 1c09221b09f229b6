use std::sync::Arc;
use std::time::Duration;

use core_test_support::RecordingSink;
use core_test_support::ScriptedTransport;
use core_test_support::wait_for_state;
use core_test_support::wait_until;
use livesync_core::LiveSyncConfig;
use livesync_core::PanelDeps;
use livesync_core::PanelHandle;
use livesync_core::PanelLimits;
use livesync_core::PanelRuntime;
use livesync_core::PanelState;
use livesync_core::RequestClient;
use livesync_core::clock::Clock;
use livesync_core::clock::SystemClock;
use livesync_core::notify::Tone;
use livesync_core::panels::WorkflowAction;
use livesync_core::panels::WorkflowState;
use livesync_core::stream::StreamState;
use livesync_protocol::status::TicketStatus;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

const TICKETS_PATH: &str = "/api/demo/vertice360-workflow/tickets";
const DETAIL_PATH: &str = "/api/demo/vertice360-workflow/tickets/t-1";
const ESCALATE_PATH: &str = "/api/demo/vertice360-workflow/tickets/t-1/escalate";

struct Harness {
    server: MockServer,
    transport: Arc<ScriptedTransport>,
    sink: Arc<RecordingSink>,
    config: LiveSyncConfig,
}

impl Harness {
    async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TICKETS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tickets": [
                    {"ticketId": "t-1", "status": "OPEN", "subject": "Documentos pendientes"},
                    {"ticketId": "t-2", "status": "IN_PROGRESS"},
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(DETAIL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ticketId": "t-1",
                "status": "OPEN",
                "channel": "whatsapp",
            })))
            .mount(&server)
            .await;

        let config = LiveSyncConfig {
            base_url: server.uri(),
            reconcile_delay_ms: 200,
            pulse_ms: 50,
            ..LiveSyncConfig::default()
        };
        Self {
            server,
            transport: ScriptedTransport::new(),
            sink: RecordingSink::new(),
            config,
        }
    }

    fn spawn(&self) -> PanelHandle<WorkflowState> {
        let deps = PanelDeps {
            request: RequestClient::from_config(&self.config),
            transport: self.transport.clone(),
            sink: self.sink.clone(),
            clock: Arc::new(SystemClock),
        };
        let state = WorkflowState::new(PanelLimits::from_config(&self.config));
        PanelRuntime::create(&self.config, state, deps)
    }

    async fn requests_to(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == request_path)
            .count()
    }

    async fn wait_for_requests(&self, request_path: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.requests_to(request_path).await < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for requests");
    }
}

fn now_ms() -> i64 {
    SystemClock.now_ms()
}

/// Init, wait for the snapshot, the first detail and the stream.
async fn ready(harness: &Harness) -> PanelHandle<WorkflowState> {
    let handle = harness.spawn();
    handle.init().await.expect("runtime alive");
    let mut states = handle.subscribe();
    wait_for_state(&mut states, |state| {
        state.connection().connected
            && state
                .ticket("t-1")
                .is_some_and(|ticket| ticket.detail_fetched_at.is_some())
    })
    .await;
    handle
}

#[tokio::test]
async fn init_loads_snapshot_and_applies_stream_events() {
    let harness = Harness::start().await;
    let sender = harness.transport.open_next();
    let handle = ready(&harness).await;

    let state = handle.current();
    let order: Vec<&str> = state.tickets().order().iter().map(String::as_str).collect();
    assert_eq!(vec!["t-1", "t-2"], order);
    assert_eq!(Some("t-1"), state.selected_id());
    assert_eq!(Some("whatsapp"), state.ticket("t-1").and_then(|t| t.channel.as_deref()));

    sender.send_event("ticket.escalated", now_ms(), json!({"ticketId": "t-2"}));
    let mut states = handle.subscribe();
    let state = wait_for_state(&mut states, |state| {
        state
            .ticket("t-2")
            .is_some_and(|ticket| ticket.status == TicketStatus::Escalated)
    })
    .await;

    assert_eq!(1, state.live_events().len());
    assert!(harness.sink.messages().contains(&"Stream connected".to_string()));

    handle.teardown().await.expect("teardown");
}

#[tokio::test]
async fn unacknowledged_action_triggers_one_refetch() {
    let harness = Harness::start().await;
    Mock::given(method("POST"))
        .and(path(ESCALATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&harness.server)
        .await;
    let _sender = harness.transport.open_next();
    let handle = ready(&harness).await;
    assert_eq!(1, harness.requests_to(DETAIL_PATH).await);

    handle
        .dispatch(WorkflowAction::Escalate("t-1".to_string()))
        .await
        .expect("runtime alive");

    harness.wait_for_requests(DETAIL_PATH, 2).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(2, harness.requests_to(DETAIL_PATH).await);
    assert_eq!(0, handle.current().pending_reconciliations());

    handle.teardown().await.expect("teardown");
}

#[tokio::test]
async fn no_content_action_still_reconciles() {
    let harness = Harness::start().await;
    Mock::given(method("POST"))
        .and(path(ESCALATE_PATH))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&harness.server)
        .await;
    let _sender = harness.transport.open_next();
    let handle = ready(&harness).await;

    handle
        .dispatch(WorkflowAction::Escalate("t-1".to_string()))
        .await
        .expect("runtime alive");

    harness.wait_for_requests(DETAIL_PATH, 2).await;
    assert!(harness.sink.notices().iter().all(|notice| notice.tone != Tone::Error));

    handle.teardown().await.expect("teardown");
}

#[tokio::test]
async fn echoed_action_does_not_refetch() {
    let harness = Harness::start().await;
    Mock::given(method("POST"))
        .and(path(ESCALATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&harness.server)
        .await;
    let sender = harness.transport.open_next();
    let handle = ready(&harness).await;

    handle
        .dispatch(WorkflowAction::Escalate("t-1".to_string()))
        .await
        .expect("runtime alive");
    sender.send_event("ticket.escalated", now_ms(), json!({"ticketId": "t-1"}));

    let mut states = handle.subscribe();
    wait_for_state(&mut states, |state| {
        state
            .ticket("t-1")
            .is_some_and(|ticket| ticket.status == TicketStatus::Escalated)
    })
    .await;
    harness.wait_for_requests(ESCALATE_PATH, 1).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(1, harness.requests_to(DETAIL_PATH).await);

    handle.teardown().await.expect("teardown");
}

#[tokio::test]
async fn failed_action_surfaces_server_message() {
    let harness = Harness::start().await;
    Mock::given(method("POST"))
        .and(path(ESCALATE_PATH))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({"detail": "Ticket already closed"})),
        )
        .mount(&harness.server)
        .await;
    let _sender = harness.transport.open_next();
    let handle = ready(&harness).await;

    handle
        .dispatch(WorkflowAction::Escalate("t-1".to_string()))
        .await
        .expect("runtime alive");

    let sink = harness.sink.clone();
    wait_until(move || sink.messages().contains(&"Ticket already closed".to_string())).await;
    assert_eq!(0, handle.current().pending_reconciliations());

    handle.teardown().await.expect("teardown");
}

#[tokio::test]
async fn disconnect_marks_panel_offline_without_error_notice() {
    let harness = Harness::start().await;
    let _sender = harness.transport.open_next();
    let handle = ready(&harness).await;

    handle.disconnect().expect("runtime alive");
    let mut states = handle.subscribe();
    wait_for_state(&mut states, |state| !state.connection().connected).await;

    assert_eq!(StreamState::Closed, handle.stream().state());
    assert!(!harness.sink.messages().contains(&"Stream connection lost".to_string()));

    handle.teardown().await.expect("teardown");
}

#[tokio::test]
async fn teardown_stops_stream_and_abandons_slow_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TICKETS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;
    let config = LiveSyncConfig {
        base_url: server.uri(),
        ..LiveSyncConfig::default()
    };
    let transport = ScriptedTransport::new();
    let _sender = transport.open_next();
    let sink = RecordingSink::new();
    let deps = PanelDeps::from_config(&config).with_sink(sink.clone());
    let deps = PanelDeps {
        transport: transport.clone(),
        ..deps
    };
    let handle = PanelRuntime::create(
        &config,
        WorkflowState::new(PanelLimits::from_config(&config)),
        deps,
    );

    handle.init().await.expect("runtime alive");
    let stream = handle.stream().clone();
    let mut states = handle.subscribe();
    wait_for_state(&mut states, |state| state.connection().connected && state.tickets_loading()).await;

    tokio::time::timeout(Duration::from_secs(2), handle.teardown())
        .await
        .expect("teardown does not wait for the slow call")
        .expect("runtime alive");

    assert_eq!(StreamState::Closed, stream.state());
    assert!(!stream.has_pending_reconnect());
    assert!(!sink.messages().contains(&"Stream connection lost".to_string()));
}
