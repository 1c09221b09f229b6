use std::time::Duration;

use livesync_core::RequestClient;
use livesync_core::RequestError;
use livesync_core::request::CallOptions;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_json;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;

#[tokio::test]
async fn get_returns_parsed_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/demo/crm/tasks"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "task-1"}])))
        .expect(1)
        .mount(&server)
        .await;

    let client = RequestClient::new(server.uri());
    let value = client
        .call("/api/demo/crm/tasks", CallOptions::get())
        .await
        .expect("call succeeds");

    assert_eq!(json!([{"id": "task-1"}]), value);
}

#[tokio::test]
async fn post_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/demo/vertice360-workflow/tickets/t-1/assign"))
        .and(body_json(json!({"assignee": "admin"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = RequestClient::new(server.uri());
    let value = client
        .call(
            "/api/demo/vertice360-workflow/tickets/t-1/assign",
            CallOptions::post(json!({"assignee": "admin"})),
        )
        .await
        .expect("call succeeds");

    assert_eq!(json!({"ok": true}), value);
}

#[tokio::test]
async fn no_content_yields_empty_object() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/demo/reset"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = RequestClient::new(server.uri());
    let value = client
        .call("/api/demo/reset", CallOptions::post(json!({})))
        .await
        .expect("call succeeds");

    assert_eq!(json!({}), value);
}

#[tokio::test]
async fn error_body_detail_becomes_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tickets/t-1/close"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({"detail": "Ticket already closed"})),
        )
        .mount(&server)
        .await;

    let client = RequestClient::new(server.uri());
    let err = client
        .call("/tickets/t-1/close", CallOptions::post(json!({})))
        .await
        .expect_err("409 is an error");

    assert_eq!(Some(409), err.status());
    assert_eq!("Ticket already closed", err.user_message());
}

#[tokio::test]
async fn plain_text_error_body_is_used_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let client = RequestClient::new(server.uri());
    let err = client
        .call("/broken", CallOptions::get())
        .await
        .expect_err("502 is an error");

    assert_eq!("upstream unavailable", err.to_string());
}

#[tokio::test]
async fn empty_error_body_falls_back_to_status_line() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = RequestClient::new(server.uri());
    let err = client
        .call("/missing", CallOptions::get())
        .await
        .expect_err("404 is an error");

    assert_eq!("HTTP 404 Not Found", err.to_string());
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = RequestClient::new(server.uri());
    let err = client
        .call(
            "/slow",
            CallOptions::get().with_timeout(Duration::from_millis(50)),
        )
        .await
        .expect_err("deadline elapses first");

    assert!(err.is_timeout(), "unexpected error: {err:?}");
    assert_eq!("The request timed out.", err.user_message());
}

#[tokio::test]
async fn cancelled_token_aborts_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = RequestClient::new(server.uri());
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = client
        .call("/slow", CallOptions::get().with_cancel(token))
        .await
        .expect_err("cancellation wins");

    assert!(matches!(err, RequestError::Cancelled), "unexpected error: {err:?}");
}

#[tokio::test]
async fn invalid_json_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/garbled"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let client = RequestClient::new(server.uri());
    let err = client
        .call("/garbled", CallOptions::get())
        .await
        .expect_err("body is not JSON");

    assert!(matches!(err, RequestError::Decode(_)), "unexpected error: {err:?}");
}
