#![allow(clippy::expect_used)]

//! Shared helpers for the `livesync-core` integration tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::Instant;
use wiremock::ResponseTemplate;

use livesync_core::error::StreamError;
use livesync_core::notify::NotificationSink;
use livesync_core::notify::Notice;
use livesync_core::stream::EventTransport;
use livesync_core::stream::FrameStream;
use livesync_core::stream::SseFrame;

/// `data:` payload of a CUSTOM envelope.
pub fn custom_frame(name: &str, timestamp: i64, value: Value) -> String {
    json!({
        "type": "CUSTOM",
        "name": name,
        "timestamp": timestamp,
        "value": value,
    })
    .to_string()
}

/// Encode `(event, data)` pairs as an SSE body. `None` omits the `event:`
/// line.
pub fn sse_body(frames: &[(Option<&str>, &str)]) -> String {
    let mut body = String::new();
    for (event, data) in frames {
        if let Some(event) = event {
            body.push_str(&format!("event: {event}\n"));
        }
        for line in data.lines() {
            body.push_str(&format!("data: {line}\n"));
        }
        body.push('\n');
    }
    body
}

pub fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_raw(body, "text/event-stream")
}

type FrameResult = Result<SseFrame, StreamError>;

enum Step {
    Fail,
    Stream(mpsc::UnboundedReceiver<FrameResult>),
}

/// Feeds frames into a connection opened through [`ScriptedTransport`].
/// Dropping it ends the stream as a server close would.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<FrameResult>,
}

impl FrameSender {
    pub fn send_frame(&self, event: &str, data: &str) {
        let _ = self.tx.send(Ok(SseFrame::new(event, data)));
    }

    pub fn send_event(&self, name: &str, timestamp: i64, value: Value) {
        self.send_frame(name, &custom_frame(name, timestamp, value));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Err(StreamError::Protocol(reason.to_string())));
    }
}

/// Stream transport driven by a script of outcomes, one per `open`.
/// Opens past the end of the script fail with HTTP 503.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    opened_at: Mutex<Vec<Instant>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self) {
        self.script.lock().expect("script").push_back(Step::Fail);
    }

    /// Queue a successful open and return the sender for its frames.
    pub fn open_next(&self) -> FrameSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script.lock().expect("script").push_back(Step::Stream(rx));
        FrameSender { tx }
    }

    pub fn opens(&self) -> usize {
        self.opened_at.lock().expect("opens").len()
    }

    pub fn opened_at(&self) -> Vec<Instant> {
        self.opened_at.lock().expect("opens").clone()
    }
}

#[async_trait]
impl EventTransport for ScriptedTransport {
    async fn open(&self, _url: &str) -> Result<FrameStream, StreamError> {
        self.opened_at.lock().expect("opens").push(Instant::now());
        let step = self.script.lock().expect("script").pop_front();
        match step {
            Some(Step::Stream(rx)) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|frame| (frame, rx))
            })
            .boxed()),
            Some(Step::Fail) | None => Err(StreamError::Status { status: 503 }),
        }
    }
}

/// Notification sink that keeps everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().expect("notices").clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.notices()
            .into_iter()
            .map(|notice| notice.message)
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notice: Notice) {
        self.notices.lock().expect("notices").push(notice);
    }
}

/// Wait until the published state satisfies `predicate`, failing the test
/// after five seconds.
pub async fn wait_for_state<S, F>(rx: &mut watch::Receiver<Arc<S>>, mut predicate: F) -> Arc<S>
where
    F: FnMut(&S) -> bool,
{
    let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|state| predicate(state)))
        .await
        .expect("timed out waiting for panel state")
        .expect("panel runtime stopped");
    state.clone()
}

/// Poll `condition` every 10ms, failing the test after five seconds.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}
