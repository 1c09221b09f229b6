use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::ACCEPT;

use crate::error::StreamError;

/// Name of the channel frames without an `event:` field are delivered on.
pub const DEFAULT_CHANNEL: &str = "message";

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

pub type FrameStream = BoxStream<'static, Result<SseFrame, StreamError>>;

/// Opens the long-lived event stream. The returned stream ends when the
/// server closes the connection.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn open(&self, url: &str) -> Result<FrameStream, StreamError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpEventTransport {
    http: reqwest::Client,
}

impl HttpEventTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl EventTransport for HttpEventTransport {
    async fn open(&self, url: &str) -> Result<FrameStream, StreamError> {
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status {
                status: status.as_u16(),
            });
        }

        let frames = response.bytes_stream().eventsource().map(|event| match event {
            Ok(event) => {
                let name = if event.event.is_empty() {
                    DEFAULT_CHANNEL.to_string()
                } else {
                    event.event
                };
                Ok(SseFrame::new(name, event.data))
            }
            Err(err) => Err(StreamError::Protocol(err.to_string())),
        });
        Ok(frames.boxed())
    }
}
