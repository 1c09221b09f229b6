use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use futures::StreamExt;
use strum_macros::Display;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use livesync_async_utils::OrAbortExt;
use livesync_protocol::CustomEvent;
use livesync_protocol::envelope;

use super::backoff::ReconnectBackoff;
use super::transport::DEFAULT_CHANNEL;
use super::transport::EventTransport;
use super::transport::SseFrame;
use crate::clock::Clock;
use crate::config::LiveSyncConfig;
use crate::error::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StreamState {
    Idle,
    Connecting,
    Open,
    /// Waiting for the reconnect timer.
    Backoff,
    Closed,
}

/// What the client reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    Status { connected: bool },
    Event(CustomEvent),
}

#[derive(Debug)]
struct Inner {
    state: StreamState,
    attempt: u32,
    unloading: bool,
    /// Bumped on every connect and disconnect; callbacks from an older
    /// connection compare against it and bail out.
    generation: u64,
    connection: Option<CancellationToken>,
    reconnect_timer: Option<CancellationToken>,
    opens: u64,
}

struct Shared {
    url: String,
    channels: HashSet<String>,
    backoff: ReconnectBackoff,
    transport: Arc<dyn EventTransport>,
    clock: Arc<dyn Clock>,
    updates: mpsc::UnboundedSender<StreamUpdate>,
    inner: Mutex<Inner>,
}

/// Reconnecting event-stream client.
///
/// At most one connection is live at a time and at most one reconnect
/// timer is pending. Failures schedule a reconnect with exponential
/// backoff; a successful open resets the attempt counter. After
/// [`unload`](Self::unload) nothing reconnects and no status is reported.
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct StreamClient {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("url", &self.shared.url)
            .field("state", &self.state())
            .finish()
    }
}

impl StreamClient {
    pub fn new(
        url: impl Into<String>,
        channels: &[&str],
        backoff: ReconnectBackoff,
        transport: Arc<dyn EventTransport>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<StreamUpdate>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            url: url.into(),
            channels: channels.iter().map(|channel| channel.to_string()).collect(),
            backoff,
            transport,
            clock,
            updates,
            inner: Mutex::new(Inner {
                state: StreamState::Idle,
                attempt: 0,
                unloading: false,
                generation: 0,
                connection: None,
                reconnect_timer: None,
                opens: 0,
            }),
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    pub fn from_config(
        config: &LiveSyncConfig,
        channels: &[&str],
        transport: Arc<dyn EventTransport>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<StreamUpdate>) {
        let backoff = ReconnectBackoff::new(config.reconnect_base(), config.reconnect_max());
        Self::new(config.stream_url(), channels, backoff, transport, clock)
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> StreamState {
        self.lock().state
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.lock().attempt
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.lock().reconnect_timer.is_some()
    }

    /// Connections started so far.
    pub fn opens(&self) -> u64 {
        self.lock().opens
    }

    /// Open the stream unless a connection is already open or in progress.
    /// A pending reconnect timer is cancelled.
    pub fn connect(&self) {
        let started = self.begin_connect(&mut self.lock());
        if let Some((generation, token)) = started {
            self.spawn_connection(generation, token);
        }
    }

    /// Close the connection and drop any pending reconnect. Idempotent and
    /// silent: no status update is emitted.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        if let Some(timer) = inner.reconnect_timer.take() {
            timer.cancel();
        }
        if let Some(connection) = inner.connection.take() {
            connection.cancel();
        }
        inner.generation += 1;
        if inner.state != StreamState::Closed {
            tracing::info!(url = %self.shared.url, "event stream closed");
        }
        inner.state = StreamState::Closed;
    }

    /// Permanently stop: disconnect and refuse further connects.
    pub fn unload(&self) {
        self.lock().unloading = true;
        self.disconnect();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `Connecting` under the caller's guard. Returns the new
    /// connection's generation and token, or `None` when a connection is
    /// already open or in progress.
    fn begin_connect(&self, inner: &mut Inner) -> Option<(u64, CancellationToken)> {
        if inner.unloading || matches!(inner.state, StreamState::Connecting | StreamState::Open) {
            return None;
        }
        if let Some(timer) = inner.reconnect_timer.take() {
            timer.cancel();
        }
        if let Some(connection) = inner.connection.take() {
            connection.cancel();
        }
        inner.generation += 1;
        inner.state = StreamState::Connecting;
        inner.opens += 1;
        let token = CancellationToken::new();
        inner.connection = Some(token.clone());
        Some((inner.generation, token))
    }

    fn spawn_connection(&self, generation: u64, token: CancellationToken) {
        let client = self.clone();
        tokio::spawn(async move {
            let _ = client.run_connection(generation).or_cancel(&token).await;
        });
    }

    fn emit(&self, update: StreamUpdate) {
        let _ = self.shared.updates.send(update);
    }

    async fn run_connection(&self, generation: u64) {
        tracing::debug!(url = %self.shared.url, "opening event stream");
        let mut frames = match self.shared.transport.open(&self.shared.url).await {
            Ok(frames) => frames,
            Err(err) => {
                self.handle_failure(generation, err);
                return;
            }
        };
        if !self.mark_open(generation) {
            return;
        }
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(frame) => self.dispatch(generation, frame),
                Err(err) => {
                    self.handle_failure(generation, err);
                    return;
                }
            }
        }
        self.handle_failure(generation, StreamError::Closed);
    }

    fn mark_open(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.unloading {
            return false;
        }
        inner.state = StreamState::Open;
        inner.attempt = 0;
        tracing::info!(url = %self.shared.url, "event stream connected");
        self.emit(StreamUpdate::Status { connected: true });
        true
    }

    fn dispatch(&self, generation: u64, frame: SseFrame) {
        if self.lock().generation != generation {
            return;
        }
        if frame.event != DEFAULT_CHANNEL && !self.shared.channels.contains(&frame.event) {
            tracing::debug!(channel = %frame.event, "ignoring frame on unsubscribed channel");
            return;
        }
        let received_at = self.shared.clock.now_ms();
        match envelope::parse(Some(&frame.data), received_at).into_custom() {
            Some(event) => {
                tracing::debug!(name = %event.name, channel = %frame.event, "event received");
                self.emit(StreamUpdate::Event(event));
            }
            None => tracing::debug!(channel = %frame.event, "dropping non-custom frame"),
        }
    }

    fn handle_failure(&self, generation: u64, err: StreamError) {
        let (delay, token) = {
            let mut inner = self.lock();
            if inner.generation != generation
                || inner.unloading
                || inner.state == StreamState::Closed
            {
                return;
            }
            inner.state = StreamState::Backoff;
            inner.connection = None;
            if inner.reconnect_timer.is_some() {
                return;
            }
            let delay = self.shared.backoff.delay(inner.attempt);
            let token = CancellationToken::new();
            inner.reconnect_timer = Some(token.clone());
            tracing::warn!(
                url = %self.shared.url,
                error = %err,
                attempt = inner.attempt,
                delay_ms = delay.as_millis() as u64,
                "event stream lost, reconnect scheduled"
            );
            self.emit(StreamUpdate::Status { connected: false });
            (delay, token)
        };

        let client = self.clone();
        tokio::spawn(async move {
            if tokio::time::sleep(delay).or_cancel(&token).await.is_ok() {
                client.fire_reconnect(&token);
            }
        });
    }

    fn fire_reconnect(&self, token: &CancellationToken) {
        let started = {
            let mut inner = self.lock();
            // Cancellation happens under the lock, so an uncancelled token
            // is the pending timer. The reconnect starts under the same guard.
            if inner.unloading || token.is_cancelled() {
                return;
            }
            inner.reconnect_timer = None;
            inner.attempt += 1;
            self.begin_connect(&mut inner)
        };
        if let Some((generation, token)) = started {
            self.spawn_connection(generation, token);
        }
    }
}
