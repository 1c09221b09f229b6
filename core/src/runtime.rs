//! Runs one panel on a dedicated task.
//!
//! The task exclusively owns the panel state. Stream updates, dispatched
//! actions, REST completions and timer expiries are handled one at a time
//! in arrival order, and a snapshot is published after each.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::config::LiveSyncConfig;
use crate::error::RequestResult;
use crate::error::RuntimeStopped;
use crate::notify::NotificationSink;
use crate::notify::Notice;
use crate::notify::TracingSink;
use crate::panel::Effect;
use crate::panel::Effects;
use crate::panel::PanelState;
use crate::request::CallOptions;
use crate::request::RequestClient;
use crate::stream::EventTransport;
use crate::stream::HttpEventTransport;
use crate::stream::StreamClient;
use crate::stream::StreamUpdate;

/// Collaborators a panel runtime talks to.
#[derive(Clone)]
pub struct PanelDeps {
    pub request: RequestClient,
    pub transport: Arc<dyn EventTransport>,
    pub sink: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
}

impl PanelDeps {
    pub fn from_config(config: &LiveSyncConfig) -> Self {
        Self {
            request: RequestClient::from_config(config),
            transport: Arc::new(HttpEventTransport::default()),
            sink: Arc::new(TracingSink),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }
}

enum Command<A> {
    Init(oneshot::Sender<()>),
    Dispatch(A, oneshot::Sender<()>),
    Connect,
    Disconnect,
    Teardown(oneshot::Sender<()>),
}

pub struct PanelRuntime;

impl PanelRuntime {
    /// Spawn the panel task. Nothing is fetched or connected until
    /// [`PanelHandle::init`].
    pub fn create<S: PanelState>(config: &LiveSyncConfig, state: S, deps: PanelDeps) -> PanelHandle<S> {
        let (stream, updates) = StreamClient::from_config(
            config,
            state.channels(),
            deps.transport.clone(),
            deps.clock.clone(),
        );
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (publisher, snapshots) = watch::channel(Arc::new(state.clone()));

        let actor = PanelActor {
            state,
            stream: stream.clone(),
            updates,
            commands,
            calls: JoinSet::new(),
            cancel: CancellationToken::new(),
            request: deps.request,
            sink: deps.sink,
            clock: deps.clock,
            publisher,
            unloading: false,
        };
        let task = tokio::spawn(actor.run());

        PanelHandle {
            commands: commands_tx,
            snapshots,
            stream,
            task,
        }
    }
}

/// Owner-side handle of a running panel.
pub struct PanelHandle<S: PanelState> {
    commands: mpsc::UnboundedSender<Command<S::Action>>,
    snapshots: watch::Receiver<Arc<S>>,
    stream: StreamClient,
    task: JoinHandle<()>,
}

impl<S: PanelState> PanelHandle<S> {
    /// Load the initial snapshots and connect the stream.
    pub async fn init(&self) -> Result<(), RuntimeStopped> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Init(ack))?;
        done.await.map_err(|_| RuntimeStopped)
    }

    /// Apply a user action. Resolves once the reducer has run; the REST
    /// calls it issued complete later.
    pub async fn dispatch(&self, action: S::Action) -> Result<(), RuntimeStopped> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Dispatch(action, ack))?;
        done.await.map_err(|_| RuntimeStopped)
    }

    pub fn connect(&self) -> Result<(), RuntimeStopped> {
        self.send(Command::Connect)
    }

    pub fn disconnect(&self) -> Result<(), RuntimeStopped> {
        self.send(Command::Disconnect)
    }

    /// Receiver that always holds the latest published state.
    pub fn subscribe(&self) -> watch::Receiver<Arc<S>> {
        self.snapshots.clone()
    }

    pub fn current(&self) -> Arc<S> {
        self.snapshots.borrow().clone()
    }

    pub fn stream(&self) -> &StreamClient {
        &self.stream
    }

    /// Stop the stream, cancel in-flight calls and end the task.
    pub async fn teardown(self) -> Result<(), RuntimeStopped> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Teardown(ack))?;
        done.await.map_err(|_| RuntimeStopped)?;
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "panel task ended abnormally");
        }
        Ok(())
    }

    fn send(&self, command: Command<S::Action>) -> Result<(), RuntimeStopped> {
        self.commands.send(command).map_err(|_| RuntimeStopped)
    }
}

struct PanelActor<S: PanelState> {
    state: S,
    stream: StreamClient,
    updates: mpsc::UnboundedReceiver<StreamUpdate>,
    commands: mpsc::UnboundedReceiver<Command<S::Action>>,
    calls: JoinSet<(S::Call, RequestResult<Value>)>,
    /// Parent of every in-flight call's token.
    cancel: CancellationToken,
    request: RequestClient,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    publisher: watch::Sender<Arc<S>>,
    unloading: bool,
}

impl<S: PanelState> PanelActor<S> {
    async fn run(mut self) {
        tracing::debug!(panel = self.state.name(), "panel task started");
        loop {
            let wait = self
                .state
                .next_deadline()
                .map(|at| Duration::from_millis((at - self.clock.now_ms()).max(0) as u64));
            let timer = async move {
                match wait {
                    Some(wait) => tokio::time::sleep(wait).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Teardown(ack)) => {
                        self.shutdown();
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(update) = self.updates.recv() => self.handle_update(update),
                Some(joined) = self.calls.join_next(), if !self.calls.is_empty() => match joined {
                    Ok((call, outcome)) => {
                        let effects = self.state.handle_response(call, outcome, self.clock.now_ms());
                        self.run_effects(effects);
                    }
                    Err(err) => tracing::warn!(error = %err, "request task failed"),
                },
                () = timer => {
                    let effects = self.state.fire_timers(self.clock.now_ms());
                    self.run_effects(effects);
                }
            }
            self.publish();
        }
        tracing::debug!(panel = self.state.name(), "panel task stopped");
    }

    fn handle_command(&mut self, command: Command<S::Action>) {
        let now = self.clock.now_ms();
        match command {
            Command::Init(ack) => {
                let effects = self.state.init(now);
                self.run_effects(effects);
                self.stream.connect();
                let _ = ack.send(());
            }
            Command::Dispatch(action, ack) => {
                tracing::debug!(panel = self.state.name(), ?action, "action");
                let effects = self.state.handle_action(action, now);
                self.run_effects(effects);
                let _ = ack.send(());
            }
            Command::Connect => self.stream.connect(),
            Command::Disconnect => {
                self.stream.disconnect();
                self.state.set_connected(false, now);
            }
            Command::Teardown(ack) => {
                self.shutdown();
                let _ = ack.send(());
            }
        }
    }

    fn handle_update(&mut self, update: StreamUpdate) {
        let now = self.clock.now_ms();
        match update {
            StreamUpdate::Status { connected } => {
                self.state.set_connected(connected, now);
                if connected {
                    self.sink.notify(Notice::info("Stream connected"));
                } else if !self.unloading {
                    self.sink.notify(Notice::error("Stream connection lost"));
                }
            }
            StreamUpdate::Event(event) => {
                if !self.state.accepts(&event) {
                    tracing::debug!(panel = self.state.name(), name = %event.name, "event not for this panel");
                    return;
                }
                let effects = self.state.apply_event(event, now);
                self.run_effects(effects);
            }
        }
    }

    fn run_effects(&mut self, effects: Effects<S::Call>) {
        for effect in effects {
            match effect {
                Effect::Notify(notice) => self.sink.notify(notice),
                Effect::Call(call) => {
                    let options = CallOptions {
                        method: call.method,
                        body: call.body,
                        timeout: None,
                        cancel: Some(self.cancel.child_token()),
                    };
                    let request = self.request.clone();
                    let path = call.path;
                    let purpose = call.purpose;
                    self.calls.spawn(async move {
                        let outcome = request.call(&path, options).await;
                        (purpose, outcome)
                    });
                }
            }
        }
    }

    fn shutdown(&mut self) {
        self.unloading = true;
        self.stream.unload();
        self.cancel.cancel();
        self.calls.abort_all();
        self.state.teardown();
        self.publish();
    }

    fn publish(&self) {
        self.publisher.send_replace(Arc::new(self.state.clone()));
    }
}
