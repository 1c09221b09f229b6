//! AI workflow studio panel: live view of workflow runs.

use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use livesync_protocol::CustomEvent;
use livesync_protocol::EventName;
use livesync_protocol::events::MessagingEvent;
use livesync_protocol::events::RunEvent;
use livesync_protocol::events::STUDIO_CHANNELS;
use livesync_protocol::status::RunStatus;
use livesync_protocol::value::first_str;
use livesync_protocol::value::str_field;

use super::snapshot_items;
use crate::cache::BoundedLog;
use crate::cache::EntityCache;
use crate::entities::Run;
use crate::entities::RunStep;
use crate::error::RequestResult;
use crate::notify::Notice;
use crate::panel::ApiCall;
use crate::panel::ConnectionStatus;
use crate::panel::Effect;
use crate::panel::Effects;
use crate::panel::PanelLimits;
use crate::panel::PanelState;

pub const RUNS_API: &str = "/api/demo/vertice360-ai-workflow/runs";
pub const WORKFLOW_ID: &str = "vertice360-ai-workflow";
pub const MAX_STEPS: usize = 200;
pub const MAX_INBOUND: usize = 50;

const FIRST_NODE: &str = "normalize_input";

#[derive(Debug, Clone, PartialEq)]
pub enum StudioAction {
    Refresh,
    StartRun { input: String },
    SelectRun(String),
    SetAutoFocus(bool),
    SetActiveTicket(Option<String>),
    ClearEvents,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StudioCall {
    ListRuns,
    StartRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub from: String,
    pub text: String,
    pub timestamp: i64,
}

impl InboundMessage {
    fn from_event(event: &CustomEvent) -> Self {
        let value = &event.value;
        let text = match value.get("text") {
            Some(Value::Object(body)) => str_field(body, "body").unwrap_or_default(),
            Some(Value::String(text)) => text.as_str(),
            _ => "",
        };
        Self {
            message_id: message_id(event).map(str::to_string),
            correlation_id: event.correlation_id.clone(),
            from: first_str(value, &["from", "wa_id"]).unwrap_or("--").to_string(),
            text: text.to_string(),
            timestamp: event.millis_field("receivedAt").unwrap_or(event.timestamp),
        }
    }
}

fn message_id(event: &CustomEvent) -> Option<&str> {
    first_str(&event.value, &["messageId", "message_id", "wamid"])
}

#[derive(Debug, Clone)]
pub struct StudioState {
    runs: EntityCache<Run>,
    active_run_id: Option<String>,
    active_node_id: Option<String>,
    auto_focus_newest: bool,
    live_events: BoundedLog<CustomEvent>,
    inbound: BoundedLog<InboundMessage>,
    event_count: u64,
    last_event_at: Option<i64>,
    active_ticket_id: Option<String>,
    busy: bool,
    connection: ConnectionStatus,
}

impl StudioState {
    pub fn new(limits: PanelLimits) -> Self {
        Self {
            runs: EntityCache::new(limits.pulse_ms),
            active_run_id: None,
            active_node_id: None,
            auto_focus_newest: true,
            live_events: BoundedLog::new(limits.max_live_events),
            inbound: BoundedLog::new(MAX_INBOUND),
            event_count: 0,
            last_event_at: None,
            active_ticket_id: None,
            busy: false,
            connection: ConnectionStatus::default(),
        }
    }

    pub fn runs(&self) -> &EntityCache<Run> {
        &self.runs
    }

    pub fn run(&self, run_id: &str) -> Option<&Run> {
        self.runs.get(run_id)
    }

    pub fn active_run(&self) -> Option<&Run> {
        self.active_run_id.as_deref().and_then(|id| self.runs.get(id))
    }

    pub fn active_run_id(&self) -> Option<&str> {
        self.active_run_id.as_deref()
    }

    pub fn active_node_id(&self) -> Option<&str> {
        self.active_node_id.as_deref()
    }

    pub fn auto_focus_newest(&self) -> bool {
        self.auto_focus_newest
    }

    pub fn live_events(&self) -> &BoundedLog<CustomEvent> {
        &self.live_events
    }

    pub fn inbound_messages(&self) -> &BoundedLog<InboundMessage> {
        &self.inbound
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn last_event_at(&self) -> Option<i64> {
        self.last_event_at
    }

    pub fn active_ticket_id(&self) -> Option<&str> {
        self.active_ticket_id.as_deref()
    }

    pub fn busy(&self) -> bool {
        self.busy
    }

    fn focus(&mut self, run_id: &str) {
        if self.auto_focus_newest {
            self.active_run_id = Some(run_id.to_string());
        }
    }

    fn apply_inbound(&mut self, event: &CustomEvent) {
        if let Some(ticket_id) = event.str_field("ticketId") {
            self.active_ticket_id = Some(ticket_id.to_string());
        }
        if let Some(id) = message_id(event).filter(|id| id.starts_with("wamid"))
            && self
                .inbound
                .iter()
                .any(|seen| seen.message_id.as_deref() == Some(id))
        {
            return;
        }
        self.inbound.push(InboundMessage::from_event(event));
    }

    fn apply_run_event(&mut self, kind: RunEvent, event: &CustomEvent, now_ms: i64) {
        let Some(run_id) = event
            .entity_id(&["runId", "run_id", "id"])
            .map(str::to_string)
        else {
            return;
        };
        let ts = event.timestamp;
        let value = &event.value;
        let known = self.runs.contains(&run_id);
        self.runs.touch(&run_id, ts, now_ms);

        match kind {
            RunEvent::Started => {
                self.runs.update(&run_id, now_ms, |run| {
                    if let Some(workflow_id) = event.str_field("workflowId") {
                        run.workflow_id = Some(workflow_id.to_string());
                    }
                    run.input = value
                        .get("input")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    run.status = RunStatus::Running;
                    run.started_at = Some(event.millis_field("startedAt").unwrap_or(ts));
                    run.ended_at = None;
                    run.steps.clear();
                    run.output = None;
                    run.error = None;
                });
                self.focus(&run_id);
                self.active_node_id = Some(
                    event
                        .str_field("nodeId")
                        .unwrap_or(FIRST_NODE)
                        .to_string(),
                );
            }
            RunEvent::Step => {
                let step = RunStep::from_map(value);
                let status = event.str_field("status").map(RunStatus::parse_lenient);
                let node_id = self.runs.update(&run_id, now_ms, |run| {
                    run.push_step(step, MAX_STEPS);
                    if let Some(status) = status {
                        run.status = status;
                    }
                    run.infer_node_id().map(str::to_string)
                });
                self.focus(&run_id);
                self.active_node_id = node_id;
            }
            RunEvent::Completed => {
                self.runs.update(&run_id, now_ms, |run| {
                    if !known {
                        run.input = "(unknown)".to_string();
                    }
                    run.status = RunStatus::Completed;
                    run.output = value.get("output").filter(|output| !output.is_null()).cloned();
                    run.ended_at = Some(event.millis_field("endedAt").unwrap_or(ts));
                });
                self.focus(&run_id);
                self.active_node_id = None;
            }
            RunEvent::Failed => {
                self.runs.update(&run_id, now_ms, |run| {
                    run.status = RunStatus::Failed;
                    run.error = Some(
                        first_str(value, &["error", "message"])
                            .unwrap_or("Failed")
                            .to_string(),
                    );
                    run.ended_at = Some(event.millis_field("at").unwrap_or(ts));
                });
                self.focus(&run_id);
                self.active_node_id = None;
            }
        }
    }

    fn upsert_runs(&mut self, items: &[Value], now_ms: i64) {
        // Oldest first so the newest listed run ends up at the front.
        for summary in items.iter().rev().filter_map(Value::as_object) {
            let Some(run_id) = first_str(summary, &["runId", "run_id"]) else {
                continue;
            };
            self.runs
                .update(run_id, now_ms, |run| run.merge_patch(summary, MAX_STEPS));
        }
        if self.active_run_id.is_none() {
            self.active_run_id = self.runs.first_id().map(str::to_string);
        }
    }
}

impl PanelState for StudioState {
    type Action = StudioAction;
    type Call = StudioCall;

    fn name(&self) -> &'static str {
        "studio"
    }

    fn channels(&self) -> &'static [&'static str] {
        STUDIO_CHANNELS
    }

    fn accepts(&self, event: &CustomEvent) -> bool {
        matches!(
            event.kind(),
            EventName::Run(_)
                | EventName::HumanActionRequired
                | EventName::Messaging(
                    MessagingEvent::Inbound
                        | MessagingEvent::InboundRaw
                        | MessagingEvent::Outbound
                        | MessagingEvent::Status
                )
        )
    }

    fn init(&mut self, _now_ms: i64) -> Effects<StudioCall> {
        vec![Effect::Call(ApiCall::get(RUNS_API, StudioCall::ListRuns))]
    }

    fn apply_event(&mut self, event: CustomEvent, now_ms: i64) -> Effects<StudioCall> {
        self.event_count += 1;
        self.last_event_at = Some(event.timestamp);
        self.live_events.push(event.clone());

        match event.kind() {
            EventName::Messaging(MessagingEvent::Inbound | MessagingEvent::InboundRaw) => {
                self.apply_inbound(&event);
            }
            EventName::Messaging(MessagingEvent::Outbound) => {
                if let Some(ticket_id) = event.str_field("ticketId") {
                    self.active_ticket_id = Some(ticket_id.to_string());
                }
            }
            EventName::HumanActionRequired => {
                if let Some(ticket_id) = first_str(&event.value, &["ticket_id", "ticketId"]) {
                    self.active_ticket_id = Some(ticket_id.to_string());
                }
            }
            EventName::Run(kind) => self.apply_run_event(kind, &event, now_ms),
            _ => {}
        }
        Vec::new()
    }

    fn handle_action(&mut self, action: StudioAction, _now_ms: i64) -> Effects<StudioCall> {
        match action {
            StudioAction::Refresh => vec![Effect::Call(ApiCall::get(RUNS_API, StudioCall::ListRuns))],
            StudioAction::StartRun { input } => {
                if input.trim().is_empty() || self.busy {
                    return Vec::new();
                }
                self.busy = true;
                vec![Effect::Call(ApiCall::post(
                    RUNS_API,
                    json!({"input": input, "workflowId": WORKFLOW_ID, "mode": "heuristic"}),
                    StudioCall::StartRun,
                ))]
            }
            StudioAction::SelectRun(run_id) => {
                if self.runs.contains(&run_id) {
                    self.active_run_id = Some(run_id);
                    self.auto_focus_newest = false;
                }
                Vec::new()
            }
            StudioAction::SetAutoFocus(enabled) => {
                self.auto_focus_newest = enabled;
                Vec::new()
            }
            StudioAction::SetActiveTicket(ticket_id) => {
                self.active_ticket_id = ticket_id.filter(|id| !id.trim().is_empty());
                Vec::new()
            }
            StudioAction::ClearEvents => {
                self.live_events.clear();
                self.inbound.clear();
                Vec::new()
            }
        }
    }

    fn handle_response(
        &mut self,
        call: StudioCall,
        outcome: RequestResult<Value>,
        now_ms: i64,
    ) -> Effects<StudioCall> {
        match (call, outcome) {
            (StudioCall::ListRuns, Ok(body)) => {
                self.upsert_runs(snapshot_items(&body, &["runs", "items"]), now_ms);
                Vec::new()
            }
            (StudioCall::ListRuns, Err(err)) => {
                tracing::warn!(error = %err, "listing runs failed");
                Vec::new()
            }
            (StudioCall::StartRun, Ok(body)) => {
                self.busy = false;
                let Some(run) = body.as_object() else {
                    return Vec::new();
                };
                let Some(run_id) = first_str(run, &["runId", "run_id"]).map(str::to_string) else {
                    return Vec::new();
                };
                self.runs
                    .update(&run_id, now_ms, |entry| entry.merge_patch(run, MAX_STEPS));
                self.auto_focus_newest = true;
                self.active_run_id = Some(run_id);
                self.active_node_id = Some(FIRST_NODE.to_string());
                Vec::new()
            }
            (StudioCall::StartRun, Err(err)) => {
                self.busy = false;
                vec![Effect::Notify(Notice::error(err.user_message()))]
            }
        }
    }

    fn set_connected(&mut self, connected: bool, now_ms: i64) {
        self.connection = ConnectionStatus {
            connected,
            last_change_ms: now_ms,
        };
    }

    fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    fn next_deadline(&self) -> Option<i64> {
        self.runs.next_deadline()
    }

    fn fire_timers(&mut self, now_ms: i64) -> Effects<StudioCall> {
        self.runs.expire_pulses(now_ms);
        Vec::new()
    }

    fn teardown(&mut self) {
        self.runs.expire_pulses(i64::MAX);
    }

    fn snapshot(&self) -> Value {
        json!({
            "panel": self.name(),
            "connection": self.connection,
            "activeRunId": self.active_run_id,
            "activeNodeId": self.active_node_id,
            "activeTicketId": self.active_ticket_id,
            "autoFocusNewest": self.auto_focus_newest,
            "eventCount": self.event_count,
            "lastEventAt": self.last_event_at,
            "runs": self.runs.iter().collect::<Vec<_>>(),
            "inbound": self.inbound.iter().collect::<Vec<_>>(),
        })
    }
}
