//! Ticket workflow panel.

use std::collections::HashSet;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use strum_macros::AsRefStr;
use strum_macros::Display;

use livesync_protocol::CustomEvent;
use livesync_protocol::EventName;
use livesync_protocol::events::MessagingEvent;
use livesync_protocol::events::TicketEvent;
use livesync_protocol::events::WORKFLOW_CHANNELS;
use livesync_protocol::events::WorkflowEvent;
use livesync_protocol::status::TicketStatus;
use livesync_protocol::value::object_field;
use livesync_protocol::value::str_field;

use super::snapshot_items;
use crate::cache::BoundedLog;
use crate::cache::Entity;
use crate::cache::EntityCache;
use crate::entities::Direction;
use crate::entities::Ticket;
use crate::entities::TicketMessage;
use crate::entities::TimelineEntry;
use crate::error::RequestResult;
use crate::notify::Notice;
use crate::panel::ApiCall;
use crate::panel::ConnectionStatus;
use crate::panel::Effect;
use crate::panel::Effects;
use crate::panel::PanelLimits;
use crate::panel::PanelState;
use crate::reconcile::ReconcileScheduler;
use crate::timers::earliest;

pub const WORKFLOW_API: &str = "/api/demo/vertice360-workflow";

pub const DEFAULT_REQUESTED_DOCS: &[&str] = &[
    "DNI frente",
    "DNI dorso",
    "Comprobante de pago",
    "Formulario reserva",
];

/// Server-side ticket mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum TicketMutation {
    Assign,
    Status,
    Docs,
    Close,
    Escalate,
    SimulateBreach,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowAction {
    Refresh,
    Select(String),
    AssignAdmin(String),
    /// `None` requests the default document list.
    RequestDocs {
        ticket_id: String,
        docs: Option<Vec<String>>,
    },
    ReceiveDocs(String),
    CloseWithDocs(String),
    Escalate(String),
    SetStatus {
        ticket_id: String,
        status: TicketStatus,
    },
    SimulateBreach {
        ticket_id: String,
        sla_type: String,
    },
    ResetDemo,
    ClearEvents,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowCall {
    ListTickets,
    TicketDetail {
        ticket_id: String,
    },
    Mutation {
        ticket_id: String,
        issued_at: i64,
        kind: TicketMutation,
    },
    Reset,
}

/// Live-event log filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// `ticket`, `messaging` or `workflow`; `None` matches all groups.
    pub group: Option<String>,
    pub text: String,
    pub only_selected: bool,
}

#[derive(Debug, Clone)]
pub struct WorkflowState {
    limits: PanelLimits,
    tickets: EntityCache<Ticket>,
    selected: Option<String>,
    tickets_loading: bool,
    tickets_error: Option<String>,
    detail_in_flight: HashSet<String>,
    detail_error: Option<String>,
    live_events: BoundedLog<CustomEvent>,
    connection: ConnectionStatus,
    reconcile: ReconcileScheduler,
}

impl WorkflowState {
    pub fn new(limits: PanelLimits) -> Self {
        Self {
            limits,
            tickets: EntityCache::new(limits.pulse_ms),
            selected: None,
            tickets_loading: false,
            tickets_error: None,
            detail_in_flight: HashSet::new(),
            detail_error: None,
            live_events: BoundedLog::new(limits.max_live_events),
            connection: ConnectionStatus::default(),
            reconcile: ReconcileScheduler::new(limits.reconcile_delay_ms, limits.detail_ttl_ms),
        }
    }

    pub fn tickets(&self) -> &EntityCache<Ticket> {
        &self.tickets
    }

    pub fn ticket(&self, ticket_id: &str) -> Option<&Ticket> {
        self.tickets.get(ticket_id)
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected_ticket(&self) -> Option<&Ticket> {
        self.selected.as_deref().and_then(|id| self.tickets.get(id))
    }

    pub fn tickets_loading(&self) -> bool {
        self.tickets_loading
    }

    pub fn tickets_error(&self) -> Option<&str> {
        self.tickets_error.as_deref()
    }

    pub fn detail_loading(&self) -> bool {
        self.selected
            .as_ref()
            .is_some_and(|id| self.detail_in_flight.contains(id))
    }

    pub fn detail_error(&self) -> Option<&str> {
        self.detail_error.as_deref()
    }

    pub fn live_events(&self) -> &BoundedLog<CustomEvent> {
        &self.live_events
    }

    pub fn live_events_matching<'a>(
        &'a self,
        filter: &'a EventFilter,
    ) -> impl Iterator<Item = &'a CustomEvent> + 'a {
        let needle = filter.text.trim().to_lowercase();
        self.live_events.iter().filter(move |event| {
            if let Some(group) = &filter.group
                && !event.name.starts_with(&format!("{group}."))
            {
                return false;
            }
            if filter.only_selected {
                let selected = self.selected.as_deref();
                if selected.is_none() || event.entity_id(&["ticketId"]) != selected {
                    return false;
                }
            }
            needle.is_empty()
                || event.name.to_lowercase().contains(&needle)
                || Value::Object(event.value.clone())
                    .to_string()
                    .to_lowercase()
                    .contains(&needle)
        })
    }

    pub fn pending_reconciliations(&self) -> usize {
        self.reconcile.pending_checks()
    }

    fn load_snapshot(&mut self) -> Option<Effect<WorkflowCall>> {
        if self.tickets_loading {
            return None;
        }
        self.tickets_loading = true;
        self.tickets_error = None;
        Some(Effect::Call(ApiCall::get(
            format!("{WORKFLOW_API}/tickets"),
            WorkflowCall::ListTickets,
        )))
    }

    fn fetch_detail(&mut self, ticket_id: &str, force: bool, now_ms: i64) -> Option<Effect<WorkflowCall>> {
        if !self.reconcile.should_fetch(ticket_id, now_ms, force) {
            return None;
        }
        if !force && self.detail_in_flight.contains(ticket_id) {
            return None;
        }
        self.detail_in_flight.insert(ticket_id.to_string());
        self.detail_error = None;
        Some(Effect::Call(ApiCall::get(
            format!("{WORKFLOW_API}/tickets/{ticket_id}"),
            WorkflowCall::TicketDetail {
                ticket_id: ticket_id.to_string(),
            },
        )))
    }

    fn mutate(
        &mut self,
        ticket_id: String,
        kind: TicketMutation,
        body: Value,
        now_ms: i64,
    ) -> Effects<WorkflowCall> {
        if ticket_id.trim().is_empty() {
            return Vec::new();
        }
        vec![Effect::Call(ApiCall::post(
            format!("{WORKFLOW_API}/tickets/{ticket_id}/{kind}"),
            body,
            WorkflowCall::Mutation {
                ticket_id,
                issued_at: now_ms,
                kind,
            },
        ))]
    }

    fn clear_tickets(&mut self) {
        self.tickets.reset();
        self.selected = None;
        self.detail_in_flight.clear();
        self.reconcile.clear();
    }

    /// Apply `f` to the ticket, advance `updatedAt` to the event time and
    /// record the event on the timeline.
    fn patch_ticket(
        &mut self,
        ticket_id: &str,
        event: &CustomEvent,
        now_ms: i64,
        f: impl FnOnce(&mut Ticket, usize),
    ) {
        let max_timeline = self.limits.max_timeline;
        self.tickets.update(ticket_id, now_ms, |ticket| {
            f(ticket, max_timeline);
            ticket.observe_update(event.timestamp);
            ticket.push_timeline(TimelineEntry::from_event(event), max_timeline);
        });
    }

    fn apply_ticket_event(&mut self, ticket_id: &str, kind: Option<TicketEvent>, event: &CustomEvent, now_ms: i64) {
        let ts = event.timestamp;
        let value = &event.value;
        self.patch_ticket(ticket_id, event, now_ms, |ticket, max_timeline| match kind {
            Some(TicketEvent::Created) => {
                let snapshot = object_field(value, "ticket").unwrap_or(value);
                ticket.merge_patch(snapshot, max_timeline);
            }
            Some(TicketEvent::Updated) => {
                if let Some(patch) = object_field(value, "patch") {
                    ticket.merge_patch(patch, max_timeline);
                }
            }
            Some(TicketEvent::Assigned) => {
                let mut patch = Map::new();
                for key in ["assignee", "sla"] {
                    if let Some(field) = value.get(key).filter(|field| !field.is_null()) {
                        patch.insert(key.to_string(), field.clone());
                    }
                }
                ticket.merge_patch(&patch, max_timeline);
            }
            Some(TicketEvent::SlaStarted) => {
                if let Some(prefix) = sla_prefix(value) {
                    let due_at = value.get("dueAt").cloned().unwrap_or(Value::Null);
                    ticket.sla.insert(format!("{prefix}DueAt"), due_at);
                    ticket.sla.insert(format!("{prefix}StartedAt"), json!(ts));
                }
            }
            Some(TicketEvent::SlaBreached) => {
                if let Some(prefix) = sla_prefix(value) {
                    let breached_at = value.get("breachedAt").cloned().unwrap_or(json!(ts));
                    ticket.sla.insert(format!("{prefix}BreachedAt"), breached_at);
                }
                ticket.status = TicketStatus::Escalated;
            }
            Some(TicketEvent::Escalated) => ticket.status = TicketStatus::Escalated,
            Some(TicketEvent::Closed) => ticket.status = TicketStatus::Closed,
            Some(TicketEvent::SurveySent | TicketEvent::SurveyReceived) | None => {}
        });
    }

    fn apply_messaging_event(&mut self, ticket_id: &str, kind: MessagingEvent, event: &CustomEvent, now_ms: i64) {
        let ts = event.timestamp;
        match kind {
            MessagingEvent::Delivery => {
                let Some(message_id) = event.str_field("messageId") else {
                    return;
                };
                let message = TicketMessage {
                    message_id: Some(message_id.to_string()),
                    status: event.str_field("status").map(str::to_string),
                    at: Some(event.millis_field("at").unwrap_or(ts)),
                    ..TicketMessage::default()
                };
                self.tickets
                    .update(ticket_id, now_ms, |ticket| ticket.upsert_message(message));
            }
            MessagingEvent::Inbound | MessagingEvent::Outbound => {
                let mut message = TicketMessage::from_map(&event.value);
                message.direction = Some(if kind == MessagingEvent::Outbound {
                    Direction::Outbound
                } else {
                    Direction::Inbound
                });
                let at = ["receivedAt", "sentAt", "at"]
                    .iter()
                    .find_map(|key| event.millis_field(key))
                    .unwrap_or(ts);
                message.at = Some(at);
                message.media_count = message.media_count.or(Some(0));
                let text = message.text.clone();
                self.tickets.update(ticket_id, now_ms, |ticket| {
                    ticket.upsert_message(message);
                    if text.is_some() {
                        ticket.last_message_text = text;
                        ticket.last_message_at = Some(at);
                        ticket.observe_update(ts);
                    }
                });
            }
            MessagingEvent::InboundRaw | MessagingEvent::Status => {}
        }
    }

    fn ingest_detail(&mut self, fallback_id: &str, detail: &Value, now_ms: i64) {
        let Some(detail) = detail.as_object() else {
            return;
        };
        let ticket_id = str_field(detail, "ticketId").unwrap_or(fallback_id).to_string();
        let max_timeline = self.limits.max_timeline;
        self.tickets.update(&ticket_id, now_ms, |ticket| {
            ticket.merge_patch(detail, max_timeline);
            ticket.detail_fetched_at = Some(now_ms);
        });
        self.reconcile.mark_fetched(&ticket_id, now_ms);
    }

    fn ingest_snapshot(&mut self, items: &[Value], now_ms: i64) -> Effects<WorkflowCall> {
        let max_timeline = self.limits.max_timeline;
        let mut order = Vec::with_capacity(items.len());
        for summary in items.iter().filter_map(Value::as_object) {
            let Some(ticket_id) = str_field(summary, "ticketId") else {
                continue;
            };
            self.tickets
                .ensure(ticket_id, now_ms)
                .merge_patch(summary, max_timeline);
            order.push(ticket_id.to_string());
        }
        self.tickets.apply_snapshot_order(&order);
        tracing::debug!(count = order.len(), "ticket snapshot loaded");

        if self.selected.is_none()
            && let Some(first) = order.first().cloned()
        {
            self.selected = Some(first.clone());
            return self.fetch_detail(&first, false, now_ms).into_iter().collect();
        }
        Vec::new()
    }
}

fn sla_prefix(value: &Map<String, Value>) -> Option<&'static str> {
    match str_field(value, "slaType")?.to_ascii_uppercase().as_str() {
        "ASSIGNMENT" => Some("assignment"),
        "DOC_VALIDATION" => Some("docValidation"),
        _ => None,
    }
}

impl PanelState for WorkflowState {
    type Action = WorkflowAction;
    type Call = WorkflowCall;

    fn name(&self) -> &'static str {
        "workflow"
    }

    fn channels(&self) -> &'static [&'static str] {
        WORKFLOW_CHANNELS
    }

    fn accepts(&self, event: &CustomEvent) -> bool {
        let kind = event.kind();
        kind.is_ticket() || kind.is_workflow() || matches!(kind, EventName::Messaging(_))
    }

    fn init(&mut self, _now_ms: i64) -> Effects<WorkflowCall> {
        self.load_snapshot().into_iter().collect()
    }

    fn apply_event(&mut self, event: CustomEvent, now_ms: i64) -> Effects<WorkflowCall> {
        self.live_events.push(event.clone());
        let kind = event.kind();
        let mut effects = Vec::new();

        match &kind {
            EventName::Workflow(WorkflowEvent::Reset) => {
                self.clear_tickets();
                effects.push(Effect::Notify(Notice::info("Workflow reset")));
            }
            EventName::Workflow(WorkflowEvent::Error) => {
                effects.push(Effect::Notify(Notice::error("Workflow error")));
            }
            _ => {}
        }
        if matches!(kind, EventName::Messaging(MessagingEvent::InboundRaw)) {
            return effects;
        }

        let Some(ticket_id) = event.entity_id(&["ticketId"]).map(str::to_string) else {
            return effects;
        };
        self.reconcile.note_event(&ticket_id, now_ms);
        self.tickets.touch(&ticket_id, event.timestamp, now_ms);

        match kind {
            EventName::Ticket(ticket_event) => {
                self.apply_ticket_event(&ticket_id, Some(ticket_event), &event, now_ms);
            }
            EventName::OtherTicket(_) => self.apply_ticket_event(&ticket_id, None, &event, now_ms),
            EventName::Messaging(messaging_event) => {
                self.apply_messaging_event(&ticket_id, messaging_event, &event, now_ms);
            }
            _ => {}
        }
        effects
    }

    fn handle_action(&mut self, action: WorkflowAction, now_ms: i64) -> Effects<WorkflowCall> {
        match action {
            WorkflowAction::Refresh => self.load_snapshot().into_iter().collect(),
            WorkflowAction::Select(ticket_id) => {
                if ticket_id.trim().is_empty() {
                    return Vec::new();
                }
                self.selected = Some(ticket_id.clone());
                self.fetch_detail(&ticket_id, false, now_ms).into_iter().collect()
            }
            WorkflowAction::AssignAdmin(ticket_id) => self.mutate(
                ticket_id,
                TicketMutation::Assign,
                json!({"team": "ADMIN", "name": "Admin - Lucía"}),
                now_ms,
            ),
            WorkflowAction::RequestDocs { ticket_id, docs } => {
                let docs = docs.unwrap_or_else(|| {
                    DEFAULT_REQUESTED_DOCS.iter().map(|doc| doc.to_string()).collect()
                });
                self.mutate(
                    ticket_id,
                    TicketMutation::Docs,
                    json!({"action": "REQUEST", "requestedDocs": docs}),
                    now_ms,
                )
            }
            WorkflowAction::ReceiveDocs(ticket_id) => self.mutate(
                ticket_id,
                TicketMutation::Docs,
                json!({"action": "RECEIVE"}),
                now_ms,
            ),
            WorkflowAction::CloseWithDocs(ticket_id) => self.mutate(
                ticket_id,
                TicketMutation::Close,
                json!({"resolutionCode": "DOCS_VALIDATED", "notes": "Documentacion validada"}),
                now_ms,
            ),
            WorkflowAction::Escalate(ticket_id) => self.mutate(
                ticket_id,
                TicketMutation::Escalate,
                json!({"reason": "MANUAL", "toTeam": "SUPERVISOR"}),
                now_ms,
            ),
            WorkflowAction::SetStatus { ticket_id, status } => self.mutate(
                ticket_id,
                TicketMutation::Status,
                json!({"status": status.as_str()}),
                now_ms,
            ),
            WorkflowAction::SimulateBreach { ticket_id, sla_type } => self.mutate(
                ticket_id,
                TicketMutation::SimulateBreach,
                json!({"slaType": sla_type}),
                now_ms,
            ),
            WorkflowAction::ResetDemo => vec![Effect::Call(ApiCall::post(
                format!("{WORKFLOW_API}/reset"),
                json!({}),
                WorkflowCall::Reset,
            ))],
            WorkflowAction::ClearEvents => {
                self.live_events.clear();
                Vec::new()
            }
        }
    }

    fn handle_response(
        &mut self,
        call: WorkflowCall,
        outcome: RequestResult<Value>,
        now_ms: i64,
    ) -> Effects<WorkflowCall> {
        match (call, outcome) {
            (WorkflowCall::ListTickets, Ok(body)) => {
                self.tickets_loading = false;
                self.ingest_snapshot(snapshot_items(&body, &["tickets", "items"]), now_ms)
            }
            (WorkflowCall::ListTickets, Err(err)) => {
                self.tickets_loading = false;
                tracing::warn!(error = %err, "ticket snapshot failed");
                self.tickets_error = Some(err.user_message());
                Vec::new()
            }
            (WorkflowCall::TicketDetail { ticket_id }, Ok(body)) => {
                self.detail_in_flight.remove(&ticket_id);
                self.ingest_detail(&ticket_id, &body, now_ms);
                Vec::new()
            }
            (WorkflowCall::TicketDetail { ticket_id }, Err(err)) => {
                self.detail_in_flight.remove(&ticket_id);
                tracing::warn!(%ticket_id, error = %err, "ticket detail failed");
                self.detail_error = Some(err.user_message());
                Vec::new()
            }
            (
                WorkflowCall::Mutation {
                    ticket_id,
                    issued_at,
                    kind,
                },
                Ok(_),
            ) => {
                tracing::debug!(%ticket_id, %kind, "ticket action accepted");
                self.reconcile.schedule_check(&ticket_id, issued_at, now_ms);
                Vec::new()
            }
            (WorkflowCall::Mutation { .. }, Err(err)) => {
                vec![Effect::Notify(Notice::error(err.user_message()))]
            }
            (WorkflowCall::Reset, Ok(_)) => {
                vec![Effect::Notify(Notice::info("Reset sent. Waiting for events..."))]
            }
            (WorkflowCall::Reset, Err(err)) => {
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
        earliest([self.tickets.next_deadline(), self.reconcile.next_deadline()])
    }

    fn fire_timers(&mut self, now_ms: i64) -> Effects<WorkflowCall> {
        self.tickets.expire_pulses(now_ms);
        let mut effects = Vec::new();
        for ticket_id in self.reconcile.due_refetches(now_ms) {
            tracing::info!(%ticket_id, "no event after action, refetching");
            effects.extend(self.fetch_detail(&ticket_id, true, now_ms));
        }
        effects
    }

    fn teardown(&mut self) {
        self.reconcile.clear();
        self.tickets.expire_pulses(i64::MAX);
    }

    fn snapshot(&self) -> Value {
        json!({
            "panel": self.name(),
            "connection": self.connection,
            "selectedTicketId": self.selected,
            "ticketsError": self.tickets_error,
            "tickets": self.tickets.iter().collect::<Vec<_>>(),
            "liveEvents": self.live_events.len(),
        })
    }
}
