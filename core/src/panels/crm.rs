//! CRM panel: inbox conversations, the deal pipeline and tasks.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use strum_macros::Display;

use livesync_protocol::CustomEvent;
use livesync_protocol::EventName;
use livesync_protocol::events::CRM_CHANNELS;
use livesync_protocol::events::CRM_PREFIXES;
use livesync_protocol::events::CrmEvent;
use livesync_protocol::value::str_field;

use super::snapshot_items;
use crate::cache::BoundedLog;
use crate::cache::Entity;
use crate::cache::EntityCache;
use crate::entities::Conversation;
use crate::entities::CrmMessage;
use crate::entities::Deal;
use crate::entities::Task;
use crate::error::RequestError;
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

pub const CRM_API: &str = "/api/demo/crm";

/// Pipeline columns, in board order.
pub const PIPELINE_STAGES: &[(&str, &str)] = &[
    ("stage-contacted", "New"),
    ("stage-qualification", "Qualified"),
    ("stage-visit", "Visit Scheduled"),
    ("stage-offer", "Offer"),
    ("stage-won", "Won"),
    ("stage-lost", "Lost"),
];

#[derive(Debug, Clone, PartialEq)]
pub enum CrmAction {
    Refresh,
    SelectConversation(String),
    SendMessage(String),
    SimulateInbound {
        channel: String,
        text: String,
    },
    MoveDeal {
        deal_id: String,
        stage_id: String,
    },
    CreateTask {
        title: String,
        lead_id: Option<String>,
        deal_id: Option<String>,
        due_at: Option<String>,
    },
    CompleteTask(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrmCall {
    ListConversations,
    ConversationDetail { conversation_id: String },
    Pipeline,
    ListTasks,
    Send { conversation_id: String, issued_at: i64 },
    SimulateInbound,
    MoveDeal { deal_id: String, stage_id: String },
    CreateTask,
    CompleteTask { task_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ActivityKind {
    Message,
    MessageStatus,
    Deal,
    Task,
}

/// Entry of the activity feed, newest first and unique by `id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub ts: i64,
    pub kind: ActivityKind,
    pub actor: Option<String>,
    pub text: String,
    pub meta: Option<String>,
}

/// Inbox filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationFilter {
    pub search: String,
    /// `None` matches every channel.
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ListStatus {
    loading: bool,
}

#[derive(Debug, Clone)]
pub struct CrmState {
    limits: PanelLimits,
    conversations: EntityCache<Conversation>,
    deals: EntityCache<Deal>,
    tasks: EntityCache<Task>,
    selected: Option<String>,
    detail_in_flight: HashSet<String>,
    conversations_list: ListStatus,
    pipeline_list: ListStatus,
    tasks_list: ListStatus,
    conversations_error: Option<String>,
    pipeline_error: Option<String>,
    tasks_error: Option<String>,
    activity: Vec<Activity>,
    live_events: BoundedLog<CustomEvent>,
    connection: ConnectionStatus,
    reconcile: ReconcileScheduler,
}

impl CrmState {
    pub fn new(limits: PanelLimits) -> Self {
        Self {
            limits,
            conversations: EntityCache::new(limits.pulse_ms),
            deals: EntityCache::new(limits.pulse_ms),
            tasks: EntityCache::new(limits.pulse_ms),
            selected: None,
            detail_in_flight: HashSet::new(),
            conversations_list: ListStatus::default(),
            pipeline_list: ListStatus::default(),
            tasks_list: ListStatus::default(),
            conversations_error: None,
            pipeline_error: None,
            tasks_error: None,
            activity: Vec::new(),
            live_events: BoundedLog::new(limits.max_live_events),
            connection: ConnectionStatus::default(),
            reconcile: ReconcileScheduler::new(limits.reconcile_delay_ms, limits.detail_ttl_ms),
        }
    }

    pub fn conversations(&self) -> &EntityCache<Conversation> {
        &self.conversations
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn conversations_matching<'a>(
        &'a self,
        filter: &'a ConversationFilter,
    ) -> impl Iterator<Item = &'a Conversation> + 'a {
        let needle = filter.search.trim().to_lowercase();
        self.conversations.iter().filter(move |conversation| {
            let channel_ok = filter
                .channel
                .as_deref()
                .is_none_or(|channel| conversation.channel.as_deref() == Some(channel));
            let search_ok = needle.is_empty()
                || conversation.id.to_lowercase().contains(&needle)
                || conversation
                    .extra
                    .values()
                    .filter_map(Value::as_str)
                    .any(|text| text.to_lowercase().contains(&needle))
                || conversation.messages.iter().any(|message| {
                    message
                        .text
                        .as_deref()
                        .is_some_and(|text| text.to_lowercase().contains(&needle))
                });
            channel_ok && search_ok
        })
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected_conversation(&self) -> Option<&Conversation> {
        self.selected.as_deref().and_then(|id| self.conversations.get(id))
    }

    pub fn conversation_loading(&self) -> bool {
        self.selected
            .as_ref()
            .is_some_and(|id| self.detail_in_flight.contains(id))
    }

    pub fn deals(&self) -> &EntityCache<Deal> {
        &self.deals
    }

    pub fn deal(&self, id: &str) -> Option<&Deal> {
        self.deals.get(id)
    }

    pub fn deals_in_stage<'a>(&'a self, stage_id: &'a str) -> impl Iterator<Item = &'a Deal> + 'a {
        self.deals
            .iter()
            .filter(move |deal| deal.stage_id.as_deref() == Some(stage_id))
    }

    pub fn tasks(&self) -> &EntityCache<Task> {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn loading(&self) -> (bool, bool, bool) {
        (
            self.conversations_list.loading,
            self.pipeline_list.loading,
            self.tasks_list.loading,
        )
    }

    pub fn conversations_error(&self) -> Option<&str> {
        self.conversations_error.as_deref()
    }

    pub fn pipeline_error(&self) -> Option<&str> {
        self.pipeline_error.as_deref()
    }

    pub fn tasks_error(&self) -> Option<&str> {
        self.tasks_error.as_deref()
    }

    pub fn activity(&self) -> &[Activity] {
        &self.activity
    }

    pub fn live_events(&self) -> &BoundedLog<CustomEvent> {
        &self.live_events
    }

    fn record(&mut self, entry: Activity) {
        self.activity.retain(|existing| existing.id != entry.id);
        let at = self
            .activity
            .iter()
            .position(|existing| existing.ts <= entry.ts)
            .unwrap_or(self.activity.len());
        self.activity.insert(at, entry);
        self.activity.truncate(self.limits.max_timeline);
    }

    fn record_message(&mut self, message: &CrmMessage, ts: i64) {
        let Some(id) = message.id.as_deref() else {
            return;
        };
        self.record(Activity {
            id: format!("msg-{id}"),
            ts,
            kind: ActivityKind::Message,
            actor: message.sender.clone(),
            text: message.text.clone().unwrap_or_default(),
            meta: message.status.clone(),
        });
    }

    fn record_deal(&mut self, deal_id: &str, stage_id: &str, ts: i64) {
        let title = self
            .deals
            .get(deal_id)
            .map(|deal| deal.display_title().to_string())
            .unwrap_or_else(|| deal_id.to_string());
        self.record(Activity {
            id: format!("deal-{deal_id}-{stage_id}"),
            ts,
            kind: ActivityKind::Deal,
            actor: None,
            text: format!("{title} → {stage_id}"),
            meta: None,
        });
    }

    fn record_task(&mut self, task_id: &str, verb: &str, ts: i64) -> String {
        let title = self
            .tasks
            .get(task_id)
            .map(|task| task.display_title().to_string())
            .unwrap_or_else(|| task_id.to_string());
        let text = format!("{title} ({verb})");
        self.record(Activity {
            id: format!("task-{task_id}-{verb}"),
            ts,
            kind: ActivityKind::Task,
            actor: None,
            text: text.clone(),
            meta: None,
        });
        text
    }

    fn load(&mut self, call: CrmCall) -> Option<Effect<CrmCall>> {
        let (status, error, path) = match call {
            CrmCall::ListConversations => (
                &mut self.conversations_list,
                &mut self.conversations_error,
                format!("{CRM_API}/inbox/conversations"),
            ),
            CrmCall::Pipeline => (
                &mut self.pipeline_list,
                &mut self.pipeline_error,
                format!("{CRM_API}/pipeline"),
            ),
            CrmCall::ListTasks => (
                &mut self.tasks_list,
                &mut self.tasks_error,
                format!("{CRM_API}/tasks"),
            ),
            _ => return None,
        };
        if status.loading {
            return None;
        }
        status.loading = true;
        *error = None;
        Some(Effect::Call(ApiCall::get(path, call)))
    }

    fn load_all(&mut self) -> Effects<CrmCall> {
        [CrmCall::ListConversations, CrmCall::Pipeline, CrmCall::ListTasks]
            .into_iter()
            .filter_map(|call| self.load(call))
            .collect()
    }

    fn fetch_detail(&mut self, conversation_id: &str, force: bool, now_ms: i64) -> Option<Effect<CrmCall>> {
        if !self.reconcile.should_fetch(conversation_id, now_ms, force) {
            return None;
        }
        if !force && self.detail_in_flight.contains(conversation_id) {
            return None;
        }
        self.detail_in_flight.insert(conversation_id.to_string());
        Some(Effect::Call(ApiCall::get(
            format!("{CRM_API}/inbox/conversations/{conversation_id}"),
            CrmCall::ConversationDetail {
                conversation_id: conversation_id.to_string(),
            },
        )))
    }

    /// Add a message to its conversation. Returns the conversation id.
    fn ingest_message(&mut self, message: &Map<String, Value>, fallback_id: Option<&str>, ts: i64, now_ms: i64) -> Option<String> {
        let message = CrmMessage::from_map(message);
        let conversation_id = message
            .conversation_id
            .clone()
            .or_else(|| fallback_id.map(str::to_string))?;
        let record = message.clone();
        self.conversations.update(&conversation_id, now_ms, |conversation| {
            conversation.upsert_message(message);
            conversation.observe_update(ts);
        });
        if self.selected.as_deref() == Some(conversation_id.as_str()) {
            self.record_message(&record, ts);
        }
        Some(conversation_id)
    }

    fn apply_crm_event(&mut self, kind: CrmEvent, event: &CustomEvent, now_ms: i64) -> Effects<CrmCall> {
        let ts = event.timestamp;
        let value = &event.value;
        match kind {
            CrmEvent::MessageNew => {
                let fallback = event.correlation_id.as_deref();
                let conversation_id = event.entity_id(&["conversationId"]).map(str::to_string);
                if let Some(conversation_id) = conversation_id {
                    self.reconcile.note_event(&conversation_id, now_ms);
                    self.conversations.touch(&conversation_id, ts, now_ms);
                }
                self.ingest_message(value, fallback, ts, now_ms);
                Vec::new()
            }
            CrmEvent::MessageStatus => {
                let (Some(conversation_id), Some(message_id), Some(status)) = (
                    event.entity_id(&["conversationId"]).map(str::to_string),
                    event.str_field("id").map(str::to_string),
                    event.str_field("status").map(str::to_string),
                ) else {
                    return Vec::new();
                };
                self.reconcile.note_event(&conversation_id, now_ms);
                self.conversations.touch(&conversation_id, ts, now_ms);
                self.conversations.update(&conversation_id, now_ms, |conversation| {
                    conversation.set_message_status(&message_id, &status);
                });
                if self.selected.as_deref() == Some(conversation_id.as_str()) {
                    let actor = event.str_field("sender").map(str::to_string);
                    self.record(Activity {
                        id: format!("msg-{message_id}"),
                        ts,
                        kind: ActivityKind::MessageStatus,
                        actor,
                        text: format!("Status: {status}"),
                        meta: None,
                    });
                }
                Vec::new()
            }
            CrmEvent::DealStageChanged => {
                let Some(deal_id) = event.entity_id(&["id", "dealId"]).map(str::to_string) else {
                    return Vec::new();
                };
                self.deals.touch(&deal_id, ts, now_ms);
                self.deals.update(&deal_id, now_ms, |deal| deal.merge_patch(value));
                let stage_id = self
                    .deals
                    .get(&deal_id)
                    .and_then(|deal| deal.stage_id.clone())
                    .unwrap_or_default();
                self.record_deal(&deal_id, &stage_id, ts);
                Vec::new()
            }
            CrmEvent::TaskCreated | CrmEvent::TaskCompleted => {
                let Some(task_id) = event.entity_id(&["id", "taskId"]).map(str::to_string) else {
                    return Vec::new();
                };
                self.tasks.touch(&task_id, ts, now_ms);
                self.tasks.update(&task_id, now_ms, |task| task.merge_patch(value));
                let verb = if kind == CrmEvent::TaskCompleted {
                    "completed"
                } else {
                    "created"
                };
                let text = self.record_task(&task_id, verb, ts);
                vec![Effect::Notify(Notice::info(text))]
            }
        }
    }

    fn ingest_list(&mut self, call: &CrmCall, body: &Value, now_ms: i64) -> Effects<CrmCall> {
        match call {
            CrmCall::ListConversations => {
                let order = upsert_all(
                    &mut self.conversations,
                    snapshot_items(body, &["conversations", "items"]),
                    now_ms,
                    Conversation::merge_patch,
                );
                if self.selected.is_none()
                    && let Some(first) = order.first()
                {
                    let first = first.clone();
                    self.selected = Some(first.clone());
                    return self.fetch_detail(&first, false, now_ms).into_iter().collect();
                }
            }
            CrmCall::Pipeline => {
                upsert_all(
                    &mut self.deals,
                    snapshot_items(body, &["deals", "items"]),
                    now_ms,
                    Deal::merge_patch,
                );
            }
            CrmCall::ListTasks => {
                upsert_all(
                    &mut self.tasks,
                    snapshot_items(body, &["tasks", "items"]),
                    now_ms,
                    Task::merge_patch,
                );
            }
            _ => {}
        }
        Vec::new()
    }

    fn list_failed(&mut self, call: &CrmCall, err: &RequestError) {
        tracing::warn!(?call, error = %err, "crm list load failed");
        let slot = match call {
            CrmCall::ListConversations => &mut self.conversations_error,
            CrmCall::Pipeline => &mut self.pipeline_error,
            CrmCall::ListTasks => &mut self.tasks_error,
            _ => return,
        };
        *slot = Some(err.user_message());
    }

    fn finish_list(&mut self, call: &CrmCall) {
        match call {
            CrmCall::ListConversations => self.conversations_list.loading = false,
            CrmCall::Pipeline => self.pipeline_list.loading = false,
            CrmCall::ListTasks => self.tasks_list.loading = false,
            _ => {}
        }
    }
}

/// Merge every object carrying an `id` into `cache` and reorder it after
/// the snapshot. Returns the snapshot ids.
fn upsert_all<E: Entity>(
    cache: &mut EntityCache<E>,
    items: &[Value],
    now_ms: i64,
    merge: fn(&mut E, &Map<String, Value>),
) -> Vec<String> {
    let mut order = Vec::with_capacity(items.len());
    for item in items.iter().filter_map(Value::as_object) {
        let Some(id) = str_field(item, "id") else {
            continue;
        };
        merge(cache.ensure(id, now_ms), item);
        order.push(id.to_string());
    }
    cache.apply_snapshot_order(&order);
    order
}

impl PanelState for CrmState {
    type Action = CrmAction;
    type Call = CrmCall;

    fn name(&self) -> &'static str {
        "crm"
    }

    fn channels(&self) -> &'static [&'static str] {
        CRM_CHANNELS
    }

    fn accepts(&self, event: &CustomEvent) -> bool {
        CRM_PREFIXES
            .iter()
            .any(|prefix| event.name.starts_with(prefix))
    }

    fn init(&mut self, _now_ms: i64) -> Effects<CrmCall> {
        self.load_all()
    }

    fn apply_event(&mut self, event: CustomEvent, now_ms: i64) -> Effects<CrmCall> {
        self.live_events.push(event.clone());
        match event.kind() {
            EventName::Crm(kind) => self.apply_crm_event(kind, &event, now_ms),
            _ => Vec::new(),
        }
    }

    fn handle_action(&mut self, action: CrmAction, now_ms: i64) -> Effects<CrmCall> {
        match action {
            CrmAction::Refresh => {
                let mut effects = self.load_all();
                if let Some(selected) = self.selected.clone() {
                    effects.extend(self.fetch_detail(&selected, true, now_ms));
                }
                effects
            }
            CrmAction::SelectConversation(conversation_id) => {
                if conversation_id.trim().is_empty() {
                    return Vec::new();
                }
                self.selected = Some(conversation_id.clone());
                self.fetch_detail(&conversation_id, false, now_ms)
                    .into_iter()
                    .collect()
            }
            CrmAction::SendMessage(text) => {
                let text = text.trim();
                let Some(conversation_id) = self.selected.clone() else {
                    return Vec::new();
                };
                if text.is_empty() {
                    return Vec::new();
                }
                vec![Effect::Call(ApiCall::post(
                    format!("{CRM_API}/inbox/conversations/{conversation_id}/send"),
                    json!({"text": text}),
                    CrmCall::Send {
                        conversation_id,
                        issued_at: now_ms,
                    },
                ))]
            }
            CrmAction::SimulateInbound { channel, text } => {
                let Some(conversation_id) = self.selected.clone() else {
                    return Vec::new();
                };
                vec![Effect::Call(ApiCall::post(
                    format!("{CRM_API}/mock/inbound"),
                    json!({"channel": channel, "conversationId": conversation_id, "text": text}),
                    CrmCall::SimulateInbound,
                ))]
            }
            CrmAction::MoveDeal { deal_id, stage_id } => vec![Effect::Call(ApiCall::post(
                format!("{CRM_API}/deals/{deal_id}/move"),
                json!({"toStageId": stage_id}),
                CrmCall::MoveDeal { deal_id, stage_id },
            ))],
            CrmAction::CreateTask {
                title,
                lead_id,
                deal_id,
                due_at,
            } => {
                if title.trim().is_empty() {
                    return Vec::new();
                }
                vec![Effect::Call(ApiCall::post(
                    format!("{CRM_API}/tasks"),
                    json!({"title": title, "leadId": lead_id, "dealId": deal_id, "dueAt": due_at}),
                    CrmCall::CreateTask,
                ))]
            }
            CrmAction::CompleteTask(task_id) => vec![Effect::Call(ApiCall::post(
                format!("{CRM_API}/tasks/{task_id}/complete"),
                json!({}),
                CrmCall::CompleteTask { task_id },
            ))],
        }
    }

    fn handle_response(
        &mut self,
        call: CrmCall,
        outcome: RequestResult<Value>,
        now_ms: i64,
    ) -> Effects<CrmCall> {
        match call {
            CrmCall::ListConversations | CrmCall::Pipeline | CrmCall::ListTasks => {
                self.finish_list(&call);
                match outcome {
                    Ok(body) => self.ingest_list(&call, &body, now_ms),
                    Err(err) => {
                        self.list_failed(&call, &err);
                        Vec::new()
                    }
                }
            }
            CrmCall::ConversationDetail { conversation_id } => {
                self.detail_in_flight.remove(&conversation_id);
                match outcome {
                    Ok(Value::Object(detail)) => {
                        self.conversations
                            .update(&conversation_id, now_ms, |conversation| {
                                conversation.merge_patch(&detail);
                            });
                        self.reconcile.mark_fetched(&conversation_id, now_ms);
                        if self.selected.as_deref() == Some(conversation_id.as_str()) {
                            let messages = self
                                .conversations
                                .get(&conversation_id)
                                .map(|conversation| conversation.messages.clone())
                                .unwrap_or_default();
                            for message in &messages {
                                let ts = message
                                    .extra
                                    .get("ts")
                                    .and_then(livesync_protocol::value::coerce_millis)
                                    .unwrap_or(now_ms);
                                self.record_message(message, ts);
                            }
                        }
                        Vec::new()
                    }
                    Ok(_) => Vec::new(),
                    Err(err) => vec![Effect::Notify(Notice::error(err.user_message()))],
                }
            }
            CrmCall::Send {
                conversation_id,
                issued_at,
            } => match outcome {
                Ok(Value::Object(message)) => {
                    self.ingest_message(&message, Some(&conversation_id), now_ms, now_ms);
                    self.reconcile.schedule_check(&conversation_id, issued_at, now_ms);
                    vec![Effect::Notify(Notice::success("Message sent"))]
                }
                Ok(_) => {
                    self.reconcile.schedule_check(&conversation_id, issued_at, now_ms);
                    vec![Effect::Notify(Notice::success("Message sent"))]
                }
                Err(err) => vec![Effect::Notify(Notice::error(err.user_message()))],
            },
            CrmCall::SimulateInbound => match outcome {
                Ok(_) => vec![Effect::Notify(Notice::success("Inbound message simulated"))],
                Err(err) => vec![Effect::Notify(Notice::error(err.user_message()))],
            },
            CrmCall::MoveDeal { deal_id, stage_id } => match outcome {
                Ok(body) => {
                    self.deals.update(&deal_id, now_ms, |deal| {
                        let patch = body.as_object();
                        if let Some(patch) = patch {
                            deal.merge_patch(patch);
                        }
                        // 204 and bodies without a stage still mean the move landed.
                        if patch.is_none_or(|patch| !patch.contains_key("stageId")) {
                            deal.stage_id = Some(stage_id.clone());
                        }
                    });
                    self.record_deal(&deal_id, &stage_id, now_ms);
                    vec![Effect::Notify(Notice::success("Deal moved"))]
                }
                Err(err) => {
                    let mut effects = vec![Effect::Notify(Notice::error(err.user_message()))];
                    effects.extend(self.load(CrmCall::Pipeline));
                    effects
                }
            },
            CrmCall::CreateTask => match outcome {
                Ok(Value::Object(task)) => {
                    if let Some(task_id) = str_field(&task, "id").map(str::to_string) {
                        self.tasks
                            .update(&task_id, now_ms, |entry| entry.merge_patch(&task));
                        self.record_task(&task_id, "created", now_ms);
                    }
                    vec![Effect::Notify(Notice::success("Task created"))]
                }
                Ok(_) => vec![Effect::Notify(Notice::success("Task created"))],
                Err(err) => vec![Effect::Notify(Notice::error(err.user_message()))],
            },
            CrmCall::CompleteTask { task_id } => match outcome {
                Ok(body) => {
                    self.tasks.update(&task_id, now_ms, |task| {
                        let patch = body.as_object();
                        if let Some(patch) = patch {
                            task.merge_patch(patch);
                        }
                        if patch.is_none_or(|patch| !patch.contains_key("status")) {
                            task.status = Some("done".to_string());
                        }
                    });
                    self.record_task(&task_id, "completed", now_ms);
                    vec![Effect::Notify(Notice::success("Task completed"))]
                }
                Err(err) => vec![Effect::Notify(Notice::error(err.user_message()))],
            },
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
        earliest([
            self.conversations.next_deadline(),
            self.deals.next_deadline(),
            self.tasks.next_deadline(),
            self.reconcile.next_deadline(),
        ])
    }

    fn fire_timers(&mut self, now_ms: i64) -> Effects<CrmCall> {
        self.conversations.expire_pulses(now_ms);
        self.deals.expire_pulses(now_ms);
        self.tasks.expire_pulses(now_ms);
        let mut effects = Vec::new();
        for conversation_id in self.reconcile.due_refetches(now_ms) {
            tracing::info!(%conversation_id, "no event after send, refetching");
            effects.extend(self.fetch_detail(&conversation_id, true, now_ms));
        }
        effects
    }

    fn teardown(&mut self) {
        self.reconcile.clear();
        self.conversations.expire_pulses(i64::MAX);
        self.deals.expire_pulses(i64::MAX);
        self.tasks.expire_pulses(i64::MAX);
    }

    fn snapshot(&self) -> Value {
        let pipeline: Vec<Value> = PIPELINE_STAGES
            .iter()
            .map(|(stage_id, title)| {
                json!({
                    "id": stage_id,
                    "title": title,
                    "deals": self.deals_in_stage(stage_id).collect::<Vec<_>>(),
                })
            })
            .collect();
        json!({
            "panel": self.name(),
            "connection": self.connection,
            "selectedConversationId": self.selected,
            "conversations": self.conversations.iter().collect::<Vec<_>>(),
            "pipeline": pipeline,
            "tasks": self.tasks.iter().collect::<Vec<_>>(),
            "activity": self.activity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state() -> CrmState {
        CrmState::new(PanelLimits::default())
    }

    fn event(name: &str, ts: i64, value: Value) -> CustomEvent {
        CustomEvent::new(name, ts).with_value(value)
    }

    fn calls(effects: &Effects<CrmCall>) -> Vec<&CrmCall> {
        effects
            .iter()
            .filter_map(Effect::as_call)
            .map(|call| &call.purpose)
            .collect()
    }

    fn selected_state() -> CrmState {
        let mut state = state();
        state.init(0);
        state.handle_response(
            CrmCall::ListConversations,
            Ok(json!([{"id": "c1", "channel": "whatsapp"}, {"id": "c2", "channel": "email"}])),
            1,
        );
        state.handle_response(
            CrmCall::ConversationDetail { conversation_id: "c1".to_string() },
            Ok(json!({"id": "c1", "messages": [{"id": "m1", "sender": "lead", "text": "hola", "ts": 5}]})),
            2,
        );
        state
    }

    #[test]
    fn init_loads_three_lists_once() {
        let mut state = state();
        let effects = state.init(0);

        assert_eq!(
            vec![&CrmCall::ListConversations, &CrmCall::Pipeline, &CrmCall::ListTasks],
            calls(&effects)
        );
        assert_eq!((true, true, true), state.loading());
        assert!(state.init(0).is_empty());
    }

    #[test]
    fn conversation_list_selects_first_and_loads_detail() {
        let state = selected_state();

        assert_eq!(Some("c1"), state.selected_id());
        assert_eq!(1, state.selected_conversation().map_or(0, |c| c.messages.len()));
        assert_eq!(vec!["msg-m1"], state.activity().iter().map(|a| a.id.as_str()).collect::<Vec<_>>());
        assert!(!state.conversation_loading());
    }

    #[test]
    fn message_events_update_thread_and_activity() {
        let mut state = selected_state();
        state.apply_event(
            event(
                "conversation.message.new",
                10,
                json!({"id": "m2", "conversationId": "c1", "sender": "agent", "text": "¿Cuándo visitamos?", "status": "sent"}),
            ),
            10,
        );
        state.apply_event(
            event(
                "conversation.message.new",
                11,
                json!({"id": "m2", "conversationId": "c1", "text": "¿Cuándo visitamos?"}),
            ),
            11,
        );
        state.apply_event(
            event("conversation.message.status", 12, json!({"id": "m2", "conversationId": "c1", "status": "read"})),
            12,
        );

        let conversation = state.conversation("c1").expect("conversation");
        assert_eq!(2, conversation.messages.len());
        assert_eq!(Some("read".to_string()), conversation.messages[1].status);
        let latest = &state.activity()[0];
        assert_eq!("msg-m2", latest.id);
        assert_eq!(ActivityKind::MessageStatus, latest.kind);
        assert_eq!("Status: read", latest.text);
        assert_eq!(2, state.activity().len());
    }

    #[test]
    fn deal_stage_change_updates_board() {
        let mut state = state();
        state.handle_response(
            CrmCall::Pipeline,
            Ok(json!([{"id": "d1", "title": "Depto 3B", "stageId": "stage-contacted"}])),
            0,
        );

        state.apply_event(
            event("deal.stage.changed", 20, json!({"id": "d1", "stageId": "stage-visit"})),
            20,
        );

        assert_eq!(1, state.deals_in_stage("stage-visit").count());
        assert_eq!(0, state.deals_in_stage("stage-contacted").count());
        assert_eq!("Depto 3B → stage-visit", state.activity()[0].text);
    }

    #[test]
    fn task_events_upsert_and_notify() {
        let mut state = state();
        let effects = state.apply_event(
            event("task.created", 30, json!({"id": "k1", "title": "Llamar a Ana", "status": "open"})),
            30,
        );
        assert_eq!(Some(&Notice::info("Llamar a Ana (created)")), effects[0].as_notice());

        let effects = state.apply_event(
            event("task.completed", 40, json!({"id": "k1", "title": "Llamar a Ana", "status": "done"})),
            40,
        );
        assert_eq!(Some(&Notice::info("Llamar a Ana (completed)")), effects[0].as_notice());
        assert_eq!(1, state.tasks().len());
        assert_eq!(Some("done".to_string()), state.task("k1").and_then(|t| t.status.clone()));
    }

    #[test]
    fn send_message_requires_selection_and_text() {
        let mut state = state();
        assert!(state.handle_action(CrmAction::SendMessage("hola".to_string()), 0).is_empty());

        let mut state = selected_state();
        assert!(state.handle_action(CrmAction::SendMessage("   ".to_string()), 0).is_empty());

        let effects = state.handle_action(CrmAction::SendMessage("  hola  ".to_string()), 100);
        let call = effects[0].as_call().expect("call");
        assert_eq!(format!("{CRM_API}/inbox/conversations/c1/send"), call.path);
        assert_eq!(Some(json!({"text": "hola"})), call.body);
    }

    #[test]
    fn sent_message_without_echo_is_refetched() {
        let mut state = selected_state();
        let effects = state.handle_action(CrmAction::SendMessage("hola".to_string()), 20_000);
        let purpose = effects[0].as_call().expect("call").purpose.clone();

        let effects = state.handle_response(
            purpose,
            Ok(json!({"id": "m9", "conversationId": "c1", "text": "hola", "sender": "agent"})),
            20_010,
        );
        assert_eq!(Some(&Notice::success("Message sent")), effects[0].as_notice());
        assert_eq!(2, state.conversation("c1").map_or(0, |c| c.messages.len()));

        assert_eq!(
            vec![&CrmCall::ConversationDetail { conversation_id: "c1".to_string() }],
            calls(&state.fire_timers(20_510))
        );
    }

    #[test]
    fn failed_deal_move_notifies_and_reloads_pipeline() {
        let mut state = state();
        let effects = state.handle_action(
            CrmAction::MoveDeal { deal_id: "d1".to_string(), stage_id: "stage-won".to_string() },
            0,
        );
        let call = effects[0].as_call().expect("call");
        assert_eq!(Some(json!({"toStageId": "stage-won"})), call.body);

        let effects = state.handle_response(
            call.purpose.clone(),
            Err(RequestError::Status { status: 409, message: "Stage locked".to_string() }),
            5,
        );

        assert_eq!(Some(&Notice::error("Stage locked")), effects[0].as_notice());
        assert_eq!(vec![&CrmCall::Pipeline], calls(&effects));
    }

    #[test]
    fn create_and_complete_task_round_trip() {
        let mut state = state();
        let effects = state.handle_action(
            CrmAction::CreateTask {
                title: "Enviar brochure".to_string(),
                lead_id: Some("l1".to_string()),
                deal_id: None,
                due_at: None,
            },
            0,
        );
        assert_eq!(
            Some(json!({"title": "Enviar brochure", "leadId": "l1", "dealId": null, "dueAt": null})),
            effects[0].as_call().and_then(|call| call.body.clone())
        );

        state.handle_response(
            CrmCall::CreateTask,
            Ok(json!({"id": "k7", "title": "Enviar brochure", "status": "open"})),
            10,
        );
        state.handle_response(
            CrmCall::CompleteTask { task_id: "k7".to_string() },
            Ok(json!({"id": "k7", "status": "done"})),
            20,
        );

        assert_eq!(Some("done".to_string()), state.task("k7").and_then(|t| t.status.clone()));
        let ids: Vec<_> = state.activity().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(vec!["task-k7-completed", "task-k7-created"], ids);
    }

    #[test]
    fn deal_move_with_empty_body_applies_requested_stage() {
        let mut state = state();
        state.handle_response(
            CrmCall::Pipeline,
            Ok(json!([{"id": "d1", "title": "Depto 3B", "stageId": "stage-offer"}])),
            0,
        );

        let effects = state.handle_response(
            CrmCall::MoveDeal { deal_id: "d1".to_string(), stage_id: "stage-won".to_string() },
            Ok(json!({})),
            10,
        );

        assert_eq!(Some(&Notice::success("Deal moved")), effects[0].as_notice());
        assert_eq!(Some("stage-won".to_string()), state.deal("d1").and_then(|d| d.stage_id.clone()));
        assert_eq!(0, state.deals_in_stage("stage-offer").count());
        assert_eq!("Depto 3B → stage-won", state.activity()[0].text);
    }

    #[test]
    fn deal_move_keeps_stage_reported_by_server() {
        let mut state = state();
        state.handle_response(
            CrmCall::Pipeline,
            Ok(json!([{"id": "d1", "title": "Depto 3B", "stageId": "stage-offer"}])),
            0,
        );

        state.handle_response(
            CrmCall::MoveDeal { deal_id: "d1".to_string(), stage_id: "stage-won".to_string() },
            Ok(json!({"id": "d1", "stageId": "stage-review"})),
            10,
        );

        assert_eq!(Some("stage-review".to_string()), state.deal("d1").and_then(|d| d.stage_id.clone()));
    }

    #[test]
    fn task_completion_with_empty_body_marks_done() {
        let mut state = state();
        state.handle_response(
            CrmCall::ListTasks,
            Ok(json!([{"id": "k7", "title": "Enviar brochure", "status": "open"}])),
            0,
        );

        let effects = state.handle_response(
            CrmCall::CompleteTask { task_id: "k7".to_string() },
            Ok(json!({})),
            10,
        );

        assert_eq!(Some(&Notice::success("Task completed")), effects[0].as_notice());
        assert_eq!(Some("done".to_string()), state.task("k7").and_then(|t| t.status.clone()));
        assert_eq!("task-k7-completed", state.activity()[0].id);
    }

    #[test]
    fn conversation_filter_matches_channel_and_text() {
        let state = selected_state();
        let whatsapp = ConversationFilter { channel: Some("whatsapp".to_string()), ..ConversationFilter::default() };
        let text = ConversationFilter { search: "HOLA".to_string(), ..ConversationFilter::default() };

        assert_eq!(1, state.conversations_matching(&whatsapp).count());
        let ids: Vec<_> = state.conversations_matching(&text).map(|c| c.id.as_str()).collect();
        assert_eq!(vec!["c1"], ids);
    }

    #[test]
    fn accepts_only_crm_prefixes() {
        let state = state();
        assert!(state.accepts(&CustomEvent::new("deal.stage.changed", 1)));
        assert!(state.accepts(&CustomEvent::new("conversation.archived", 1)));
        assert!(!state.accepts(&CustomEvent::new("ticket.created", 1)));
    }
}
