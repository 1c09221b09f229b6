use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use strum_macros::EnumString;

use livesync_protocol::CustomEvent;
use livesync_protocol::status::TicketStatus;
use livesync_protocol::value::str_field;
use livesync_protocol::value::string_list;

use super::merge_map;
use super::opt_millis;
use super::opt_string;
use crate::cache::Entity;

/// One entry of a ticket's event history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub name: String,
    pub timestamp: i64,
    pub value: Map<String, Value>,
}

impl TimelineEntry {
    pub fn from_event(event: &CustomEvent) -> Self {
        Self {
            name: event.name.clone(),
            timestamp: event.timestamp,
            value: event.value.clone(),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        Some(Self {
            name: str_field(map, "name")?.to_string(),
            timestamp: map.get("timestamp").and_then(opt_millis)?,
            value: map
                .get("value")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketMessage {
    pub message_id: Option<String>,
    pub direction: Option<Direction>,
    pub provider: Option<String>,
    pub channel: Option<String>,
    pub text: Option<String>,
    pub at: Option<i64>,
    pub media_count: Option<u32>,
    pub status: Option<String>,
}

impl TicketMessage {
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let field = |key: &str| map.get(key).and_then(opt_string);
        Self {
            message_id: field("messageId"),
            direction: str_field(map, "direction").and_then(|raw| raw.parse().ok()),
            provider: field("provider"),
            channel: field("channel"),
            text: field("text"),
            at: map.get("at").and_then(opt_millis),
            media_count: map
                .get("mediaCount")
                .and_then(Value::as_u64)
                .map(|count| count as u32),
            status: field("status"),
        }
    }

    /// Overlay the fields `other` carries.
    fn absorb(&mut self, other: TicketMessage) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        take!(direction, provider, channel, text, at, media_count, status);
    }
}

/// A support ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub ticket_id: String,
    pub status: TicketStatus,
    pub provider: Option<String>,
    pub channel: Option<String>,
    pub subject: Option<String>,
    pub customer: Map<String, Value>,
    pub assignee: Option<Value>,
    pub requested_docs: Vec<String>,
    pub sla: Map<String, Value>,
    /// Newest first.
    pub timeline: Vec<TimelineEntry>,
    /// Sorted by `at`, oldest first.
    pub messages: Vec<TicketMessage>,
    pub last_message_text: Option<String>,
    pub last_message_at: Option<i64>,
    pub docs_received_at: Option<i64>,
    pub created_at: Option<i64>,
    pub updated_at: i64,
    pub detail_fetched_at: Option<i64>,
    #[serde(skip)]
    pub pulse: Option<i64>,
    /// Server fields this client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Ticket {
    pub fn new(ticket_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            status: TicketStatus::Open,
            provider: None,
            channel: None,
            subject: None,
            customer: Map::new(),
            assignee: None,
            requested_docs: Vec::new(),
            sla: Map::new(),
            timeline: Vec::new(),
            messages: Vec::new(),
            last_message_text: None,
            last_message_at: None,
            docs_received_at: None,
            created_at: None,
            updated_at: now_ms,
            detail_fetched_at: None,
            pulse: None,
            extra: Map::new(),
        }
    }

    /// Apply a server patch or snapshot object.
    ///
    /// `customer` and `sla` merge key-wise, `requestedDocs` replaces,
    /// `timeline` and `messages` append with de-duplication.
    pub fn merge_patch(&mut self, patch: &Map<String, Value>, max_timeline: usize) {
        for (key, value) in patch {
            match key.as_str() {
                "ticketId" | "pulse" => {}
                "status" => {
                    if let Some(raw) = value.as_str() {
                        self.status = TicketStatus::parse_lenient(raw);
                    }
                }
                "provider" => self.provider = opt_string(value),
                "channel" => self.channel = opt_string(value),
                "subject" => self.subject = opt_string(value),
                "lastMessageText" => self.last_message_text = opt_string(value),
                "customer" => merge_map(&mut self.customer, value),
                "sla" => merge_map(&mut self.sla, value),
                "assignee" => self.assignee = (!value.is_null()).then(|| value.clone()),
                "requestedDocs" => {
                    if let Some(docs) = string_list(value) {
                        self.requested_docs = docs;
                    }
                }
                "timeline" => {
                    for entry in value.as_array().into_iter().flatten() {
                        if let Some(entry) = TimelineEntry::from_value(entry) {
                            self.push_timeline(entry, max_timeline);
                        }
                    }
                }
                "messages" => {
                    for message in value.as_array().into_iter().flatten() {
                        if let Some(map) = message.as_object() {
                            self.upsert_message(TicketMessage::from_map(map));
                        }
                    }
                }
                "lastMessageAt" => self.last_message_at = opt_millis(value),
                "docsReceivedAt" => self.docs_received_at = opt_millis(value),
                "createdAt" => self.created_at = opt_millis(value),
                "detailFetchedAt" => self.detail_fetched_at = opt_millis(value),
                "updatedAt" => {
                    if let Some(at) = opt_millis(value) {
                        self.observe_update(at);
                    }
                }
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Insert `entry` keeping newest-first order. Returns false when an entry
    /// with the same name and timestamp is already present.
    pub fn push_timeline(&mut self, entry: TimelineEntry, max_timeline: usize) -> bool {
        let duplicate = self
            .timeline
            .iter()
            .any(|existing| existing.name == entry.name && existing.timestamp == entry.timestamp);
        if duplicate {
            return false;
        }
        let at = self
            .timeline
            .iter()
            .position(|existing| existing.timestamp <= entry.timestamp)
            .unwrap_or(self.timeline.len());
        self.timeline.insert(at, entry);
        self.timeline.truncate(max_timeline);
        true
    }

    /// Merge into the message with the same id, or append. Messages stay
    /// sorted by `at`.
    pub fn upsert_message(&mut self, message: TicketMessage) {
        let existing = message.message_id.as_ref().and_then(|id| {
            self.messages
                .iter_mut()
                .find(|candidate| candidate.message_id.as_ref() == Some(id))
        });
        match existing {
            Some(existing) => existing.absorb(message),
            None => self.messages.push(message),
        }
        self.messages.sort_by_key(|message| message.at.unwrap_or_default());
    }
}

impl Entity for Ticket {
    fn create(id: &str, now_ms: i64) -> Self {
        Ticket::new(id, now_ms)
    }

    fn id(&self) -> &str {
        &self.ticket_id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn set_updated_at(&mut self, at_ms: i64) {
        self.updated_at = at_ms;
    }

    fn pulse(&self) -> Option<i64> {
        self.pulse
    }

    fn set_pulse(&mut self, pulse: Option<i64>) {
        self.pulse = pulse;
    }
}
