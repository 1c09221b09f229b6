//! Classification of raw SSE data lines.
//!
//! Only envelopes shaped like `{"type": "CUSTOM", "name": ..., "value": {...}}`
//! carry domain changes. Everything else is surfaced with a kind tag so the
//! caller can log and drop it.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use strum_macros::Display;

use crate::events::EventName;
use crate::value::first_str;
use crate::value::millis_field;
use crate::value::str_field;

/// Envelope `type` tag for domain events.
pub const CUSTOM_TYPE: &str = "CUSTOM";

/// A normalized domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEvent {
    pub name: String,
    /// Epoch milliseconds; never zero once parsed.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub value: Map<String, Value>,
}

impl CustomEvent {
    pub fn new(name: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            timestamp,
            correlation_id: None,
            value: Map::new(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Replace the payload. Non-object values leave it empty.
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self
    }

    pub fn kind(&self) -> EventName {
        EventName::classify(&self.name)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        str_field(&self.value, key)
    }

    pub fn millis_field(&self, key: &str) -> Option<i64> {
        millis_field(&self.value, key)
    }

    /// Resolve the entity this event addresses: the first non-empty payload
    /// field among `keys`, then the correlation id.
    pub fn entity_id(&self, keys: &[&str]) -> Option<&str> {
        first_str(&self.value, keys).or_else(|| {
            self.correlation_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum EnvelopeKind {
    Custom,
    Json,
    Text,
    Empty,
    Unknown,
}

/// Result of classifying one raw data line.
#[derive(Debug, Clone, PartialEq)]
pub enum EventEnvelope {
    Custom(CustomEvent),
    /// Valid JSON that is not a CUSTOM envelope.
    Json(Value),
    /// Not JSON at all.
    Text(String),
    /// Missing or blank data.
    Empty,
    /// A CUSTOM envelope whose payload is not an object.
    Unknown(Value),
}

impl EventEnvelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            EventEnvelope::Custom(_) => EnvelopeKind::Custom,
            EventEnvelope::Json(_) => EnvelopeKind::Json,
            EventEnvelope::Text(_) => EnvelopeKind::Text,
            EventEnvelope::Empty => EnvelopeKind::Empty,
            EventEnvelope::Unknown(_) => EnvelopeKind::Unknown,
        }
    }

    pub fn as_custom(&self) -> Option<&CustomEvent> {
        match self {
            EventEnvelope::Custom(event) => Some(event),
            _ => None,
        }
    }

    pub fn into_custom(self) -> Option<CustomEvent> {
        match self {
            EventEnvelope::Custom(event) => Some(event),
            _ => None,
        }
    }
}

/// Classify a raw data line received at `received_at` (epoch ms).
///
/// Never fails: malformed input maps to [`EventEnvelope::Text`] or
/// [`EventEnvelope::Empty`]. A CUSTOM envelope with a missing or null
/// `value` yields an empty payload. The event time is taken from
/// `timestamp`, then `ts`, then `received_at`.
pub fn parse(raw: Option<&str>, received_at: i64) -> EventEnvelope {
    let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
        return EventEnvelope::Empty;
    };
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(_) => return EventEnvelope::Text(raw.to_string()),
    };
    let Some(envelope) = parsed.as_object() else {
        return EventEnvelope::Json(parsed);
    };
    if envelope.get("type").and_then(Value::as_str) != Some(CUSTOM_TYPE) {
        return EventEnvelope::Json(parsed);
    }

    let value = match envelope.get("value") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(value)) => value.clone(),
        Some(_) => return EventEnvelope::Unknown(parsed),
    };
    let name = str_field(envelope, "name").unwrap_or(CUSTOM_TYPE).to_string();
    let timestamp = millis_field(envelope, "timestamp")
        .or_else(|| millis_field(envelope, "ts"))
        .unwrap_or(received_at);
    let correlation_id = first_str(envelope, &["correlationId", "ticketId"])
        .or_else(|| str_field(&value, "ticketId"))
        .map(str::to_string);

    EventEnvelope::Custom(CustomEvent {
        name,
        timestamp,
        correlation_id,
        value,
    })
}
