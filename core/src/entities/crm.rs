use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use super::opt_millis;
use super::opt_string;
use crate::cache::Entity;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmMessage {
    pub id: Option<String>,
    pub conversation_id: Option<String>,
    pub sender: Option<String>,
    pub text: Option<String>,
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CrmMessage {
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mut message = CrmMessage::default();
        for (key, value) in map {
            match key.as_str() {
                "id" => message.id = opt_string(value),
                "conversationId" => message.conversation_id = opt_string(value),
                "sender" => message.sender = opt_string(value),
                "text" => message.text = opt_string(value),
                "status" => message.status = opt_string(value),
                _ => {
                    message.extra.insert(key.clone(), value.clone());
                }
            }
        }
        message
    }
}

/// An inbox conversation with its message thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub channel: Option<String>,
    pub messages: Vec<CrmMessage>,
    pub updated_at: i64,
    #[serde(skip)]
    pub pulse: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Conversation {
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            match key.as_str() {
                "id" | "conversationId" => {}
                "channel" => self.channel = opt_string(value),
                "messages" => {
                    for message in value.as_array().into_iter().flatten() {
                        if let Some(map) = message.as_object() {
                            self.upsert_message(CrmMessage::from_map(map));
                        }
                    }
                }
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

    /// Append `message`, or overlay it on the message with the same id.
    /// Returns true when the message was new.
    pub fn upsert_message(&mut self, message: CrmMessage) -> bool {
        let existing = message.id.as_ref().and_then(|id| {
            self.messages
                .iter_mut()
                .find(|candidate| candidate.id.as_ref() == Some(id))
        });
        match existing {
            Some(existing) => {
                if message.sender.is_some() {
                    existing.sender = message.sender;
                }
                if message.text.is_some() {
                    existing.text = message.text;
                }
                if message.status.is_some() {
                    existing.status = message.status;
                }
                existing.extra.extend(message.extra);
                false
            }
            None => {
                self.messages.push(message);
                true
            }
        }
    }

    pub fn set_message_status(&mut self, message_id: &str, status: &str) -> bool {
        match self
            .messages
            .iter_mut()
            .find(|message| message.id.as_deref() == Some(message_id))
        {
            Some(message) => {
                message.status = Some(status.to_string());
                true
            }
            None => false,
        }
    }
}

/// A pipeline deal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: String,
    pub title: Option<String>,
    pub stage_id: Option<String>,
    pub updated_at: i64,
    #[serde(skip)]
    pub pulse: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Deal {
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            match key.as_str() {
                "id" => {}
                "title" => self.title = opt_string(value),
                "stageId" => self.stage_id = opt_string(value),
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: Option<String>,
    pub status: Option<String>,
    pub updated_at: i64,
    #[serde(skip)]
    pub pulse: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            match key.as_str() {
                "id" => {}
                "title" => self.title = opt_string(value),
                "status" => self.status = opt_string(value),
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }
}

macro_rules! keyed_entity {
    ($ty:ident { $($field:ident: $init:expr),* $(,)? }) => {
        impl Entity for $ty {
            fn create(id: &str, now_ms: i64) -> Self {
                Self {
                    id: id.to_string(),
                    $($field: $init,)*
                    updated_at: now_ms,
                    pulse: None,
                    extra: Map::new(),
                }
            }

            fn id(&self) -> &str {
                &self.id
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
    };
}

keyed_entity!(Conversation {
    channel: None,
    messages: Vec::new(),
});
keyed_entity!(Deal {
    title: None,
    stage_id: None,
});
keyed_entity!(Task {
    title: None,
    status: None,
});
