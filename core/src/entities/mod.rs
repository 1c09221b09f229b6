//! Domain records held in the entity caches.
//!
//! Records are built from loosely shaped server JSON, so each one exposes
//! a `merge_patch` that applies a JSON object field by field: scalars
//! overwrite, nested maps merge key-wise, history collections append with
//! de-duplication, and `updatedAt` only moves forward.

mod crm;
mod run;
mod ticket;

pub use crm::Conversation;
pub use crm::CrmMessage;
pub use crm::Deal;
pub use crm::Task;
pub use run::Run;
pub use run::RunStep;
pub use ticket::Direction;
pub use ticket::Ticket;
pub use ticket::TicketMessage;
pub use ticket::TimelineEntry;

use serde_json::Map;
use serde_json::Value;

use livesync_protocol::value::coerce_millis;

pub(crate) fn opt_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub(crate) fn opt_millis(value: &Value) -> Option<i64> {
    coerce_millis(value)
}

/// Key-wise merge of `patch` into `target`. Nulls in the patch are skipped.
pub(crate) fn merge_map(target: &mut Map<String, Value>, patch: &Value) {
    if let Some(patch) = patch.as_object() {
        for (key, value) in patch {
            if !value.is_null() {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}
