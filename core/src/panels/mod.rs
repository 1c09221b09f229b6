//! Panel reducers.
//!
//! Each panel owns its entity caches and reacts to stream events, user
//! actions and REST responses. See [`crate::panel::PanelState`].

pub mod crm;
pub mod studio;
pub mod workflow;

pub use crm::CrmAction;
pub use crm::CrmState;
pub use studio::StudioAction;
pub use studio::StudioState;
pub use workflow::WorkflowAction;
pub use workflow::WorkflowState;

use serde_json::Value;

/// Items of a list response: either a bare array or an object wrapping one
/// under any of `keys`.
pub(crate) fn snapshot_items<'a>(body: &'a Value, keys: &[&str]) -> &'a [Value] {
    if let Some(items) = body.as_array() {
        return items;
    }
    keys.iter()
        .find_map(|key| body.get(key).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or_default()
}
