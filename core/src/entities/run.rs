use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use livesync_protocol::status::RunStatus;
use livesync_protocol::value::first_str;

use super::opt_millis;
use super::opt_string;
use crate::cache::Entity;

/// Pipeline stages in execution order, used to guess the active node when a
/// step does not name one.
pub const NODE_ORDER: &[&str] = &[
    "normalize_input",
    "intent_classify",
    "extract_entities",
    "pragmatics",
    "decide_next",
    "build_response",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStep {
    pub node_id: Option<String>,
    pub status: String,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub summary: String,
    pub data: Map<String, Value>,
}

impl RunStep {
    pub fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            node_id: first_str(map, &["nodeId", "node_id"]).map(str::to_string),
            status: first_str(map, &["status"]).unwrap_or("unknown").to_string(),
            started_at: map.get("startedAt").and_then(opt_millis),
            ended_at: map.get("endedAt").and_then(opt_millis),
            summary: first_str(map, &["summary"]).unwrap_or_default().to_string(),
            data: map
                .get("data")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }
    }
}

/// One execution of the AI workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: String,
    pub workflow_id: Option<String>,
    pub input: String,
    pub status: RunStatus,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub updated_at: i64,
    pub steps: Vec<RunStep>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub primary_intent: Option<Value>,
    pub secondary_intents: Option<Value>,
    pub speech_act: Option<Value>,
    pub missing_slots_count: Option<i64>,
    #[serde(skip)]
    pub pulse: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Run {
    pub fn new(run_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            run_id: run_id.into(),
            workflow_id: None,
            input: String::new(),
            status: RunStatus::Running,
            started_at: None,
            ended_at: None,
            updated_at: now_ms,
            steps: Vec::new(),
            output: None,
            error: None,
            primary_intent: None,
            secondary_intents: None,
            speech_act: None,
            missing_slots_count: None,
            pulse: None,
            extra: Map::new(),
        }
    }

    /// Apply a run snapshot. `steps` replaces the step list wholesale.
    pub fn merge_patch(&mut self, patch: &Map<String, Value>, max_steps: usize) {
        for (key, value) in patch {
            match key.as_str() {
                "runId" | "run_id" | "pulse" => {}
                "workflowId" => self.workflow_id = opt_string(value),
                "input" => {
                    if let Some(input) = value.as_str() {
                        self.input = input.to_string();
                    }
                }
                "status" => {
                    if let Some(raw) = value.as_str() {
                        self.status = RunStatus::parse_lenient(raw);
                    }
                }
                "startedAt" => self.started_at = opt_millis(value),
                "endedAt" => self.ended_at = opt_millis(value),
                "updatedAt" => {
                    if let Some(at) = opt_millis(value) {
                        self.observe_update(at);
                    }
                }
                "steps" => {
                    if let Some(steps) = value.as_array() {
                        self.steps = steps
                            .iter()
                            .filter_map(Value::as_object)
                            .map(RunStep::from_map)
                            .collect();
                        self.trim_steps(max_steps);
                    }
                }
                "output" => self.output = (!value.is_null()).then(|| value.clone()),
                "error" => self.error = opt_string(value),
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Append a step, dropping the oldest past `max_steps`, and lift the
    /// intent fields it reports.
    pub fn push_step(&mut self, step: RunStep, max_steps: usize) {
        for (key, slot) in [
            ("primaryIntent", &mut self.primary_intent),
            ("secondaryIntents", &mut self.secondary_intents),
            ("speechAct", &mut self.speech_act),
        ] {
            if let Some(value) = step.data.get(key).filter(|value| !value.is_null()) {
                *slot = Some(value.clone());
            }
        }
        if let Some(count) = step.data.get("missingSlotsCount").and_then(Value::as_i64) {
            self.missing_slots_count = Some(count);
        }
        self.steps.push(step);
        self.trim_steps(max_steps);
    }

    /// Node of the latest step, or the pipeline stage matching the step count.
    pub fn infer_node_id(&self) -> Option<&str> {
        let last = self.steps.last()?;
        if let Some(node_id) = last.node_id.as_deref() {
            return Some(node_id);
        }
        let index = self.steps.len().min(NODE_ORDER.len()) - 1;
        NODE_ORDER.get(index).copied()
    }

    fn trim_steps(&mut self, max_steps: usize) {
        if self.steps.len() > max_steps {
            let excess = self.steps.len() - max_steps;
            self.steps.drain(..excess);
        }
    }
}

impl Entity for Run {
    fn create(id: &str, now_ms: i64) -> Self {
        Run::new(id, now_ms)
    }

    fn id(&self) -> &str {
        &self.run_id
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
