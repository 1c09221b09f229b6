//! The reducer contract shared by every panel.
//!
//! A panel is plain data plus synchronous transitions. Outbound work is
//! returned as [`Effect`]s; the runtime performs them and feeds results back
//! through [`PanelState::handle_response`]. Timers are deadlines the panel
//! reports via [`PanelState::next_deadline`].

use std::fmt::Debug;

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use livesync_protocol::CustomEvent;

use crate::config::LiveSyncConfig;
use crate::error::RequestResult;
use crate::notify::Notice;

/// Outbound REST request tagged with what the panel wants it for.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall<C> {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub purpose: C,
}

impl<C> ApiCall<C> {
    pub fn get(path: impl Into<String>, purpose: C) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
            purpose,
        }
    }

    pub fn post(path: impl Into<String>, body: Value, purpose: C) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
            purpose,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect<C> {
    Call(ApiCall<C>),
    Notify(Notice),
}

impl<C> Effect<C> {
    pub fn as_call(&self) -> Option<&ApiCall<C>> {
        match self {
            Effect::Call(call) => Some(call),
            Effect::Notify(_) => None,
        }
    }

    pub fn as_notice(&self) -> Option<&Notice> {
        match self {
            Effect::Notify(notice) => Some(notice),
            Effect::Call(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub last_change_ms: i64,
}

/// Caps and windows every panel shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelLimits {
    pub max_timeline: usize,
    pub max_live_events: usize,
    pub pulse_ms: u64,
    pub reconcile_delay_ms: u64,
    pub detail_ttl_ms: u64,
}

impl PanelLimits {
    pub fn from_config(config: &LiveSyncConfig) -> Self {
        Self {
            max_timeline: config.max_timeline,
            max_live_events: config.max_live_events,
            pulse_ms: config.pulse_ms,
            reconcile_delay_ms: config.reconcile_delay_ms,
            detail_ttl_ms: config.detail_ttl_ms,
        }
    }
}

impl Default for PanelLimits {
    fn default() -> Self {
        Self::from_config(&LiveSyncConfig::default())
    }
}

pub type Effects<C> = Vec<Effect<C>>;

pub trait PanelState: Clone + Send + Sync + 'static {
    type Action: Debug + Send + 'static;
    type Call: Debug + Send + 'static;

    fn name(&self) -> &'static str;

    /// Named stream channels this panel listens on.
    fn channels(&self) -> &'static [&'static str];

    /// Filter for events delivered on the generic channel.
    fn accepts(&self, _event: &CustomEvent) -> bool {
        true
    }

    /// Initial snapshot loads.
    fn init(&mut self, now_ms: i64) -> Effects<Self::Call>;

    fn apply_event(&mut self, event: CustomEvent, now_ms: i64) -> Effects<Self::Call>;

    fn handle_action(&mut self, action: Self::Action, now_ms: i64) -> Effects<Self::Call>;

    fn handle_response(
        &mut self,
        call: Self::Call,
        outcome: RequestResult<Value>,
        now_ms: i64,
    ) -> Effects<Self::Call>;

    fn set_connected(&mut self, connected: bool, now_ms: i64);

    fn connection(&self) -> ConnectionStatus;

    fn next_deadline(&self) -> Option<i64>;

    fn fire_timers(&mut self, now_ms: i64) -> Effects<Self::Call>;

    /// Drop pending timers; the panel is going away.
    fn teardown(&mut self);

    /// JSON view for presentation and tooling.
    fn snapshot(&self) -> Value;
}
