//! `livesync snapshot`: one REST load of a panel, no stream.

use std::collections::VecDeque;

use clap::Parser;
use livesync_core::LiveSyncConfig;
use livesync_core::PanelLimits;
use livesync_core::PanelState;
use livesync_core::RequestClient;
use livesync_core::clock::Clock;
use livesync_core::clock::SystemClock;
use livesync_core::panel::Effect;
use livesync_core::panels::CrmState;
use livesync_core::panels::StudioState;
use livesync_core::panels::WorkflowState;
use livesync_core::request::CallOptions;
use serde_json::Value;

use crate::PanelKind;

/// Upper bound on requests a single initial load may chain.
const MAX_CALLS: usize = 32;

#[derive(Debug, Parser)]
pub struct SnapshotArgs {
    #[arg(long = "panel", value_enum, default_value_t = PanelKind::Workflow)]
    pub panel: PanelKind,

    /// Pretty-print the JSON output.
    #[arg(long = "pretty")]
    pub pretty: bool,
}

pub async fn run_snapshot(config: &LiveSyncConfig, args: SnapshotArgs) -> anyhow::Result<()> {
    let client = RequestClient::from_config(config);
    let limits = PanelLimits::from_config(config);
    let snapshot = match args.panel {
        PanelKind::Workflow => load_once(WorkflowState::new(limits), &client, &SystemClock).await?,
        PanelKind::Studio => load_once(StudioState::new(limits), &client, &SystemClock).await?,
        PanelKind::Crm => load_once(CrmState::new(limits), &client, &SystemClock).await?,
    };

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&snapshot)?
    } else {
        serde_json::to_string(&snapshot)?
    };
    println!("{rendered}");
    Ok(())
}

/// Run a panel's initial load to completion without a stream: every call
/// its reducer issues is performed in order, and the responses are fed
/// back, until nothing is left to fetch.
pub async fn load_once<S: PanelState>(
    mut state: S,
    client: &RequestClient,
    clock: &dyn Clock,
) -> anyhow::Result<Value> {
    let mut pending: VecDeque<Effect<S::Call>> = state.init(clock.now_ms()).into();
    let mut calls = 0;

    while let Some(effect) = pending.pop_front() {
        match effect {
            Effect::Notify(notice) => {
                tracing::info!(tone = %notice.tone, "{}", notice.message);
            }
            Effect::Call(call) => {
                calls += 1;
                if calls > MAX_CALLS {
                    anyhow::bail!(
                        "{} panel load did not settle after {MAX_CALLS} requests",
                        state.name()
                    );
                }
                let options = CallOptions {
                    method: call.method,
                    body: call.body,
                    timeout: None,
                    cancel: None,
                };
                let outcome = client.call(&call.path, options).await;
                if let Err(err) = &outcome {
                    tracing::warn!(path = %call.path, error = %err, "request failed");
                }
                pending.extend(state.handle_response(call.purpose, outcome, clock.now_ms()));
            }
        }
    }

    state.teardown();
    Ok(state.snapshot())
}
