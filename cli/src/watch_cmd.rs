//! `livesync watch`: run one panel against the live backend.
//!
//! Prints one line per published state change, either a summary or the
//! full panel JSON, until Ctrl+C or `--duration` elapses.

use std::time::Duration;

use clap::Parser;
use livesync_core::LiveSyncConfig;
use livesync_core::PanelDeps;
use livesync_core::PanelLimits;
use livesync_core::PanelRuntime;
use livesync_core::PanelState;
use livesync_core::panels::CrmState;
use livesync_core::panels::StudioState;
use livesync_core::panels::WorkflowState;
use serde_json::Value;

use crate::PanelKind;

#[derive(Debug, Parser)]
pub struct WatchArgs {
    #[arg(long = "panel", value_enum, default_value_t = PanelKind::Workflow)]
    pub panel: PanelKind,

    /// Stop after this many seconds instead of waiting for Ctrl+C.
    #[arg(long = "duration")]
    pub duration_secs: Option<u64>,

    /// Print the full panel state on every change.
    #[arg(long = "full")]
    pub full: bool,
}

pub async fn run_watch(config: &LiveSyncConfig, args: WatchArgs) -> anyhow::Result<()> {
    let limits = PanelLimits::from_config(config);
    match args.panel {
        PanelKind::Workflow => watch_panel(config, WorkflowState::new(limits), &args).await,
        PanelKind::Studio => watch_panel(config, StudioState::new(limits), &args).await,
        PanelKind::Crm => watch_panel(config, CrmState::new(limits), &args).await,
    }
}

async fn watch_panel<S: PanelState>(
    config: &LiveSyncConfig,
    state: S,
    args: &WatchArgs,
) -> anyhow::Result<()> {
    let handle = PanelRuntime::create(config, state, PanelDeps::from_config(config));
    tracing::info!(panel = ?args.panel, url = %config.stream_url(), "watching");
    handle.init().await?;

    let mut states = handle.subscribe();
    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut last_line = String::new();
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    tracing::warn!("panel runtime stopped");
                    break;
                }
                let snapshot = states.borrow_and_update().snapshot();
                let line = if args.full {
                    snapshot.to_string()
                } else {
                    summarize(&snapshot)
                };
                if line != last_line {
                    println!("{line}");
                    last_line = line;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            () = &mut deadline => break,
        }
    }

    handle.teardown().await?;
    Ok(())
}

/// One line per state: panel name, connection flag and the length of every
/// list in the snapshot.
pub fn summarize(snapshot: &Value) -> String {
    let panel = snapshot
        .get("panel")
        .and_then(Value::as_str)
        .unwrap_or("panel");
    let connected = snapshot
        .pointer("/connection/connected")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut line = format!("{panel} {}", if connected { "online" } else { "offline" });
    if let Some(fields) = snapshot.as_object() {
        for (key, value) in fields {
            if let Some(items) = value.as_array() {
                line.push_str(&format!(" {key}={}", items.len()));
            }
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn summary_counts_lists() {
        let snapshot = json!({
            "panel": "workflow",
            "connection": {"connected": true, "lastChangeMs": 5},
            "selectedTicketId": "t-1",
            "tickets": [{"ticketId": "t-1"}, {"ticketId": "t-2"}],
        });

        assert_eq!("workflow online tickets=2", summarize(&snapshot));
    }

    #[test]
    fn summary_defaults_to_offline() {
        assert_eq!("studio offline runs=0", summarize(&json!({"panel": "studio", "runs": []})));
    }
}
