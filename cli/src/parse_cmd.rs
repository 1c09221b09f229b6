//! `livesync parse`: run the envelope parser over captured stream lines.
//!
//! Accepts raw `data:` payloads or a verbatim SSE dump; framing lines
//! (`event:`, `id:`, `retry:`, comments and blanks) are skipped. Each
//! payload produces one JSON line on stdout.

use clap::Parser;
use livesync_core::clock::Clock;
use livesync_core::clock::SystemClock;
use livesync_protocol::EnvelopeKind;
use livesync_protocol::EventEnvelope;
use livesync_protocol::envelope;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;

#[derive(Debug, Parser)]
pub struct ParseArgs {
    /// Receipt time (epoch ms) for envelopes without a timestamp. Defaults
    /// to the current time.
    #[arg(long = "received-at")]
    pub received_at: Option<i64>,

    /// Only print CUSTOM envelopes.
    #[arg(long = "custom-only")]
    pub custom_only: bool,
}

pub async fn run_parse(args: ParseArgs) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let Some(data) = payload(&line) else {
            continue;
        };
        let received_at = args.received_at.unwrap_or_else(|| SystemClock.now_ms());
        let envelope = envelope::parse(Some(data), received_at);
        if args.custom_only && envelope.kind() != EnvelopeKind::Custom {
            continue;
        }
        let mut out = describe(&envelope).to_string();
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
    }
    stdout.flush().await?;
    Ok(())
}

/// The data portion of one input line, or `None` for SSE framing.
fn payload(line: &str) -> Option<&str> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }
    if let Some(data) = line.strip_prefix("data:") {
        return Some(data.strip_prefix(' ').unwrap_or(data));
    }
    if ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
    {
        return None;
    }
    Some(line)
}

pub fn describe(envelope: &EventEnvelope) -> Value {
    let kind = envelope.kind().to_string();
    match envelope {
        EventEnvelope::Custom(event) => json!({"kind": kind, "event": event}),
        EventEnvelope::Json(value) | EventEnvelope::Unknown(value) => {
            json!({"kind": kind, "value": value})
        }
        EventEnvelope::Text(text) => json!({"kind": kind, "text": text}),
        EventEnvelope::Empty => json!({"kind": kind}),
    }
}
