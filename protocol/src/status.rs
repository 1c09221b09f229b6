use std::fmt;

use serde::Serialize;
use serde::Serializer;
use strum_macros::EnumString;

/// Ticket lifecycle status. Unknown server values are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    #[default]
    Open,
    InProgress,
    WaitingDocs,
    Escalated,
    Closed,
    #[strum(default)]
    Other(String),
}

impl TicketStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TicketStatus::Open => "OPEN",
            TicketStatus::InProgress => "IN_PROGRESS",
            TicketStatus::WaitingDocs => "WAITING_DOCS",
            TicketStatus::Escalated => "ESCALATED",
            TicketStatus::Closed => "CLOSED",
            TicketStatus::Other(raw) => raw,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            TicketStatus::Open => "Open",
            TicketStatus::InProgress => "In progress",
            TicketStatus::WaitingDocs => "Waiting docs",
            TicketStatus::Escalated => "Escalated",
            TicketStatus::Closed => "Closed",
            TicketStatus::Other(raw) => raw,
        }
    }
}

/// AI workflow run status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    #[default]
    Running,
    Completed,
    Failed,
    #[strum(default)]
    Other(String),
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Other(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

macro_rules! string_backed {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl $ty {
            /// Parse a raw status, tolerating case and surrounding space.
            pub fn parse_lenient(raw: &str) -> Self {
                match raw.trim().to_ascii_uppercase().parse::<Self>() {
                    Ok(Self::Other(_)) | Err(_) => Self::Other(raw.trim().to_string()),
                    Ok(status) => status,
                }
            }
        }
    };
}

string_backed!(TicketStatus);
string_backed!(RunStatus);
