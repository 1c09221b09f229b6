//! Event-name catalogue.
//!
//! Event names are dotted strings (`ticket.sla.breached`). Each family has
//! its own enum; [`EventName::classify`] routes a raw name to its family and
//! keeps unrecognized names around for the live-event log.

use std::str::FromStr;

use strum_macros::AsRefStr;
use strum_macros::EnumIter;
use strum_macros::EnumString;
use strum_macros::IntoStaticStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr)]
pub enum TicketEvent {
    #[strum(serialize = "ticket.created")]
    Created,
    #[strum(serialize = "ticket.updated")]
    Updated,
    #[strum(serialize = "ticket.assigned")]
    Assigned,
    #[strum(serialize = "ticket.sla.started")]
    SlaStarted,
    #[strum(serialize = "ticket.sla.breached")]
    SlaBreached,
    #[strum(serialize = "ticket.escalated")]
    Escalated,
    #[strum(serialize = "ticket.closed")]
    Closed,
    #[strum(serialize = "ticket.survey.sent")]
    SurveySent,
    #[strum(serialize = "ticket.survey.received")]
    SurveyReceived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr)]
pub enum MessagingEvent {
    #[strum(serialize = "messaging.inbound")]
    Inbound,
    /// Provider webhook echo; never applied to entities.
    #[strum(serialize = "messaging.inbound.raw")]
    InboundRaw,
    #[strum(serialize = "messaging.outbound")]
    Outbound,
    #[strum(serialize = "messaging.delivery")]
    Delivery,
    #[strum(serialize = "messaging.status")]
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr)]
pub enum WorkflowEvent {
    #[strum(serialize = "workflow.reset")]
    Reset,
    #[strum(serialize = "workflow.error")]
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr)]
pub enum RunEvent {
    #[strum(serialize = "ai_workflow.run.started")]
    Started,
    #[strum(serialize = "ai_workflow.run.step")]
    Step,
    #[strum(serialize = "ai_workflow.run.completed")]
    Completed,
    #[strum(serialize = "ai_workflow.run.failed")]
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr)]
pub enum CrmEvent {
    #[strum(serialize = "conversation.message.new")]
    MessageNew,
    #[strum(serialize = "conversation.message.status")]
    MessageStatus,
    #[strum(serialize = "deal.stage.changed")]
    DealStageChanged,
    #[strum(serialize = "task.created")]
    TaskCreated,
    #[strum(serialize = "task.completed")]
    TaskCompleted,
}

pub const HUMAN_ACTION_REQUIRED: &str = "human.action_required";

/// Classified event name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventName {
    Ticket(TicketEvent),
    /// `ticket.*` name outside the known set; still lands on the timeline.
    OtherTicket(String),
    Messaging(MessagingEvent),
    Workflow(WorkflowEvent),
    /// `workflow.*` name outside the known set.
    OtherWorkflow(String),
    Run(RunEvent),
    HumanActionRequired,
    Crm(CrmEvent),
    Unrecognized(String),
}

impl EventName {
    pub fn classify(name: &str) -> Self {
        if let Ok(event) = TicketEvent::from_str(name) {
            return EventName::Ticket(event);
        }
        if let Ok(event) = MessagingEvent::from_str(name) {
            return EventName::Messaging(event);
        }
        if let Ok(event) = WorkflowEvent::from_str(name) {
            return EventName::Workflow(event);
        }
        if let Ok(event) = RunEvent::from_str(name) {
            return EventName::Run(event);
        }
        if let Ok(event) = CrmEvent::from_str(name) {
            return EventName::Crm(event);
        }
        if name == HUMAN_ACTION_REQUIRED {
            return EventName::HumanActionRequired;
        }
        if name.starts_with("ticket.") {
            return EventName::OtherTicket(name.to_string());
        }
        if name.starts_with("workflow.") {
            return EventName::OtherWorkflow(name.to_string());
        }
        EventName::Unrecognized(name.to_string())
    }

    pub fn is_ticket(&self) -> bool {
        matches!(self, EventName::Ticket(_) | EventName::OtherTicket(_))
    }

    pub fn is_workflow(&self) -> bool {
        matches!(self, EventName::Workflow(_) | EventName::OtherWorkflow(_))
    }
}

/// Channels the ticket workflow panel subscribes to.
pub const WORKFLOW_CHANNELS: &[&str] = &[
    "ticket.created",
    "ticket.updated",
    "ticket.assigned",
    "ticket.sla.started",
    "ticket.sla.breached",
    "ticket.escalated",
    "ticket.closed",
    "ticket.survey.sent",
    "ticket.survey.received",
    "messaging.inbound",
    "messaging.inbound.raw",
    "messaging.outbound",
    "messaging.delivery",
    "workflow.reset",
    "workflow.error",
];

/// Channels the AI workflow studio subscribes to.
pub const STUDIO_CHANNELS: &[&str] = &[
    "ai_workflow.run.started",
    "ai_workflow.run.step",
    "ai_workflow.run.completed",
    "ai_workflow.run.failed",
    "messaging.inbound",
    "messaging.inbound.raw",
    "messaging.outbound",
    "messaging.status",
    HUMAN_ACTION_REQUIRED,
];

/// Channels the CRM panel subscribes to.
pub const CRM_CHANNELS: &[&str] = &[
    "conversation.message.new",
    "conversation.message.status",
    "deal.stage.changed",
    "task.created",
    "task.completed",
];

/// Name-prefixes the CRM panel accepts from the generic channel.
pub const CRM_PREFIXES: &[&str] = &["conversation.", "deal.", "task."];
