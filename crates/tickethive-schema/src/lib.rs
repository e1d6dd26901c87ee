pub mod error;

pub use error::{Error, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an incident.
///
/// `New` only exists in memory between record creation and the first
/// retrieval decision; persisted records always carry a later status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    New,
    GatheringInfo,
    Open,
    PendingAdminReview,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::GatheringInfo => "gathering_info",
            Self::Open => "open",
            Self::PendingAdminReview => "pending_admin_review",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "gathering_info" => Some(Self::GatheringInfo),
            "open" => Some(Self::Open),
            "pending_admin_review" => Some(Self::PendingAdminReview),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    /// Terminal for automated dialogue: no further turns mutate the record.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved)
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One elicited question/answer pair. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectedEntry {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

/// Audit trail entry for a manual status override. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminAnnotation {
    pub old_status: IncidentStatus,
    pub new_status: IncidentStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// The durable unit of work: one tracked IT problem report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub incident_id: String,
    pub user_demand: String,
    pub status: IncidentStatus,
    /// Write-once: bound at first retrieval, stable for the incident's
    /// lifetime even if the KB is re-indexed mid-conversation.
    #[serde(default)]
    pub kb_reference: Option<String>,
    #[serde(default)]
    pub collected_information: Vec<CollectedEntry>,
    #[serde(default)]
    pub admin_messages: Vec<AdminAnnotation>,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped by the store on every save.
    #[serde(default)]
    pub revision: i64,
}

impl IncidentRecord {
    pub fn new(user_demand: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            incident_id: new_incident_id(now),
            user_demand: user_demand.into(),
            status: IncidentStatus::New,
            kb_reference: None,
            collected_information: Vec::new(),
            admin_messages: Vec::new(),
            created_on: now,
            updated_on: now,
            revision: 0,
        }
    }

    /// Bind the KB entry this incident reasons against. Rejected once set.
    pub fn bind_kb_reference(&mut self, kb_id: impl Into<String>) -> Result<()> {
        if let Some(existing) = &self.kb_reference {
            return Err(Error::validation(format!(
                "kb_reference already bound to {existing}"
            )));
        }
        self.kb_reference = Some(kb_id.into());
        self.touch();
        Ok(())
    }

    pub fn append_collected(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.collected_information.push(CollectedEntry {
            question: question.into(),
            answer: answer.into(),
            timestamp: Utc::now(),
        });
        self.touch();
    }

    pub fn append_admin_message(
        &mut self,
        old_status: IncidentStatus,
        new_status: IncidentStatus,
        message: impl Into<String>,
    ) {
        self.admin_messages.push(AdminAnnotation {
            old_status,
            new_status,
            message: message.into(),
            timestamp: Utc::now(),
        });
        self.touch();
    }

    pub fn set_status(&mut self, status: IncidentStatus) {
        self.status = status;
        self.touch();
    }

    /// Required-info fields not yet answered, in the KB entry's order.
    pub fn missing_fields(&self, required_info: &[String]) -> Vec<String> {
        required_info
            .iter()
            .filter(|field| {
                !self
                    .collected_information
                    .iter()
                    .any(|entry| entry.question == **field)
            })
            .cloned()
            .collect()
    }

    pub fn touch(&mut self) {
        self.updated_on = Utc::now();
    }
}

/// Incident ids follow the `INC<utc timestamp><4 hex>` shape so they sort
/// roughly by creation time and stay readable in the admin surface.
pub fn new_incident_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "INC{}{}",
        now.format("%Y%m%d%H%M%S"),
        &suffix[..4].to_uppercase()
    )
}

/// One indexed unit of knowledge base content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KbEntry {
    pub kb_id: String,
    pub use_case: String,
    #[serde(default)]
    pub required_info: Vec<String>,
    pub solution_steps: String,
}

/// What a conversational turn hands back to the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub reply_text: String,
    #[serde(default)]
    pub incident_id: Option<String>,
    #[serde(default)]
    pub status: Option<IncidentStatus>,
}

impl TurnOutcome {
    pub fn conversational(reply_text: impl Into<String>) -> Self {
        Self {
            reply_text: reply_text.into(),
            incident_id: None,
            status: None,
        }
    }

    pub fn for_incident(reply_text: impl Into<String>, record: &IncidentRecord) -> Self {
        Self {
            reply_text: reply_text.into(),
            incident_id: Some(record.incident_id.clone()),
            status: Some(record.status),
        }
    }
}
