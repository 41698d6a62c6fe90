use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::identity::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SubmissionReceived,
    ApprovalRequired,
    Approved,
    Rejected,
    ChangesRequested,
    DocumentSigned,
    General,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubmissionReceived => "submission_received",
            Self::ApprovalRequired => "approval_required",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ChangesRequested => "changes_requested",
            Self::DocumentSigned => "document_signed",
            Self::General => "general",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "submission_received" => Some(Self::SubmissionReceived),
            "approval_required" => Some(Self::ApprovalRequired),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "changes_requested" => Some(Self::ChangesRequested),
            "document_signed" => Some(Self::DocumentSigned),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// An outbox row. Enqueued in the same transaction as the approval
/// transition it announces, then drained by the dispatch worker; delivery
/// failure is recorded here and never unwinds the transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
    pub status: NotificationStatus,
    pub reference_type: String,
    pub reference_id: String,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Build a fresh pending outbox row.
    pub fn pending(
        user_id: UserId,
        kind: NotificationKind,
        subject: impl Into<String>,
        body: impl Into<String>,
        reference_type: impl Into<String>,
        reference_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId(format!("NTF-{}", uuid::Uuid::new_v4())),
            user_id,
            kind,
            subject: subject.into(),
            body: body.into(),
            status: NotificationStatus::Pending,
            reference_type: reference_type.into(),
            reference_id: reference_id.into(),
            error_message: None,
            retry_count: 0,
            sent_at: None,
            created_at: now,
        }
    }
}
