use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use fileway_core::domain::approval::{Approval, ApprovalAction, ApprovalId, ApprovalStatus};
use fileway_core::domain::identity::{RoleId, UserAccount, UserId};
use fileway_core::domain::notification::{Notification, NotificationId};
use fileway_core::domain::submission::{FormSubmission, SubmissionId, SubmissionStatus};
use fileway_core::domain::workflow::{ApprovalWorkflow, WorkflowId};

pub mod approval;
pub mod directory;
pub mod memory;
pub mod notification;
pub mod submission;
pub mod workflow;

pub use approval::SqlApprovalRepository;
pub use directory::SqlUserDirectory;
pub use memory::{
    InMemoryApprovalRepository, InMemoryNotificationRepository, InMemorySubmissionRepository,
    InMemoryUserDirectory, InMemoryWorkflowRepository,
};
pub use notification::SqlNotificationRepository;
pub use submission::SqlSubmissionRepository;
pub use workflow::SqlWorkflowRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("`{entity_id}` not found")]
    Missing { entity_id: String },
    #[error("concurrent update conflict on `{entity_id}`")]
    Conflict { entity_id: String },
}

/// Mutation applied to the approval row as part of a committed action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalMutation {
    pub status: ApprovalStatus,
    pub current_step_order: u32,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Mutation applied to the bound submission row, when the transition calls
/// for one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionMutation {
    pub submission_id: SubmissionId,
    pub status: SubmissionStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The full write set of one processed action. Committed atomically: the
/// audit append, the guarded approval update, the optional submission update,
/// and the notification enqueue land together or not at all.
#[derive(Clone, Debug)]
pub struct ActionCommit {
    pub approval_id: ApprovalId,
    /// `state_version` the caller read before computing the transition. The
    /// update is guarded on it; a mismatch means a concurrent writer won.
    pub expected_version: u32,
    /// Audit append for the processed action. Cancellation commits without
    /// one; every user-submitted action carries one.
    pub action: Option<ApprovalAction>,
    pub approval: ApprovalMutation,
    pub submission: Option<SubmissionMutation>,
    pub notifications: Vec<Notification>,
}

/// The write set of a freshly initiated approval: the instance row, the
/// submission status flip to under-review, and step-1 notifications.
#[derive(Clone, Debug)]
pub struct InitiationCommit {
    pub approval: Approval,
    pub submission: SubmissionMutation,
    pub notifications: Vec<Notification>,
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn find_by_id(&self, id: &WorkflowId)
        -> Result<Option<ApprovalWorkflow>, RepositoryError>;
    async fn find_by_code(&self, code: &str) -> Result<Option<ApprovalWorkflow>, RepositoryError>;
    async fn save(&self, workflow: ApprovalWorkflow) -> Result<(), RepositoryError>;
    async fn list_active(&self) -> Result<Vec<ApprovalWorkflow>, RepositoryError>;
    async fn delete(&self, id: &WorkflowId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    async fn find_by_id(&self, id: &SubmissionId)
        -> Result<Option<FormSubmission>, RepositoryError>;
    async fn save(&self, submission: FormSubmission) -> Result<(), RepositoryError>;
    /// Fails with [`RepositoryError::Missing`] when the submission does not
    /// exist.
    async fn set_status(
        &self,
        id: &SubmissionId,
        status: SubmissionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError>;
    async fn find_by_submission_id(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<Option<Approval>, RepositoryError>;
    /// Persist a new approval plus its initiation side effects in one
    /// transaction. A second approval for the same submission fails with
    /// [`RepositoryError::Conflict`].
    async fn create(&self, commit: InitiationCommit) -> Result<(), RepositoryError>;
    /// Commit one processed action atomically. Fails with
    /// [`RepositoryError::Conflict`] when `expected_version` no longer
    /// matches the stored row.
    async fn commit_action(&self, commit: ActionCommit) -> Result<(), RepositoryError>;
    async fn list_actions(
        &self,
        id: &ApprovalId,
    ) -> Result<Vec<ApprovalAction>, RepositoryError>;
    /// Approvals whose active step's resolved actor set contains the user.
    async fn list_pending_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Approval>, RepositoryError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn enqueue(&self, notification: Notification) -> Result<(), RepositoryError>;
    async fn list_pending(&self, limit: u32) -> Result<Vec<Notification>, RepositoryError>;
    async fn mark_sent(
        &self,
        id: &NotificationId,
        sent_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
    async fn mark_failed(
        &self,
        id: &NotificationId,
        error_message: &str,
    ) -> Result<(), RepositoryError>;
    async fn list_for_user(&self, user_id: &UserId)
        -> Result<Vec<Notification>, RepositoryError>;
}

/// Role-resolution lookups against the user directory. `users_with_role` is
/// best-effort: callers degrade to direct approver users when it fails.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserAccount>, RepositoryError>;
    async fn roles_of(&self, user_id: &UserId) -> Result<BTreeSet<RoleId>, RepositoryError>;
    async fn users_with_role(&self, role_id: &RoleId)
        -> Result<BTreeSet<UserId>, RepositoryError>;
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|dt| dt.with_timezone(&Utc)).map_err(|error| {
        RepositoryError::Decode(format!("invalid timestamp in `{column}` ({value}): {error}"))
    })
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|value| parse_timestamp(column, value)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}
