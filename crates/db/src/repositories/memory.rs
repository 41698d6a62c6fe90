//! In-memory repository fakes. Same contracts as the SQL implementations,
//! backed by maps behind async locks; used by unit tests and the dispatch
//! worker tests where a database adds nothing.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;

use fileway_core::chrono::{DateTime, Utc};
use fileway_core::domain::approval::{Approval, ApprovalAction, ApprovalId, ApprovalStatus};
use fileway_core::domain::identity::{RoleId, UserAccount, UserId};
use fileway_core::domain::notification::{Notification, NotificationId, NotificationStatus};
use fileway_core::domain::submission::{FormSubmission, SubmissionId, SubmissionStatus};
use fileway_core::domain::workflow::{ApprovalWorkflow, WorkflowId};

use super::{
    ActionCommit, ApprovalRepository, InitiationCommit, NotificationRepository, RepositoryError,
    SubmissionRepository, UserDirectory, WorkflowRepository,
};

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<HashMap<String, ApprovalWorkflow>>,
}

#[async_trait::async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn find_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        Ok(workflows.get(&id.0).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        Ok(workflows.values().find(|workflow| workflow.workflow_code == code).cloned())
    }

    async fn save(&self, workflow: ApprovalWorkflow) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id.0.clone(), workflow);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        let mut active: Vec<ApprovalWorkflow> =
            workflows.values().filter(|workflow| workflow.is_active).cloned().collect();
        active.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(active)
    }

    async fn delete(&self, id: &WorkflowId) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.write().await;
        workflows
            .remove(&id.0)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::Missing { entity_id: id.0.clone() })
    }
}

#[derive(Default)]
pub struct InMemorySubmissionRepository {
    submissions: RwLock<HashMap<String, FormSubmission>>,
}

#[async_trait::async_trait]
impl SubmissionRepository for InMemorySubmissionRepository {
    async fn find_by_id(
        &self,
        id: &SubmissionId,
    ) -> Result<Option<FormSubmission>, RepositoryError> {
        let submissions = self.submissions.read().await;
        Ok(submissions.get(&id.0).cloned())
    }

    async fn save(&self, submission: FormSubmission) -> Result<(), RepositoryError> {
        let mut submissions = self.submissions.write().await;
        submissions.insert(submission.id.0.clone(), submission);
        Ok(())
    }

    async fn set_status(
        &self,
        id: &SubmissionId,
        status: SubmissionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let mut submissions = self.submissions.write().await;
        let submission = submissions
            .get_mut(&id.0)
            .ok_or_else(|| RepositoryError::Missing { entity_id: id.0.clone() })?;
        submission.status = status;
        if completed_at.is_some() {
            submission.completed_at = completed_at;
        }
        submission.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryNotificationRepository {
    notifications: RwLock<Vec<Notification>>,
}

impl InMemoryNotificationRepository {
    pub async fn all(&self) -> Vec<Notification> {
        self.notifications.read().await.clone()
    }
}

#[async_trait::async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn enqueue(&self, notification: Notification) -> Result<(), RepositoryError> {
        let mut notifications = self.notifications.write().await;
        notifications.push(notification);
        Ok(())
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<Notification>, RepositoryError> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .iter()
            .filter(|notification| notification.status == NotificationStatus::Pending)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_sent(
        &self,
        id: &NotificationId,
        sent_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut notifications = self.notifications.write().await;
        let notification = notifications
            .iter_mut()
            .find(|notification| notification.id == *id)
            .ok_or_else(|| RepositoryError::Missing { entity_id: id.0.clone() })?;
        notification.status = NotificationStatus::Sent;
        notification.sent_at = Some(sent_at);
        notification.error_message = None;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &NotificationId,
        error_message: &str,
    ) -> Result<(), RepositoryError> {
        let mut notifications = self.notifications.write().await;
        let notification = notifications
            .iter_mut()
            .find(|notification| notification.id == *id)
            .ok_or_else(|| RepositoryError::Missing { entity_id: id.0.clone() })?;
        notification.status = NotificationStatus::Failed;
        notification.error_message = Some(error_message.to_owned());
        notification.retry_count += 1;
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .iter()
            .filter(|notification| notification.user_id == *user_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, UserAccount>>,
    memberships: RwLock<HashMap<String, BTreeSet<RoleId>>>,
}

impl InMemoryUserDirectory {
    pub async fn add_user(&self, user: UserAccount) {
        let mut users = self.users.write().await;
        users.insert(user.id.0.clone(), user);
    }

    pub async fn assign_role(&self, user_id: &UserId, role_id: RoleId) {
        let mut memberships = self.memberships.write().await;
        memberships.entry(user_id.0.clone()).or_default().insert(role_id);
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserAccount>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }

    async fn roles_of(&self, user_id: &UserId) -> Result<BTreeSet<RoleId>, RepositoryError> {
        let memberships = self.memberships.read().await;
        Ok(memberships.get(&user_id.0).cloned().unwrap_or_default())
    }

    async fn users_with_role(
        &self,
        role_id: &RoleId,
    ) -> Result<BTreeSet<UserId>, RepositoryError> {
        let memberships = self.memberships.read().await;
        Ok(memberships
            .iter()
            .filter(|(_, roles)| roles.contains(role_id))
            .map(|(user_id, _)| UserId(user_id.clone()))
            .collect())
    }
}

/// Composite fake: the approval store plus handles to the collaborating
/// fakes, so `create`/`commit_action` keep the duplicate and version guards
/// without a database. Unlike the SQL implementation the side effects are
/// not transactional; tests that need rollback behavior use SQLite.
pub struct InMemoryApprovalRepository {
    approvals: RwLock<HashMap<String, Approval>>,
    actions: RwLock<Vec<ApprovalAction>>,
    workflows: Arc<InMemoryWorkflowRepository>,
    submissions: Arc<InMemorySubmissionRepository>,
    notifications: Arc<InMemoryNotificationRepository>,
    directory: Arc<InMemoryUserDirectory>,
}

impl InMemoryApprovalRepository {
    pub fn new(
        workflows: Arc<InMemoryWorkflowRepository>,
        submissions: Arc<InMemorySubmissionRepository>,
        notifications: Arc<InMemoryNotificationRepository>,
        directory: Arc<InMemoryUserDirectory>,
    ) -> Self {
        Self {
            approvals: RwLock::new(HashMap::new()),
            actions: RwLock::new(Vec::new()),
            workflows,
            submissions,
            notifications,
            directory,
        }
    }
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        let approvals = self.approvals.read().await;
        Ok(approvals.get(&id.0).cloned())
    }

    async fn find_by_submission_id(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<Option<Approval>, RepositoryError> {
        let approvals = self.approvals.read().await;
        Ok(approvals
            .values()
            .find(|approval| approval.submission_id == *submission_id)
            .cloned())
    }

    async fn create(&self, commit: InitiationCommit) -> Result<(), RepositoryError> {
        {
            let mut approvals = self.approvals.write().await;
            let duplicate = approvals
                .values()
                .any(|existing| existing.submission_id == commit.approval.submission_id);
            if duplicate {
                return Err(RepositoryError::Conflict {
                    entity_id: commit.approval.submission_id.0.clone(),
                });
            }
            approvals.insert(commit.approval.id.0.clone(), commit.approval.clone());
        }

        self.submissions
            .set_status(
                &commit.submission.submission_id,
                commit.submission.status,
                commit.submission.completed_at,
            )
            .await?;
        for notification in commit.notifications {
            self.notifications.enqueue(notification).await?;
        }
        Ok(())
    }

    async fn commit_action(&self, commit: ActionCommit) -> Result<(), RepositoryError> {
        {
            let mut approvals = self.approvals.write().await;
            let approval = approvals
                .get_mut(&commit.approval_id.0)
                .ok_or_else(|| RepositoryError::Conflict {
                    entity_id: commit.approval_id.0.clone(),
                })?;
            if approval.state_version != commit.expected_version {
                return Err(RepositoryError::Conflict {
                    entity_id: commit.approval_id.0.clone(),
                });
            }
            approval.status = commit.approval.status;
            approval.current_step_order = commit.approval.current_step_order;
            if commit.approval.completed_at.is_some() {
                approval.completed_at = commit.approval.completed_at;
            }
            approval.state_version += 1;
            approval.updated_at = Utc::now();
        }

        if let Some(action) = commit.action {
            let mut actions = self.actions.write().await;
            actions.push(action);
        }

        if let Some(submission) = commit.submission {
            self.submissions
                .set_status(&submission.submission_id, submission.status, submission.completed_at)
                .await?;
        }
        for notification in commit.notifications {
            self.notifications.enqueue(notification).await?;
        }
        Ok(())
    }

    async fn list_actions(
        &self,
        id: &ApprovalId,
    ) -> Result<Vec<ApprovalAction>, RepositoryError> {
        let actions = self.actions.read().await;
        Ok(actions.iter().filter(|action| action.approval_id == *id).cloned().collect())
    }

    async fn list_pending_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let user_roles = self.directory.roles_of(user_id).await?;
        let approvals = self.approvals.read().await;

        let mut pending = Vec::new();
        for approval in approvals.values() {
            if approval.status != ApprovalStatus::InProgress {
                continue;
            }
            let Some(workflow) = self.workflows.find_by_id(&approval.workflow_id).await? else {
                continue;
            };
            let Some(step) = workflow.step_at(approval.current_step_order) else {
                continue;
            };
            if fileway_core::can_act(user_id, &user_roles, step) {
                pending.push(approval.clone());
            }
        }
        pending.sort_by(|left, right| left.started_at.cmp(&right.started_at));
        Ok(pending)
    }
}
