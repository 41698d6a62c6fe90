use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use fileway_core::chrono::Utc;
use fileway_core::domain::approval::{
    ActionId, ActionType, Approval, ApprovalAction, ApprovalId, ApprovalStatus,
};
use fileway_core::domain::identity::UserId;
use fileway_core::domain::notification::Notification;
use fileway_core::domain::submission::SubmissionId;
use fileway_core::domain::workflow::{StepId, WorkflowId};

use super::notification::insert_notification;
use super::{
    parse_optional_timestamp, parse_timestamp, parse_u32, ActionCommit, ApprovalRepository,
    InitiationCommit, RepositoryError, SubmissionMutation,
};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const APPROVAL_COLUMNS: &str = "id, submission_id, workflow_id, status, current_step_order,
                                state_version, started_at, completed_at, created_at, updated_at";

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(approval_from_row).transpose()
    }

    async fn find_by_submission_id(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<Option<Approval>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals WHERE submission_id = ?"
        ))
        .bind(&submission_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(approval_from_row).transpose()
    }

    async fn create(&self, commit: InitiationCommit) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let approval = &commit.approval;

        let inserted = sqlx::query(
            "INSERT INTO approvals
                (id, submission_id, workflow_id, status, current_step_order,
                 state_version, started_at, completed_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id.0)
        .bind(&approval.submission_id.0)
        .bind(&approval.workflow_id.0)
        .bind(approval.status.as_str())
        .bind(i64::from(approval.current_step_order))
        .bind(i64::from(approval.state_version))
        .bind(approval.started_at.map(|value| value.to_rfc3339()))
        .bind(approval.completed_at.map(|value| value.to_rfc3339()))
        .bind(approval.created_at.to_rfc3339())
        .bind(approval.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            // The unique index on submission_id is the last line of defense
            // behind the service's existence check.
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                return Err(RepositoryError::Conflict {
                    entity_id: approval.submission_id.0.clone(),
                });
            }
            Err(error) => return Err(error.into()),
        }

        apply_submission_mutation(&mut tx, &commit.submission).await?;
        insert_notifications(&mut tx, &commit.notifications).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn commit_action(&self, commit: ActionCommit) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let updated = sqlx::query(
            "UPDATE approvals
             SET status = ?,
                 current_step_order = ?,
                 completed_at = COALESCE(?, completed_at),
                 state_version = state_version + 1,
                 updated_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(commit.approval.status.as_str())
        .bind(i64::from(commit.approval.current_step_order))
        .bind(commit.approval.completed_at.map(|value| value.to_rfc3339()))
        .bind(now.to_rfc3339())
        .bind(&commit.approval_id.0)
        .bind(i64::from(commit.expected_version))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Either the row vanished or a concurrent writer bumped the
            // version first; both surface as a retryable conflict.
            return Err(RepositoryError::Conflict { entity_id: commit.approval_id.0.clone() });
        }

        if let Some(action) = &commit.action {
            sqlx::query(
                "INSERT INTO approval_actions
                    (id, approval_id, step_id, actioned_by, action, comments,
                     actioned_at, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&action.id.0)
            .bind(&action.approval_id.0)
            .bind(&action.step_id.0)
            .bind(&action.actioned_by.0)
            .bind(action.action.as_str())
            .bind(action.comments.as_deref())
            .bind(action.actioned_at.to_rfc3339())
            .bind(action.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        if let Some(submission) = &commit.submission {
            apply_submission_mutation(&mut tx, submission).await?;
        }
        insert_notifications(&mut tx, &commit.notifications).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_actions(
        &self,
        id: &ApprovalId,
    ) -> Result<Vec<ApprovalAction>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, approval_id, step_id, actioned_by, action, comments,
                    actioned_at, created_at
             FROM approval_actions
             WHERE approval_id = ?
             ORDER BY actioned_at ASC, created_at ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(action_from_row).collect()
    }

    async fn list_pending_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS}
             FROM approvals
             WHERE status = 'in_progress'
               AND EXISTS (
                   SELECT 1
                   FROM approval_steps steps
                   WHERE steps.workflow_id = approvals.workflow_id
                     AND steps.step_order = approvals.current_step_order
                     AND (
                         EXISTS (
                             SELECT 1 FROM step_approver_users sau
                             WHERE sau.step_id = steps.id AND sau.user_id = ?
                         )
                         OR EXISTS (
                             SELECT 1
                             FROM step_approver_roles sar
                             JOIN user_roles ur ON ur.role_id = sar.role_id
                             WHERE sar.step_id = steps.id AND ur.user_id = ?
                         )
                     )
               )
             ORDER BY started_at ASC, created_at ASC"
        ))
        .bind(&user_id.0)
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(approval_from_row).collect()
    }
}

async fn apply_submission_mutation(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    mutation: &SubmissionMutation,
) -> Result<(), RepositoryError> {
    let now = Utc::now();
    let updated = sqlx::query(
        "UPDATE form_submissions
         SET status = ?, completed_at = COALESCE(?, completed_at), updated_at = ?
         WHERE id = ?",
    )
    .bind(mutation.status.as_str())
    .bind(mutation.completed_at.map(|value| value.to_rfc3339()))
    .bind(now.to_rfc3339())
    .bind(&mutation.submission_id.0)
    .execute(&mut **tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(RepositoryError::Missing { entity_id: mutation.submission_id.0.clone() });
    }
    Ok(())
}

async fn insert_notifications(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    notifications: &[Notification],
) -> Result<(), RepositoryError> {
    for notification in notifications {
        insert_notification(&mut **tx, notification).await?;
    }
    Ok(())
}

fn approval_from_row(row: SqliteRow) -> Result<Approval, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ApprovalStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown approval status `{status_raw}`"))
    })?;

    Ok(Approval {
        id: ApprovalId(row.try_get("id")?),
        submission_id: SubmissionId(row.try_get("submission_id")?),
        workflow_id: WorkflowId(row.try_get("workflow_id")?),
        status,
        current_step_order: parse_u32("current_step_order", row.try_get("current_step_order")?)?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        started_at: parse_optional_timestamp("started_at", row.try_get("started_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn action_from_row(row: SqliteRow) -> Result<ApprovalAction, RepositoryError> {
    let action_raw = row.try_get::<String, _>("action")?;
    let action = ActionType::parse(&action_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown action type `{action_raw}`")))?;

    Ok(ApprovalAction {
        id: ActionId(row.try_get("id")?),
        approval_id: ApprovalId(row.try_get("approval_id")?),
        step_id: StepId(row.try_get("step_id")?),
        actioned_by: UserId(row.try_get("actioned_by")?),
        action,
        comments: row.try_get("comments")?,
        actioned_at: parse_timestamp("actioned_at", row.try_get("actioned_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
