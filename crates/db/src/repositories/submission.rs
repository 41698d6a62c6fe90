use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use fileway_core::chrono::{DateTime, Utc};
use fileway_core::domain::identity::UserId;
use fileway_core::domain::submission::{FormSubmission, SubmissionId, SubmissionStatus};

use super::{parse_optional_timestamp, parse_timestamp, RepositoryError, SubmissionRepository};
use crate::DbPool;

pub struct SqlSubmissionRepository {
    pool: DbPool,
}

impl SqlSubmissionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SubmissionRepository for SqlSubmissionRepository {
    async fn find_by_id(
        &self,
        id: &SubmissionId,
    ) -> Result<Option<FormSubmission>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, submission_number, submitted_by, data, status,
                    submitted_at, completed_at, created_at, updated_at
             FROM form_submissions WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(submission_from_row).transpose()
    }

    async fn save(&self, submission: FormSubmission) -> Result<(), RepositoryError> {
        let data = serde_json::to_string(&submission.data)
            .map_err(|error| RepositoryError::Decode(format!("submission data: {error}")))?;

        sqlx::query(
            "INSERT INTO form_submissions
                (id, submission_number, submitted_by, data, status,
                 submitted_at, completed_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 submission_number = excluded.submission_number,
                 submitted_by = excluded.submitted_by,
                 data = excluded.data,
                 status = excluded.status,
                 submitted_at = excluded.submitted_at,
                 completed_at = excluded.completed_at,
                 updated_at = excluded.updated_at",
        )
        .bind(&submission.id.0)
        .bind(&submission.submission_number)
        .bind(&submission.submitted_by.0)
        .bind(data)
        .bind(submission.status.as_str())
        .bind(submission.submitted_at.map(|value| value.to_rfc3339()))
        .bind(submission.completed_at.map(|value| value.to_rfc3339()))
        .bind(submission.created_at.to_rfc3339())
        .bind(submission.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_status(
        &self,
        id: &SubmissionId,
        status: SubmissionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE form_submissions
             SET status = ?, completed_at = COALESCE(?, completed_at), updated_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(completed_at.map(|value| value.to_rfc3339()))
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Missing { entity_id: id.0.clone() });
        }
        Ok(())
    }
}

pub(crate) fn submission_from_row(row: SqliteRow) -> Result<FormSubmission, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = SubmissionStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown submission status `{status_raw}`"))
    })?;

    let data_raw = row.try_get::<String, _>("data")?;
    let data = serde_json::from_str(&data_raw)
        .map_err(|error| RepositoryError::Decode(format!("submission data: {error}")))?;

    Ok(FormSubmission {
        id: SubmissionId(row.try_get("id")?),
        submission_number: row.try_get("submission_number")?,
        submitted_by: UserId(row.try_get("submitted_by")?),
        data,
        status,
        submitted_at: parse_optional_timestamp("submitted_at", row.try_get("submitted_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
