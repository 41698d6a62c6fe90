use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use fileway_core::chrono::{DateTime, Utc};
use fileway_core::domain::identity::UserId;
use fileway_core::domain::notification::{
    Notification, NotificationId, NotificationKind, NotificationStatus,
};

use super::{
    parse_optional_timestamp, parse_timestamp, parse_u32, NotificationRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlNotificationRepository {
    pool: DbPool,
}

impl SqlNotificationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Shared insert used both by [`SqlNotificationRepository::enqueue`] and by
/// the approval commit transaction, so outbox rows land inside the same
/// transaction as the transition they announce.
pub(crate) async fn insert_notification<'e, E>(
    executor: E,
    notification: &Notification,
) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO notifications
            (id, user_id, kind, subject, body, status, reference_type, reference_id,
             error_message, retry_count, sent_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&notification.id.0)
    .bind(&notification.user_id.0)
    .bind(notification.kind.as_str())
    .bind(&notification.subject)
    .bind(&notification.body)
    .bind(notification.status.as_str())
    .bind(&notification.reference_type)
    .bind(&notification.reference_id)
    .bind(notification.error_message.as_deref())
    .bind(i64::from(notification.retry_count))
    .bind(notification.sent_at.map(|value| value.to_rfc3339()))
    .bind(notification.created_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl NotificationRepository for SqlNotificationRepository {
    async fn enqueue(&self, notification: Notification) -> Result<(), RepositoryError> {
        insert_notification(&self.pool, &notification).await
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<Notification>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, kind, subject, body, status, reference_type, reference_id,
                    error_message, retry_count, sent_at, created_at
             FROM notifications
             WHERE status = 'pending'
             ORDER BY created_at ASC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(notification_from_row).collect()
    }

    async fn mark_sent(
        &self,
        id: &NotificationId,
        sent_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE notifications SET status = 'sent', sent_at = ?, error_message = NULL
             WHERE id = ?",
        )
        .bind(sent_at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Missing { entity_id: id.0.clone() });
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &NotificationId,
        error_message: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE notifications
             SET status = 'failed', error_message = ?, retry_count = retry_count + 1
             WHERE id = ?",
        )
        .bind(error_message)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Missing { entity_id: id.0.clone() });
        }
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, kind, subject, body, status, reference_type, reference_id,
                    error_message, retry_count, sent_at, created_at
             FROM notifications
             WHERE user_id = ?
             ORDER BY created_at DESC",
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(notification_from_row).collect()
    }
}

fn notification_from_row(row: SqliteRow) -> Result<Notification, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = NotificationKind::parse(&kind_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown notification kind `{kind_raw}`"))
    })?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = NotificationStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown notification status `{status_raw}`"))
    })?;

    Ok(Notification {
        id: NotificationId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        kind,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        status,
        reference_type: row.try_get("reference_type")?,
        reference_id: row.try_get("reference_id")?,
        error_message: row.try_get("error_message")?,
        retry_count: parse_u32("retry_count", row.try_get("retry_count")?)?,
        sent_at: parse_optional_timestamp("sent_at", row.try_get("sent_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use fileway_core::chrono::Utc;
    use fileway_core::domain::identity::UserId;
    use fileway_core::domain::notification::{
        Notification, NotificationKind, NotificationStatus,
    };

    use super::SqlNotificationRepository;
    use crate::repositories::{NotificationRepository, RepositoryError};
    use crate::{connect_in_memory, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_in_memory().await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn pending(user: &str, body: &str) -> Notification {
        Notification::pending(
            UserId(user.to_string()),
            NotificationKind::ApprovalRequired,
            "Approval Required",
            body,
            "Approval",
            "APR-1",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn enqueue_and_list_pending_in_fifo_order() {
        let pool = setup().await;
        let repo = SqlNotificationRepository::new(pool);

        let mut first = pending("U-A", "first");
        first.created_at = Utc::now() - fileway_core::chrono::Duration::seconds(10);
        repo.enqueue(first).await.expect("enqueue first");
        repo.enqueue(pending("U-B", "second")).await.expect("enqueue second");

        let rows = repo.list_pending(10).await.expect("list");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].body, "first");
        assert_eq!(rows[1].body, "second");
    }

    #[tokio::test]
    async fn mark_sent_removes_the_row_from_the_pending_set() {
        let pool = setup().await;
        let repo = SqlNotificationRepository::new(pool);

        let notification = pending("U-A", "deliver me");
        let id = notification.id.clone();
        repo.enqueue(notification).await.expect("enqueue");

        repo.mark_sent(&id, Utc::now()).await.expect("mark sent");

        assert!(repo.list_pending(10).await.expect("list").is_empty());
        let for_user =
            repo.list_for_user(&UserId("U-A".to_string())).await.expect("list for user");
        assert_eq!(for_user.len(), 1);
        assert_eq!(for_user[0].status, NotificationStatus::Sent);
        assert!(for_user[0].sent_at.is_some());
    }

    #[tokio::test]
    async fn mark_failed_records_the_error_and_bumps_retry_count() {
        let pool = setup().await;
        let repo = SqlNotificationRepository::new(pool);

        let notification = pending("U-A", "flaky");
        let id = notification.id.clone();
        repo.enqueue(notification).await.expect("enqueue");

        repo.mark_failed(&id, "smtp connection refused").await.expect("mark failed");

        let for_user =
            repo.list_for_user(&UserId("U-A".to_string())).await.expect("list for user");
        assert_eq!(for_user[0].status, NotificationStatus::Failed);
        assert_eq!(for_user[0].retry_count, 1);
        assert_eq!(for_user[0].error_message.as_deref(), Some("smtp connection refused"));
    }

    #[tokio::test]
    async fn marking_an_unknown_notification_reports_missing() {
        let pool = setup().await;
        let repo = SqlNotificationRepository::new(pool);

        let error = repo
            .mark_sent(
                &fileway_core::domain::notification::NotificationId("NTF-404".to_string()),
                Utc::now(),
            )
            .await
            .expect_err("must fail");
        assert!(matches!(error, RepositoryError::Missing { .. }));
    }
}
