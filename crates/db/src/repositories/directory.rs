use std::collections::BTreeSet;

use sqlx::Row;

use fileway_core::chrono::Utc;
use fileway_core::domain::identity::{RoleId, UserAccount, UserId};

use super::{parse_timestamp, RepositoryError, UserDirectory};
use crate::DbPool;

/// Role-resolution lookups over the `users`/`roles`/`user_roles` tables.
/// Account management happens elsewhere; the upsert helpers exist for seed
/// data and tests.
pub struct SqlUserDirectory {
    pool: DbPool,
}

impl SqlUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_user(
        &self,
        id: &UserId,
        email: &str,
        display_name: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (id, email, display_name, is_active, created_at)
             VALUES (?, ?, ?, 1, ?)
             ON CONFLICT(id) DO UPDATE SET
                 email = excluded.email,
                 display_name = excluded.display_name",
        )
        .bind(&id.0)
        .bind(email)
        .bind(display_name)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_role(&self, id: &RoleId, name: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO roles (id, name, description, created_at)
             VALUES (?, ?, NULL, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(&id.0)
        .bind(name)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn assign_role(
        &self,
        user_id: &UserId,
        role_id: &RoleId,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) VALUES (?, ?)
             ON CONFLICT(user_id, role_id) DO NOTHING",
        )
        .bind(&user_id.0)
        .bind(&role_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserAccount>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, email, display_name, is_active, created_at FROM users WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(UserAccount {
                id: UserId(row.try_get("id")?),
                email: row.try_get("email")?,
                display_name: row.try_get("display_name")?,
                is_active: row.try_get::<i64, _>("is_active")? != 0,
                created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
            })
        })
        .transpose()
    }

    async fn roles_of(&self, user_id: &UserId) -> Result<BTreeSet<RoleId>, RepositoryError> {
        let rows = sqlx::query("SELECT role_id FROM user_roles WHERE user_id = ?")
            .bind(&user_id.0)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| Ok(RoleId(row.try_get("role_id")?)))
            .collect::<Result<BTreeSet<_>, sqlx::Error>>()
            .map_err(RepositoryError::from)
    }

    async fn users_with_role(
        &self,
        role_id: &RoleId,
    ) -> Result<BTreeSet<UserId>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT ur.user_id
             FROM user_roles ur
             JOIN users u ON u.id = ur.user_id
             WHERE ur.role_id = ? AND u.is_active = 1",
        )
        .bind(&role_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok(UserId(row.try_get("user_id")?)))
            .collect::<Result<BTreeSet<_>, sqlx::Error>>()
            .map_err(RepositoryError::from)
    }
}
