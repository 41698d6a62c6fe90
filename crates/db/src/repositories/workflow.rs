use std::collections::BTreeSet;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use fileway_core::domain::identity::{RoleId, UserId};
use fileway_core::domain::workflow::{ApprovalStep, ApprovalWorkflow, StepId, WorkflowId};

use super::{parse_timestamp, parse_u32, RepositoryError, WorkflowRepository};
use crate::DbPool;

pub struct SqlWorkflowRepository {
    pool: DbPool,
}

impl SqlWorkflowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_steps(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<ApprovalStep>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, workflow_id, step_name, step_order, description,
                    requires_all_approvers, is_final_step, requires_signature, auto_approve_hours
             FROM approval_steps
             WHERE workflow_id = ?
             ORDER BY step_order ASC",
        )
        .bind(&workflow_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in rows {
            let mut step = step_from_row(row)?;

            let user_rows =
                sqlx::query("SELECT user_id FROM step_approver_users WHERE step_id = ?")
                    .bind(&step.id.0)
                    .fetch_all(&self.pool)
                    .await?;
            step.approver_users = user_rows
                .into_iter()
                .map(|row| Ok(UserId(row.try_get("user_id")?)))
                .collect::<Result<BTreeSet<_>, sqlx::Error>>()?;

            let role_rows =
                sqlx::query("SELECT role_id FROM step_approver_roles WHERE step_id = ?")
                    .bind(&step.id.0)
                    .fetch_all(&self.pool)
                    .await?;
            step.approver_roles = role_rows
                .into_iter()
                .map(|row| Ok(RoleId(row.try_get("role_id")?)))
                .collect::<Result<BTreeSet<_>, sqlx::Error>>()?;

            steps.push(step);
        }

        Ok(steps)
    }

    async fn load_workflow(
        &self,
        row: SqliteRow,
    ) -> Result<ApprovalWorkflow, RepositoryError> {
        let mut workflow = workflow_from_row(row)?;
        workflow.steps = self.load_steps(&workflow.id).await?;
        Ok(workflow)
    }
}

#[async_trait::async_trait]
impl WorkflowRepository for SqlWorkflowRepository {
    async fn find_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, description, workflow_code, is_active,
                    requires_digital_signature, created_by, created_at, updated_at
             FROM approval_workflows WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_workflow(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, description, workflow_code, is_active,
                    requires_digital_signature, created_by, created_at, updated_at
             FROM approval_workflows WHERE workflow_code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_workflow(row).await?)),
            None => Ok(None),
        }
    }

    async fn save(&self, workflow: ApprovalWorkflow) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_workflows
                (id, name, description, workflow_code, is_active,
                 requires_digital_signature, created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 workflow_code = excluded.workflow_code,
                 is_active = excluded.is_active,
                 requires_digital_signature = excluded.requires_digital_signature,
                 created_by = excluded.created_by,
                 updated_at = excluded.updated_at",
        )
        .bind(&workflow.id.0)
        .bind(&workflow.name)
        .bind(workflow.description.as_deref())
        .bind(&workflow.workflow_code)
        .bind(i64::from(workflow.is_active))
        .bind(i64::from(workflow.requires_digital_signature))
        .bind(workflow.created_by.as_ref().map(|user| user.0.as_str()))
        .bind(workflow.created_at.to_rfc3339())
        .bind(workflow.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        // Steps are exclusively owned; replacing the full set keeps the saved
        // template and its join rows in lockstep.
        sqlx::query("DELETE FROM approval_steps WHERE workflow_id = ?")
            .bind(&workflow.id.0)
            .execute(&mut *tx)
            .await?;

        for step in &workflow.steps {
            sqlx::query(
                "INSERT INTO approval_steps
                    (id, workflow_id, step_name, step_order, description,
                     requires_all_approvers, is_final_step, requires_signature, auto_approve_hours)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&step.id.0)
            .bind(&workflow.id.0)
            .bind(&step.step_name)
            .bind(i64::from(step.step_order))
            .bind(step.description.as_deref())
            .bind(i64::from(step.requires_all_approvers))
            .bind(i64::from(step.is_final_step))
            .bind(i64::from(step.requires_signature))
            .bind(step.auto_approve_hours.map(i64::from))
            .execute(&mut *tx)
            .await?;

            for user_id in &step.approver_users {
                sqlx::query("INSERT INTO step_approver_users (step_id, user_id) VALUES (?, ?)")
                    .bind(&step.id.0)
                    .bind(&user_id.0)
                    .execute(&mut *tx)
                    .await?;
            }

            for role_id in &step.approver_roles {
                sqlx::query("INSERT INTO step_approver_roles (step_id, role_id) VALUES (?, ?)")
                    .bind(&step.id.0)
                    .bind(&role_id.0)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, description, workflow_code, is_active,
                    requires_digital_signature, created_by, created_at, updated_at
             FROM approval_workflows
             WHERE is_active = 1
             ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in rows {
            workflows.push(self.load_workflow(row).await?);
        }
        Ok(workflows)
    }

    async fn delete(&self, id: &WorkflowId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM approval_workflows WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Missing { entity_id: id.0.clone() });
        }
        Ok(())
    }
}

fn workflow_from_row(row: SqliteRow) -> Result<ApprovalWorkflow, RepositoryError> {
    Ok(ApprovalWorkflow {
        id: WorkflowId(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        workflow_code: row.try_get("workflow_code")?,
        steps: Vec::new(),
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        requires_digital_signature: row.try_get::<i64, _>("requires_digital_signature")? != 0,
        created_by: row.try_get::<Option<String>, _>("created_by")?.map(UserId),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn step_from_row(row: SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    Ok(ApprovalStep {
        id: StepId(row.try_get("id")?),
        workflow_id: WorkflowId(row.try_get("workflow_id")?),
        step_name: row.try_get("step_name")?,
        step_order: parse_u32("step_order", row.try_get("step_order")?)?,
        description: row.try_get("description")?,
        approver_users: BTreeSet::new(),
        approver_roles: BTreeSet::new(),
        requires_all_approvers: row.try_get::<i64, _>("requires_all_approvers")? != 0,
        is_final_step: row.try_get::<i64, _>("is_final_step")? != 0,
        requires_signature: row.try_get::<i64, _>("requires_signature")? != 0,
        auto_approve_hours: row
            .try_get::<Option<i64>, _>("auto_approve_hours")?
            .map(|value| parse_u32("auto_approve_hours", value))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use fileway_core::chrono::Utc;
    use fileway_core::domain::identity::{RoleId, UserId};
    use fileway_core::domain::workflow::{ApprovalStep, ApprovalWorkflow, StepId, WorkflowId};

    use super::SqlWorkflowRepository;
    use crate::repositories::{RepositoryError, WorkflowRepository};
    use crate::{connect_in_memory, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_in_memory().await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_workflow(id: &str, code: &str) -> ApprovalWorkflow {
        let now = Utc::now();
        ApprovalWorkflow {
            id: WorkflowId(id.to_string()),
            name: "Institutional filing".to_string(),
            description: Some("Two-stage review for institutional filings".to_string()),
            workflow_code: code.to_string(),
            steps: vec![
                ApprovalStep {
                    id: StepId(format!("{id}-S1")),
                    workflow_id: WorkflowId(id.to_string()),
                    step_name: "Clerk review".to_string(),
                    step_order: 1,
                    description: None,
                    approver_users: BTreeSet::from([UserId("U-CLERK".to_string())]),
                    approver_roles: BTreeSet::new(),
                    requires_all_approvers: false,
                    is_final_step: false,
                    requires_signature: false,
                    auto_approve_hours: Some(48),
                },
                ApprovalStep {
                    id: StepId(format!("{id}-S2")),
                    workflow_id: WorkflowId(id.to_string()),
                    step_name: "Registrar sign-off".to_string(),
                    step_order: 2,
                    description: Some("Final institutional sign-off".to_string()),
                    approver_users: BTreeSet::new(),
                    approver_roles: BTreeSet::from([RoleId("R-REGISTRAR".to_string())]),
                    requires_all_approvers: false,
                    is_final_step: true,
                    requires_signature: true,
                    auto_approve_hours: None,
                },
            ],
            is_active: true,
            requires_digital_signature: true,
            created_by: Some(UserId("U-ADMIN".to_string())),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trips_steps_and_approver_sets() {
        let pool = setup().await;
        let repo = SqlWorkflowRepository::new(pool);
        let workflow = sample_workflow("WF-001", "INSTITUTIONAL_FILING");

        repo.save(workflow.clone()).await.expect("save");
        let found = repo
            .find_by_id(&WorkflowId("WF-001".to_string()))
            .await
            .expect("find")
            .expect("should exist");

        assert_eq!(found.workflow_code, "INSTITUTIONAL_FILING");
        assert_eq!(found.steps.len(), 2);
        assert_eq!(found.steps[0].step_order, 1);
        assert!(found.steps[0].approver_users.contains(&UserId("U-CLERK".to_string())));
        assert_eq!(found.steps[0].auto_approve_hours, Some(48));
        assert!(found.steps[1].is_final_step);
        assert!(found.steps[1].approver_roles.contains(&RoleId("R-REGISTRAR".to_string())));
    }

    #[tokio::test]
    async fn find_by_code_resolves_the_same_workflow() {
        let pool = setup().await;
        let repo = SqlWorkflowRepository::new(pool);
        repo.save(sample_workflow("WF-001", "INSTITUTIONAL_FILING")).await.expect("save");

        let found = repo
            .find_by_code("INSTITUTIONAL_FILING")
            .await
            .expect("find")
            .expect("should exist");
        assert_eq!(found.id, WorkflowId("WF-001".to_string()));
    }

    #[tokio::test]
    async fn save_replaces_the_owned_step_set() {
        let pool = setup().await;
        let repo = SqlWorkflowRepository::new(pool);

        let mut workflow = sample_workflow("WF-001", "INSTITUTIONAL_FILING");
        repo.save(workflow.clone()).await.expect("save");

        workflow.steps.truncate(1);
        workflow.steps[0].is_final_step = true;
        repo.save(workflow).await.expect("re-save");

        let found = repo
            .find_by_id(&WorkflowId("WF-001".to_string()))
            .await
            .expect("find")
            .expect("should exist");
        assert_eq!(found.steps.len(), 1);
        assert!(found.steps[0].is_final_step);
    }

    #[tokio::test]
    async fn list_active_excludes_inactive_workflows() {
        let pool = setup().await;
        let repo = SqlWorkflowRepository::new(pool);

        repo.save(sample_workflow("WF-001", "CODE_A")).await.expect("save active");
        let mut inactive = sample_workflow("WF-002", "CODE_B");
        inactive.is_active = false;
        repo.save(inactive).await.expect("save inactive");

        let active = repo.list_active().await.expect("list");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, WorkflowId("WF-001".to_string()));
    }

    #[tokio::test]
    async fn delete_removes_workflow_and_owned_steps() {
        let pool = setup().await;
        let repo = SqlWorkflowRepository::new(pool.clone());
        repo.save(sample_workflow("WF-001", "CODE_A")).await.expect("save");

        repo.delete(&WorkflowId("WF-001".to_string())).await.expect("delete");

        assert!(repo
            .find_by_id(&WorkflowId("WF-001".to_string()))
            .await
            .expect("find")
            .is_none());

        let orphan_steps: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM approval_steps WHERE workflow_id = 'WF-001'")
                .fetch_one(&pool)
                .await
                .expect("count steps");
        assert_eq!(orphan_steps, 0, "cascade should delete owned steps");
    }

    #[tokio::test]
    async fn delete_of_unknown_workflow_reports_missing() {
        let pool = setup().await;
        let repo = SqlWorkflowRepository::new(pool);

        let error =
            repo.delete(&WorkflowId("WF-404".to_string())).await.expect_err("must fail");
        assert!(matches!(error, RepositoryError::Missing { .. }));
    }
}
