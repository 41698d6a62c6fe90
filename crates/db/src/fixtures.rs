use std::collections::BTreeSet;

use fileway_core::chrono::Utc;
use fileway_core::domain::identity::{RoleId, UserId};
use fileway_core::domain::submission::{FormSubmission, SubmissionId, SubmissionStatus};
use fileway_core::domain::workflow::{ApprovalStep, ApprovalWorkflow, StepId, WorkflowId};

use crate::connection::DbPool;
use crate::repositories::{
    RepositoryError, SqlSubmissionRepository, SqlUserDirectory, SqlWorkflowRepository,
    SubmissionRepository, WorkflowRepository,
};

const SEED_USERS: &[(&str, &str, &str)] = &[
    ("user-clerk-001", "clerk@fileway.example", "Dana Clerk"),
    ("user-registrar-001", "registrar@fileway.example", "Rui Registrar"),
    ("user-filer-001", "filer@fileway.example", "Femi Filer"),
];

const SEED_ROLES: &[(&str, &str)] =
    &[("role-clerk", "Back-office Clerk"), ("role-registrar", "Registrar")];

const SEED_ROLE_ASSIGNMENTS: &[(&str, &str)] =
    &[("user-clerk-001", "role-clerk"), ("user-registrar-001", "role-registrar")];

pub const SEED_WORKFLOW_ID: &str = "workflow-standard-001";
pub const SEED_WORKFLOW_CODE: &str = "STANDARD_FILING";
pub const SEED_SUBMISSION_ID: &str = "submission-demo-001";

/// Deterministic demo dataset: a directory with clerk/registrar roles, a
/// two-step filing workflow (clerk review, registrar sign-off), and one
/// submitted filing ready for `initiateApproval`.
pub struct SeedDataset;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub users: usize,
    pub roles: usize,
    pub workflows: usize,
    pub submissions: usize,
}

impl SeedDataset {
    pub async fn apply(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let directory = SqlUserDirectory::new(pool.clone());
        for (id, email, display_name) in SEED_USERS {
            directory.upsert_user(&UserId((*id).to_string()), email, display_name).await?;
        }
        for (id, name) in SEED_ROLES {
            directory.upsert_role(&RoleId((*id).to_string()), name).await?;
        }
        for (user_id, role_id) in SEED_ROLE_ASSIGNMENTS {
            directory
                .assign_role(&UserId((*user_id).to_string()), &RoleId((*role_id).to_string()))
                .await?;
        }

        SqlWorkflowRepository::new(pool.clone()).save(Self::standard_workflow()).await?;
        SqlSubmissionRepository::new(pool.clone()).save(Self::demo_submission()).await?;

        Ok(SeedResult {
            users: SEED_USERS.len(),
            roles: SEED_ROLES.len(),
            workflows: 1,
            submissions: 1,
        })
    }

    pub fn standard_workflow() -> ApprovalWorkflow {
        let now = Utc::now();
        ApprovalWorkflow {
            id: WorkflowId(SEED_WORKFLOW_ID.to_string()),
            name: "Standard institutional filing".to_string(),
            description: Some(
                "Clerk review followed by registrar sign-off for routine filings".to_string(),
            ),
            workflow_code: SEED_WORKFLOW_CODE.to_string(),
            steps: vec![
                ApprovalStep {
                    id: StepId("workflow-standard-001-s1".to_string()),
                    workflow_id: WorkflowId(SEED_WORKFLOW_ID.to_string()),
                    step_name: "Clerk review".to_string(),
                    step_order: 1,
                    description: Some("Completeness and checklist review".to_string()),
                    approver_users: BTreeSet::new(),
                    approver_roles: BTreeSet::from([RoleId("role-clerk".to_string())]),
                    requires_all_approvers: false,
                    is_final_step: false,
                    requires_signature: false,
                    auto_approve_hours: Some(72),
                },
                ApprovalStep {
                    id: StepId("workflow-standard-001-s2".to_string()),
                    workflow_id: WorkflowId(SEED_WORKFLOW_ID.to_string()),
                    step_name: "Registrar sign-off".to_string(),
                    step_order: 2,
                    description: None,
                    approver_users: BTreeSet::new(),
                    approver_roles: BTreeSet::from([RoleId("role-registrar".to_string())]),
                    requires_all_approvers: false,
                    is_final_step: true,
                    requires_signature: true,
                    auto_approve_hours: None,
                },
            ],
            is_active: true,
            requires_digital_signature: true,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn demo_submission() -> FormSubmission {
        let now = Utc::now();
        FormSubmission {
            id: SubmissionId(SEED_SUBMISSION_ID.to_string()),
            submission_number: "FIL-2026-0001".to_string(),
            submitted_by: UserId("user-filer-001".to_string()),
            data: serde_json::json!({
                "form": "annual-registry-statement",
                "institution": "Meridian Savings Bank",
            }),
            status: SubmissionStatus::Submitted,
            submitted_at: Some(now),
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
