//! Approval workflow service and its JSON API.
//!
//! Endpoints:
//! - `GET  /api/v1/approvals/pending`                    — approvals awaiting the caller
//! - `GET  /api/v1/approvals/{id}`                       — approval detail with action history
//! - `POST /api/v1/approvals/{id}/action`                — submit approve/reject/request-changes/comment
//! - `POST /api/v1/approvals/{id}/cancel`                — withdraw an in-progress approval
//! - `POST /api/v1/submissions/{submission_id}/initiate` — start an approval for a submission
//! - `POST /api/v1/submissions/{submission_id}/approve`  — approve the caller's pending approval
//! - `POST /api/v1/submissions/{submission_id}/reject`   — reject the caller's pending approval
//!
//! The acting user arrives in the `X-User-Id` header; session management is
//! handled upstream. Every state transition commits atomically with its
//! audit action and outbox rows, guarded by the approval's `state_version`.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use fileway_core::chrono::Utc;
use fileway_core::domain::approval::{
    ActionId, ActionType, Approval, ApprovalAction, ApprovalId, ApprovalStatus,
};
use fileway_core::domain::identity::UserId;
use fileway_core::domain::notification::{Notification, NotificationKind};
use fileway_core::domain::submission::{FormSubmission, SubmissionId, SubmissionStatus};
use fileway_core::domain::workflow::{ApprovalStep, ApprovalWorkflow, WorkflowId};
use fileway_core::errors::{ApprovalError, ErrorKind};
use fileway_core::{apply_action, can_act, cancel, current_step, validate_for_initiation};
use fileway_core::ApprovalEffect;
use fileway_db::repositories::{
    ActionCommit, ApprovalMutation, ApprovalRepository, InitiationCommit, RepositoryError,
    SqlApprovalRepository, SqlSubmissionRepository, SqlUserDirectory, SqlWorkflowRepository,
    SubmissionMutation, SubmissionRepository, UserDirectory, WorkflowRepository,
};
use fileway_db::DbPool;

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct ApprovalService {
    workflows: Arc<dyn WorkflowRepository>,
    submissions: Arc<dyn SubmissionRepository>,
    approvals: Arc<dyn ApprovalRepository>,
    directory: Arc<dyn UserDirectory>,
}

impl ApprovalService {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        submissions: Arc<dyn SubmissionRepository>,
        approvals: Arc<dyn ApprovalRepository>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self { workflows, submissions, approvals, directory }
    }

    pub fn with_pool(pool: DbPool) -> Self {
        Self::new(
            Arc::new(SqlWorkflowRepository::new(pool.clone())),
            Arc::new(SqlSubmissionRepository::new(pool.clone())),
            Arc::new(SqlApprovalRepository::new(pool.clone())),
            Arc::new(SqlUserDirectory::new(pool)),
        )
    }

    /// Start an approval for a submission against a workflow template.
    pub async fn initiate(
        &self,
        submission_id: &SubmissionId,
        workflow_id: &WorkflowId,
    ) -> Result<Approval, ApprovalError> {
        let workflow = self
            .workflows
            .find_by_id(workflow_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApprovalError::WorkflowNotFound {
                workflow_id: workflow_id.0.clone(),
            })?;

        self.initiate_with_workflow(submission_id, workflow).await
    }

    /// Start an approval, resolving the workflow by its unique code.
    pub async fn initiate_by_code(
        &self,
        submission_id: &SubmissionId,
        workflow_code: &str,
    ) -> Result<Approval, ApprovalError> {
        let workflow = self
            .workflows
            .find_by_code(workflow_code)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApprovalError::WorkflowNotFound {
                workflow_id: workflow_code.to_owned(),
            })?;

        self.initiate_with_workflow(submission_id, workflow).await
    }

    async fn initiate_with_workflow(
        &self,
        submission_id: &SubmissionId,
        workflow: ApprovalWorkflow,
    ) -> Result<Approval, ApprovalError> {
        validate_for_initiation(&workflow)?;

        let submission = self.load_submission(submission_id).await?;

        if let Some(existing) =
            self.approvals.find_by_submission_id(submission_id).await.map_err(persistence)?
        {
            return Err(ApprovalError::AlreadyInitiated {
                submission_id: submission_id.0.clone(),
                approval_id: existing.id.0.clone(),
            });
        }

        let now = Utc::now();
        let approval = Approval {
            id: ApprovalId(format!("APR-{}", Uuid::new_v4())),
            submission_id: submission_id.clone(),
            workflow_id: workflow.id.clone(),
            status: ApprovalStatus::InProgress,
            current_step_order: 1,
            state_version: 1,
            started_at: Some(now),
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        let first_step = workflow.step_at(1).ok_or_else(|| ApprovalError::EmptyWorkflow {
            workflow_id: workflow.id.0.clone(),
        })?;
        let notifications =
            self.step_approver_notifications(first_step, &approval, &submission).await;

        self.approvals
            .create(InitiationCommit {
                approval: approval.clone(),
                submission: SubmissionMutation {
                    submission_id: submission_id.clone(),
                    status: SubmissionStatus::UnderReview,
                    completed_at: None,
                },
                notifications,
            })
            .await
            .map_err(|error| match error {
                RepositoryError::Conflict { .. } => ApprovalError::AlreadyInitiated {
                    submission_id: submission_id.0.clone(),
                    approval_id: "existing".to_owned(),
                },
                other => persistence(other),
            })?;

        info!(
            event_name = "approval.initiated",
            approval_id = %approval.id.0,
            submission_id = %submission_id.0,
            workflow_id = %workflow.id.0,
            "approval started at step 1"
        );

        Ok(approval)
    }

    /// Process one action by an authorized actor against the current step.
    pub async fn process_action(
        &self,
        approval_id: &ApprovalId,
        acting_user: &UserId,
        action: ActionType,
        comments: Option<String>,
    ) -> Result<(), ApprovalError> {
        let approval = self.load_approval(approval_id).await?;
        let workflow = self.load_workflow_of(&approval).await?;
        let step = current_step(&approval, &workflow)?;

        // Role holdings are re-read on every action; membership changes
        // between steps must be observed.
        let user_roles = self.directory.roles_of(acting_user).await.map_err(persistence)?;
        if !can_act(acting_user, &user_roles, step) {
            return Err(ApprovalError::Unauthorized {
                user_id: acting_user.0.clone(),
                step_order: step.step_order,
            });
        }

        let outcome = apply_action(&approval, &workflow, action)?;
        let submission = self.load_submission(&approval.submission_id).await?;
        let now = Utc::now();

        let mut submission_mutation = None;
        let mut notifications = Vec::new();
        for effect in &outcome.effects {
            match effect {
                ApprovalEffect::SubmissionStatusChange { status, completed } => {
                    submission_mutation = Some(SubmissionMutation {
                        submission_id: approval.submission_id.clone(),
                        status: *status,
                        completed_at: completed.then_some(now),
                    });
                }
                ApprovalEffect::NotifyStepApprovers { step_order } => {
                    let next_step = workflow.step_at(*step_order).ok_or_else(|| {
                        ApprovalError::StepDesynchronized {
                            approval_id: approval.id.0.clone(),
                            workflow_id: workflow.id.0.clone(),
                            step_order: *step_order,
                        }
                    })?;
                    notifications.extend(
                        self.step_approver_notifications(next_step, &approval, &submission).await,
                    );
                }
                ApprovalEffect::NotifySubmitter { kind } => {
                    notifications.push(submitter_notification(*kind, &submission));
                }
            }
        }

        let recorded_action = ApprovalAction {
            id: ActionId(format!("ACT-{}", Uuid::new_v4())),
            approval_id: approval.id.clone(),
            step_id: step.id.clone(),
            actioned_by: acting_user.clone(),
            action,
            comments,
            actioned_at: now,
            created_at: now,
        };

        self.approvals
            .commit_action(ActionCommit {
                approval_id: approval.id.clone(),
                expected_version: approval.state_version,
                action: Some(recorded_action),
                approval: ApprovalMutation {
                    status: outcome.to_status,
                    current_step_order: outcome.next_step_order,
                    completed_at: outcome.completed.then_some(now),
                },
                submission: submission_mutation,
                notifications,
            })
            .await
            .map_err(|error| match error {
                RepositoryError::Conflict { .. } => {
                    ApprovalError::Conflict { approval_id: approval.id.0.clone() }
                }
                other => persistence(other),
            })?;

        info!(
            event_name = "approval.action_processed",
            approval_id = %approval.id.0,
            submission_id = %approval.submission_id.0,
            actioned_by = %acting_user.0,
            action = action.as_str(),
            from_status = outcome.from_status.as_str(),
            to_status = outcome.to_status.as_str(),
            step_order = outcome.next_step_order,
            "approval action committed"
        );

        Ok(())
    }

    /// Withdraw an in-progress approval, marking the submission withdrawn.
    pub async fn cancel(&self, approval_id: &ApprovalId) -> Result<(), ApprovalError> {
        let approval = self.load_approval(approval_id).await?;
        let outcome = cancel(&approval)?;
        let now = Utc::now();

        let submission_mutation = outcome.effects.iter().find_map(|effect| match effect {
            ApprovalEffect::SubmissionStatusChange { status, completed } => {
                Some(SubmissionMutation {
                    submission_id: approval.submission_id.clone(),
                    status: *status,
                    completed_at: completed.then_some(now),
                })
            }
            _ => None,
        });

        self.approvals
            .commit_action(ActionCommit {
                approval_id: approval.id.clone(),
                expected_version: approval.state_version,
                action: None,
                approval: ApprovalMutation {
                    status: outcome.to_status,
                    current_step_order: outcome.next_step_order,
                    completed_at: Some(now),
                },
                submission: submission_mutation,
                notifications: Vec::new(),
            })
            .await
            .map_err(|error| match error {
                RepositoryError::Conflict { .. } => {
                    ApprovalError::Conflict { approval_id: approval.id.0.clone() }
                }
                other => persistence(other),
            })?;

        info!(
            event_name = "approval.cancelled",
            approval_id = %approval.id.0,
            submission_id = %approval.submission_id.0,
            "approval withdrawn"
        );

        Ok(())
    }

    /// Approvals whose active step's resolved actor set contains the user.
    pub async fn pending_for(&self, user_id: &UserId) -> Result<Vec<Approval>, ApprovalError> {
        self.approvals.list_pending_for_user(user_id).await.map_err(persistence)
    }

    pub async fn approval_with_history(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<(Approval, Vec<ApprovalAction>), ApprovalError> {
        let approval = self.load_approval(approval_id).await?;
        let actions = self.approvals.list_actions(approval_id).await.map_err(persistence)?;
        Ok((approval, actions))
    }

    /// Document-centric convenience: resolve the caller's pending approval
    /// for a submission and apply a fixed action.
    pub async fn act_on_submission(
        &self,
        submission_id: &SubmissionId,
        acting_user: &UserId,
        action: ActionType,
        comments: Option<String>,
    ) -> Result<(), ApprovalError> {
        let pending = self.pending_for(acting_user).await?;
        let approval = pending
            .into_iter()
            .find(|approval| approval.submission_id == *submission_id)
            .ok_or_else(|| ApprovalError::NoPendingApproval {
                submission_id: submission_id.0.clone(),
            })?;

        self.process_action(&approval.id, acting_user, action, comments).await
    }

    async fn load_approval(&self, approval_id: &ApprovalId) -> Result<Approval, ApprovalError> {
        self.approvals
            .find_by_id(approval_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApprovalError::ApprovalNotFound { approval_id: approval_id.0.clone() })
    }

    async fn load_submission(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<FormSubmission, ApprovalError> {
        self.submissions
            .find_by_id(submission_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApprovalError::SubmissionNotFound {
                submission_id: submission_id.0.clone(),
            })
    }

    async fn load_workflow_of(
        &self,
        approval: &Approval,
    ) -> Result<ApprovalWorkflow, ApprovalError> {
        self.workflows.find_by_id(&approval.workflow_id).await.map_err(persistence)?.ok_or_else(
            || ApprovalError::StepDesynchronized {
                approval_id: approval.id.0.clone(),
                workflow_id: approval.workflow_id.0.clone(),
                step_order: approval.current_step_order,
            },
        )
    }

    /// APPROVAL_REQUIRED notifications for a step's resolved actor set.
    /// Role fan-out is best-effort: a failed directory lookup degrades to
    /// the step's direct approver users and is logged, never escalated.
    async fn step_approver_notifications(
        &self,
        step: &ApprovalStep,
        approval: &Approval,
        submission: &FormSubmission,
    ) -> Vec<Notification> {
        let now = Utc::now();
        let mut actors: BTreeSet<UserId> = step.approver_users.clone();

        for role in &step.approver_roles {
            match self.directory.users_with_role(role).await {
                Ok(holders) => actors.extend(holders),
                Err(error) => {
                    warn!(
                        event_name = "approval.role_fanout_degraded",
                        approval_id = %approval.id.0,
                        role_id = %role.0,
                        error = %error,
                        "role membership lookup unavailable; notifying direct approvers only"
                    );
                }
            }
        }

        actors
            .into_iter()
            .map(|user_id| {
                Notification::pending(
                    user_id,
                    NotificationKind::ApprovalRequired,
                    "Approval Required",
                    format!(
                        "A submission requires your approval: {}",
                        submission.submission_number
                    ),
                    "Approval",
                    approval.id.0.clone(),
                    now,
                )
            })
            .collect()
    }
}

fn submitter_notification(kind: NotificationKind, submission: &FormSubmission) -> Notification {
    let (subject, body) = match kind {
        NotificationKind::Approved => (
            "Submission Approved",
            format!("Your submission {} has been approved.", submission.submission_number),
        ),
        NotificationKind::Rejected => (
            "Submission Rejected",
            format!("Your submission {} has been rejected.", submission.submission_number),
        ),
        NotificationKind::ChangesRequested => (
            "Changes Requested",
            format!(
                "Changes have been requested for your submission {}",
                submission.submission_number
            ),
        ),
        _ => (
            "Submission Update",
            format!("Your submission {} has been updated.", submission.submission_number),
        ),
    };

    Notification::pending(
        submission.submitted_by.clone(),
        kind,
        subject,
        body,
        "FormSubmission",
        submission.id.0.clone(),
        Utc::now(),
    )
}

fn persistence(error: RepositoryError) -> ApprovalError {
    ApprovalError::Persistence(error.to_string())
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: ActionType,
    pub comments: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommentsRequest {
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InitiateRequest {
    pub workflow_code: String,
}

#[derive(Debug, Serialize)]
pub struct ApiMessage {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ApprovalView {
    pub id: String,
    pub submission_id: String,
    pub workflow_id: String,
    pub status: ApprovalStatus,
    pub current_step_order: u32,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl From<&Approval> for ApprovalView {
    fn from(approval: &Approval) -> Self {
        Self {
            id: approval.id.0.clone(),
            submission_id: approval.submission_id.0.clone(),
            workflow_id: approval.workflow_id.0.clone(),
            status: approval.status,
            current_step_order: approval.current_step_order,
            started_at: approval.started_at.map(|value| value.to_rfc3339()),
            completed_at: approval.completed_at.map(|value| value.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ActionView {
    pub id: String,
    pub step_id: String,
    pub actioned_by: String,
    pub action: ActionType,
    pub comments: Option<String>,
    pub actioned_at: String,
}

impl From<&ApprovalAction> for ActionView {
    fn from(action: &ApprovalAction) -> Self {
        Self {
            id: action.id.0.clone(),
            step_id: action.step_id.0.clone(),
            actioned_by: action.actioned_by.0.clone(),
            action: action.action,
            comments: action.comments.clone(),
            actioned_at: action.actioned_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApprovalDetailResponse {
    pub approval: ApprovalView,
    pub actions: Vec<ActionView>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ApprovalApiState {
    service: Arc<ApprovalService>,
}

pub fn router(pool: DbPool) -> Router {
    router_with_service(Arc::new(ApprovalService::with_pool(pool)))
}

pub fn router_with_service(service: Arc<ApprovalService>) -> Router {
    Router::new()
        .route("/api/v1/approvals/pending", get(list_pending))
        .route("/api/v1/approvals/{id}", get(get_approval))
        .route("/api/v1/approvals/{id}/action", post(post_action))
        .route("/api/v1/approvals/{id}/cancel", post(post_cancel))
        .route("/api/v1/submissions/{submission_id}/initiate", post(post_initiate))
        .route("/api/v1/submissions/{submission_id}/approve", post(post_approve_submission))
        .route("/api/v1/submissions/{submission_id}/reject", post(post_reject_submission))
        .with_state(ApprovalApiState { service })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn acting_user(headers: &HeaderMap) -> Result<UserId, (StatusCode, Json<ApiError>)> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| UserId(value.to_owned()))
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ApiError { error: "missing X-User-Id header".to_owned() }),
            )
        })
}

fn error_response(error: ApprovalError) -> (StatusCode, Json<ApiError>) {
    let status = match &error {
        ApprovalError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        other => match other.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvalidState | ErrorKind::InvalidWorkflow => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        },
    };
    (status, Json(ApiError { error: error.to_string() }))
}

async fn list_pending(
    State(state): State<ApprovalApiState>,
    headers: HeaderMap,
) -> ApiResult<Vec<ApprovalView>> {
    let user = acting_user(&headers)?;
    let pending = state.service.pending_for(&user).await.map_err(error_response)?;
    Ok(Json(pending.iter().map(ApprovalView::from).collect()))
}

async fn get_approval(
    Path(id): Path<String>,
    State(state): State<ApprovalApiState>,
) -> ApiResult<ApprovalDetailResponse> {
    let (approval, actions) = state
        .service
        .approval_with_history(&ApprovalId(id))
        .await
        .map_err(error_response)?;

    Ok(Json(ApprovalDetailResponse {
        approval: ApprovalView::from(&approval),
        actions: actions.iter().map(ActionView::from).collect(),
    }))
}

async fn post_action(
    Path(id): Path<String>,
    State(state): State<ApprovalApiState>,
    headers: HeaderMap,
    Json(body): Json<ActionRequest>,
) -> ApiResult<ApiMessage> {
    let user = acting_user(&headers)?;
    state
        .service
        .process_action(&ApprovalId(id), &user, body.action, body.comments)
        .await
        .map_err(error_response)?;

    Ok(Json(ApiMessage {
        success: true,
        message: "Approval action processed successfully".to_owned(),
    }))
}

async fn post_cancel(
    Path(id): Path<String>,
    State(state): State<ApprovalApiState>,
    headers: HeaderMap,
) -> ApiResult<ApiMessage> {
    // Cancellation needs an authenticated caller even though no audit action
    // is recorded for it.
    acting_user(&headers)?;
    state.service.cancel(&ApprovalId(id)).await.map_err(error_response)?;

    Ok(Json(ApiMessage { success: true, message: "Approval cancelled".to_owned() }))
}

async fn post_initiate(
    Path(submission_id): Path<String>,
    State(state): State<ApprovalApiState>,
    Json(body): Json<InitiateRequest>,
) -> ApiResult<ApprovalView> {
    let approval = state
        .service
        .initiate_by_code(&SubmissionId(submission_id), &body.workflow_code)
        .await
        .map_err(error_response)?;

    Ok(Json(ApprovalView::from(&approval)))
}

async fn post_approve_submission(
    Path(submission_id): Path<String>,
    State(state): State<ApprovalApiState>,
    headers: HeaderMap,
    body: Option<Json<CommentsRequest>>,
) -> ApiResult<ApiMessage> {
    let user = acting_user(&headers)?;
    let comments = body
        .and_then(|Json(body)| body.comments)
        .unwrap_or_else(|| "Approved".to_owned());

    state
        .service
        .act_on_submission(&SubmissionId(submission_id), &user, ActionType::Approve, Some(comments))
        .await
        .map_err(error_response)?;

    Ok(Json(ApiMessage { success: true, message: "Document approved successfully".to_owned() }))
}

async fn post_reject_submission(
    Path(submission_id): Path<String>,
    State(state): State<ApprovalApiState>,
    headers: HeaderMap,
    body: Option<Json<CommentsRequest>>,
) -> ApiResult<ApiMessage> {
    let user = acting_user(&headers)?;
    let comments = body
        .and_then(|Json(body)| body.comments)
        .unwrap_or_else(|| "Rejected".to_owned());

    state
        .service
        .act_on_submission(&SubmissionId(submission_id), &user, ActionType::Reject, Some(comments))
        .await
        .map_err(error_response)?;

    Ok(Json(ApiMessage { success: true, message: "Document rejected successfully".to_owned() }))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use axum::Json;
    use tower::util::ServiceExt;

    use fileway_core::chrono::Utc;
    use fileway_core::domain::approval::{ActionType, ApprovalId, ApprovalStatus};
    use fileway_core::domain::identity::{RoleId, UserId};
    use fileway_core::domain::notification::NotificationKind;
    use fileway_core::domain::submission::{FormSubmission, SubmissionId, SubmissionStatus};
    use fileway_core::domain::workflow::{ApprovalStep, ApprovalWorkflow, StepId, WorkflowId};
    use fileway_db::repositories::{
        NotificationRepository, SqlNotificationRepository, SqlSubmissionRepository,
        SqlUserDirectory, SqlWorkflowRepository, SubmissionRepository, WorkflowRepository,
    };
    use fileway_db::{connect_in_memory, migrations, DbPool};

    use super::{
        acting_user, get_approval, list_pending, post_action, post_initiate, ActionRequest,
        ApprovalApiState, ApprovalService, InitiateRequest,
    };

    const WORKFLOW_ID: &str = "WF-TEST";
    const WORKFLOW_CODE: &str = "TEST_FILING";
    const SUBMISSION_ID: &str = "SUB-TEST";

    async fn setup() -> (DbPool, Arc<ApprovalService>) {
        let pool = connect_in_memory().await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        // Workflow W1: step 1 gated on user A directly, step 2 (final) gated
        // on a registrar role held by user B.
        let now = Utc::now();
        let workflow = ApprovalWorkflow {
            id: WorkflowId(WORKFLOW_ID.to_string()),
            name: "Test filing".to_string(),
            description: None,
            workflow_code: WORKFLOW_CODE.to_string(),
            steps: vec![
                ApprovalStep {
                    id: StepId("WF-TEST-S1".to_string()),
                    workflow_id: WorkflowId(WORKFLOW_ID.to_string()),
                    step_name: "Clerk review".to_string(),
                    step_order: 1,
                    description: None,
                    approver_users: BTreeSet::from([UserId("U-A".to_string())]),
                    approver_roles: BTreeSet::new(),
                    requires_all_approvers: false,
                    is_final_step: false,
                    requires_signature: false,
                    auto_approve_hours: None,
                },
                ApprovalStep {
                    id: StepId("WF-TEST-S2".to_string()),
                    workflow_id: WorkflowId(WORKFLOW_ID.to_string()),
                    step_name: "Registrar sign-off".to_string(),
                    step_order: 2,
                    description: None,
                    approver_users: BTreeSet::new(),
                    approver_roles: BTreeSet::from([RoleId("R-REGISTRAR".to_string())]),
                    requires_all_approvers: false,
                    is_final_step: true,
                    requires_signature: false,
                    auto_approve_hours: None,
                },
            ],
            is_active: true,
            requires_digital_signature: false,
            created_by: None,
            created_at: now,
            updated_at: now,
        };
        SqlWorkflowRepository::new(pool.clone()).save(workflow).await.expect("save workflow");

        let submission = FormSubmission {
            id: SubmissionId(SUBMISSION_ID.to_string()),
            submission_number: "FIL-2026-0042".to_string(),
            submitted_by: UserId("U-FILER".to_string()),
            data: serde_json::json!({}),
            status: SubmissionStatus::Submitted,
            submitted_at: Some(now),
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        SqlSubmissionRepository::new(pool.clone())
            .save(submission)
            .await
            .expect("save submission");

        let directory = SqlUserDirectory::new(pool.clone());
        for (id, email) in [("U-A", "a@example.org"), ("U-B", "b@example.org")] {
            directory.upsert_user(&UserId(id.to_string()), email, id).await.expect("user");
        }
        directory
            .upsert_role(&RoleId("R-REGISTRAR".to_string()), "Registrar")
            .await
            .expect("role");
        directory
            .assign_role(&UserId("U-B".to_string()), &RoleId("R-REGISTRAR".to_string()))
            .await
            .expect("assign");

        let service = Arc::new(ApprovalService::with_pool(pool.clone()));
        (pool, service)
    }

    fn state(service: Arc<ApprovalService>) -> State<ApprovalApiState> {
        State(ApprovalApiState { service })
    }

    fn headers_for(user: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_str(user).expect("header value"));
        headers
    }

    fn submission_id() -> SubmissionId {
        SubmissionId(SUBMISSION_ID.to_string())
    }

    #[tokio::test]
    async fn initiate_starts_at_step_one_and_notifies_first_approvers() {
        let (pool, service) = setup().await;

        let approval = service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect("initiate");

        assert_eq!(approval.status, ApprovalStatus::InProgress);
        assert_eq!(approval.current_step_order, 1);
        assert!(approval.started_at.is_some());

        let submission = SqlSubmissionRepository::new(pool.clone())
            .find_by_id(&submission_id())
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(submission.status, SubmissionStatus::UnderReview);

        let outbox = SqlNotificationRepository::new(pool)
            .list_for_user(&UserId("U-A".to_string()))
            .await
            .expect("outbox");
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].kind, NotificationKind::ApprovalRequired);
        assert!(outbox[0].body.contains("FIL-2026-0042"));
    }

    #[tokio::test]
    async fn initiate_against_unknown_workflow_is_not_found() {
        let (_pool, service) = setup().await;

        let error = service
            .initiate(&submission_id(), &WorkflowId("WF-404".to_string()))
            .await
            .expect_err("must fail");
        assert_eq!(
            fileway_core::errors::ErrorKind::NotFound,
            error.kind(),
            "unknown workflow maps to NotFound"
        );
    }

    #[tokio::test]
    async fn initiate_against_zero_step_workflow_is_invalid() {
        let (pool, service) = setup().await;

        let now = Utc::now();
        SqlWorkflowRepository::new(pool)
            .save(ApprovalWorkflow {
                id: WorkflowId("WF-EMPTY".to_string()),
                name: "Empty".to_string(),
                description: None,
                workflow_code: "EMPTY".to_string(),
                steps: Vec::new(),
                is_active: true,
                requires_digital_signature: false,
                created_by: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("save");

        let error = service
            .initiate(&submission_id(), &WorkflowId("WF-EMPTY".to_string()))
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), fileway_core::errors::ErrorKind::InvalidWorkflow);
    }

    #[tokio::test]
    async fn initiate_twice_for_one_submission_conflicts() {
        let (_pool, service) = setup().await;

        service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect("first initiate");
        let error = service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect_err("second initiate must fail");

        assert_eq!(error.kind(), fileway_core::errors::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn two_step_run_reaches_terminal_approval_and_then_rejects_actions() {
        let (pool, service) = setup().await;
        let approval = service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect("initiate");

        // Step 1: direct approver A advances the approval.
        service
            .process_action(&approval.id, &UserId("U-A".to_string()), ActionType::Approve, None)
            .await
            .expect("step 1 approve");

        let (after_first, actions) =
            service.approval_with_history(&approval.id).await.expect("reload");
        assert_eq!(after_first.status, ApprovalStatus::InProgress);
        assert_eq!(after_first.current_step_order, 2);
        assert_eq!(actions.len(), 1);

        // Step 2: B acts through registrar role membership; final step.
        service
            .process_action(
                &approval.id,
                &UserId("U-B".to_string()),
                ActionType::Approve,
                Some("sign-off".to_string()),
            )
            .await
            .expect("step 2 approve");

        let (terminal, actions) =
            service.approval_with_history(&approval.id).await.expect("reload");
        assert_eq!(terminal.status, ApprovalStatus::Approved);
        assert!(terminal.completed_at.is_some());
        assert_eq!(actions.len(), 2);

        let submission = SqlSubmissionRepository::new(pool.clone())
            .find_by_id(&submission_id())
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(submission.status, SubmissionStatus::Approved);
        assert!(submission.completed_at.is_some());

        // Submitter was told about the terminal approval.
        let submitter_inbox = SqlNotificationRepository::new(pool)
            .list_for_user(&UserId("U-FILER".to_string()))
            .await
            .expect("outbox");
        assert!(submitter_inbox
            .iter()
            .any(|notification| notification.kind == NotificationKind::Approved));

        // Terminal state is final for everyone.
        let error = service
            .process_action(&approval.id, &UserId("U-B".to_string()), ActionType::Approve, None)
            .await
            .expect_err("terminal approvals accept no actions");
        assert_eq!(error.kind(), fileway_core::errors::ErrorKind::InvalidState);

        let (_, audit) = service.approval_with_history(&approval.id).await.expect("reload");
        assert_eq!(audit.len(), 2, "failed calls append nothing");
    }

    #[tokio::test]
    async fn unauthorized_actor_is_rejected_and_state_is_unchanged() {
        let (_pool, service) = setup().await;
        let approval = service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect("initiate");

        let error = service
            .process_action(&approval.id, &UserId("U-C".to_string()), ActionType::Approve, None)
            .await
            .expect_err("unrelated user must be rejected");
        assert_eq!(error.kind(), fileway_core::errors::ErrorKind::Unauthorized);

        let (unchanged, actions) =
            service.approval_with_history(&approval.id).await.expect("reload");
        assert_eq!(unchanged.current_step_order, 1);
        assert_eq!(unchanged.state_version, 1);
        assert!(actions.is_empty());
    }

    #[tokio::test]
    async fn role_holder_cannot_act_before_their_step() {
        let (_pool, service) = setup().await;
        let approval = service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect("initiate");

        // B's registrar role gates step 2, not step 1.
        let error = service
            .process_action(&approval.id, &UserId("U-B".to_string()), ActionType::Approve, None)
            .await
            .expect_err("must be rejected at step 1");
        assert_eq!(error.kind(), fileway_core::errors::ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn reject_at_step_one_is_terminal() {
        let (pool, service) = setup().await;
        let approval = service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect("initiate");

        service
            .process_action(
                &approval.id,
                &UserId("U-A".to_string()),
                ActionType::Reject,
                Some("incomplete filing".to_string()),
            )
            .await
            .expect("reject");

        let (terminal, _) = service.approval_with_history(&approval.id).await.expect("reload");
        assert_eq!(terminal.status, ApprovalStatus::Rejected);
        assert!(terminal.completed_at.is_some());

        let submission = SqlSubmissionRepository::new(pool)
            .find_by_id(&submission_id())
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(submission.status, SubmissionStatus::Rejected);

        let error = service
            .process_action(&approval.id, &UserId("U-A".to_string()), ActionType::Comment, None)
            .await
            .expect_err("terminal");
        assert_eq!(error.kind(), fileway_core::errors::ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn comment_appends_to_history_without_a_transition() {
        let (_pool, service) = setup().await;
        let approval = service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect("initiate");

        service
            .process_action(
                &approval.id,
                &UserId("U-A".to_string()),
                ActionType::Comment,
                Some("checking attachments".to_string()),
            )
            .await
            .expect("comment");

        let (unchanged, actions) =
            service.approval_with_history(&approval.id).await.expect("reload");
        assert_eq!(unchanged.status, ApprovalStatus::InProgress);
        assert_eq!(unchanged.current_step_order, 1);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, ActionType::Comment);
    }

    #[tokio::test]
    async fn request_changes_notifies_the_submitter_and_stays_in_progress() {
        let (pool, service) = setup().await;
        let approval = service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect("initiate");

        service
            .process_action(
                &approval.id,
                &UserId("U-A".to_string()),
                ActionType::RequestChanges,
                Some("missing exhibit C".to_string()),
            )
            .await
            .expect("request changes");

        let (unchanged, _) = service.approval_with_history(&approval.id).await.expect("reload");
        assert_eq!(unchanged.status, ApprovalStatus::InProgress);
        assert_eq!(unchanged.current_step_order, 1);

        let submitter_inbox = SqlNotificationRepository::new(pool)
            .list_for_user(&UserId("U-FILER".to_string()))
            .await
            .expect("outbox");
        assert!(submitter_inbox
            .iter()
            .any(|notification| notification.kind == NotificationKind::ChangesRequested));
    }

    #[tokio::test]
    async fn concurrent_writers_on_one_snapshot_yield_exactly_one_winner() {
        let (_pool, service) = setup().await;
        let approval = service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect("initiate");

        // Both tasks act on the same loaded snapshot; the version guard lets
        // exactly one commit and fails the other with a retryable conflict.
        let first_user = UserId("U-A".to_string());
        let second_user = UserId("U-A".to_string());
        let first = service.process_action(
            &approval.id,
            &first_user,
            ActionType::Approve,
            None,
        );
        let second = service.process_action(
            &approval.id,
            &second_user,
            ActionType::Approve,
            None,
        );
        let (first, second) = tokio::join!(first, second);

        let outcomes = [first, second];
        let wins = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        assert_eq!(wins, 1, "exactly one concurrent action may advance the approval");

        let losses: Vec<_> = outcomes
            .iter()
            .filter_map(|outcome| outcome.as_ref().err())
            .map(fileway_core::errors::ApprovalError::kind)
            .collect();
        assert!(
            losses
                .iter()
                .all(|kind| matches!(
                    kind,
                    fileway_core::errors::ErrorKind::Conflict
                        | fileway_core::errors::ErrorKind::Unauthorized
                        | fileway_core::errors::ErrorKind::InvalidState
                )),
            "the losing writer surfaces a rejected operation, not silent overwrite"
        );

        let (after, actions) =
            service.approval_with_history(&approval.id).await.expect("reload");
        assert_eq!(after.current_step_order, 2);
        assert_eq!(actions.len(), 1, "only the winner appends to the audit trail");
    }

    #[tokio::test]
    async fn cancel_withdraws_the_submission_and_is_terminal() {
        let (pool, service) = setup().await;
        let approval = service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect("initiate");

        service.cancel(&approval.id).await.expect("cancel");

        let (terminal, actions) =
            service.approval_with_history(&approval.id).await.expect("reload");
        assert_eq!(terminal.status, ApprovalStatus::Cancelled);
        assert!(actions.is_empty(), "cancellation records no approval action");

        let submission = SqlSubmissionRepository::new(pool)
            .find_by_id(&submission_id())
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(submission.status, SubmissionStatus::Withdrawn);

        let error = service.cancel(&approval.id).await.expect_err("already terminal");
        assert_eq!(error.kind(), fileway_core::errors::ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn action_handler_maps_domain_errors_to_http_statuses() {
        let (_pool, service) = setup().await;
        let approval = service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect("initiate");

        // Unknown approval: 404.
        let (status, _) = post_action(
            Path("APR-404".to_string()),
            state(service.clone()),
            headers_for("U-A"),
            Json(ActionRequest { action: ActionType::Approve, comments: None }),
        )
        .await
        .expect_err("unknown approval");
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Unauthorized actor: 403.
        let (status, _) = post_action(
            Path(approval.id.0.clone()),
            state(service.clone()),
            headers_for("U-C"),
            Json(ActionRequest { action: ActionType::Approve, comments: None }),
        )
        .await
        .expect_err("unauthorized actor");
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Authorized approve succeeds.
        let response = post_action(
            Path(approval.id.0.clone()),
            state(service.clone()),
            headers_for("U-A"),
            Json(ActionRequest { action: ActionType::Approve, comments: None }),
        )
        .await
        .expect("authorized approve");
        assert!(response.0.success);

        // Missing header: 400.
        let (status, _) = post_action(
            Path(approval.id.0.clone()),
            state(service),
            HeaderMap::new(),
            Json(ActionRequest { action: ActionType::Comment, comments: None }),
        )
        .await
        .expect_err("missing header");
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn pending_listing_follows_the_active_step() {
        let (_pool, service) = setup().await;
        service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect("initiate");

        let for_a = list_pending(state(service.clone()), headers_for("U-A"))
            .await
            .expect("list for A");
        assert_eq!(for_a.0.len(), 1);

        let for_b = list_pending(state(service.clone()), headers_for("U-B"))
            .await
            .expect("list for B");
        assert!(for_b.0.is_empty());

        service
            .process_action(
                &ApprovalId(for_a.0[0].id.clone()),
                &UserId("U-A".to_string()),
                ActionType::Approve,
                None,
            )
            .await
            .expect("advance");

        let for_b = list_pending(state(service.clone()), headers_for("U-B"))
            .await
            .expect("list for B");
        assert_eq!(for_b.0.len(), 1);

        let for_a =
            list_pending(state(service), headers_for("U-A")).await.expect("list for A");
        assert!(for_a.0.is_empty());
    }

    #[tokio::test]
    async fn document_centric_approve_resolves_the_pending_approval() {
        let (_pool, service) = setup().await;
        service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect("initiate");

        service
            .act_on_submission(
                &submission_id(),
                &UserId("U-A".to_string()),
                ActionType::Approve,
                Some("Approved".to_string()),
            )
            .await
            .expect("approve by submission");

        let pending = service
            .pending_for(&UserId("U-B".to_string()))
            .await
            .expect("pending for registrar");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].current_step_order, 2);

        // No pending approval for an unrelated caller.
        let error = service
            .act_on_submission(
                &submission_id(),
                &UserId("U-C".to_string()),
                ActionType::Approve,
                None,
            )
            .await
            .expect_err("no pending approval for stranger");
        assert_eq!(error.kind(), fileway_core::errors::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn initiate_handler_resolves_workflow_by_code() {
        let (_pool, service) = setup().await;

        let response = post_initiate(
            Path(SUBMISSION_ID.to_string()),
            state(service.clone()),
            Json(InitiateRequest { workflow_code: WORKFLOW_CODE.to_string() }),
        )
        .await
        .expect("initiate by code");
        assert_eq!(response.0.status, ApprovalStatus::InProgress);
        assert_eq!(response.0.current_step_order, 1);

        let detail = get_approval(Path(response.0.id.clone()), state(service))
            .await
            .expect("detail");
        assert_eq!(detail.0.approval.id, response.0.id);
        assert!(detail.0.actions.is_empty());
    }

    #[tokio::test]
    async fn router_serves_the_action_endpoint_end_to_end() {
        let (_pool, service) = setup().await;
        let approval = service
            .initiate(&submission_id(), &WorkflowId(WORKFLOW_ID.to_string()))
            .await
            .expect("initiate");

        let app = super::router_with_service(service);
        let request = axum::http::Request::builder()
            .method("POST")
            .uri(format!("/api/v1/approvals/{}/action", approval.id.0))
            .header("content-type", "application/json")
            .header("x-user-id", "U-A")
            .body(axum::body::Body::from(
                serde_json::json!({"action": "approve", "comments": "ok"}).to_string(),
            ))
            .expect("request");

        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn acting_user_requires_a_non_empty_header() {
        let mut headers = HeaderMap::new();
        assert!(acting_user(&headers).is_err());

        headers.insert("x-user-id", HeaderValue::from_static("  "));
        assert!(acting_user(&headers).is_err());

        headers.insert("x-user-id", HeaderValue::from_static("U-A"));
        assert_eq!(acting_user(&headers).expect("user"), UserId("U-A".to_string()));
    }
}
