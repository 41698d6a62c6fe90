use thiserror::Error;

/// Coarse classification used by interface layers to pick a response shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InvalidWorkflow,
    Unauthorized,
    Conflict,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval `{approval_id}` not found")]
    ApprovalNotFound { approval_id: String },
    #[error("workflow `{workflow_id}` not found")]
    WorkflowNotFound { workflow_id: String },
    #[error("submission `{submission_id}` not found")]
    SubmissionNotFound { submission_id: String },
    #[error("no pending approval found for submission `{submission_id}`")]
    NoPendingApproval { submission_id: String },
    #[error("approval `{approval_id}` is `{status}` and accepts no further actions")]
    NotInProgress { approval_id: String, status: String },
    #[error(
        "approval `{approval_id}` points at step {step_order}, which no longer exists in workflow `{workflow_id}`"
    )]
    StepDesynchronized { approval_id: String, workflow_id: String, step_order: u32 },
    #[error("workflow `{workflow_id}` has no steps configured")]
    EmptyWorkflow { workflow_id: String },
    #[error("step {step_order} of workflow `{workflow_id}` is not final and has no successor step")]
    MissingSuccessor { workflow_id: String, step_order: u32 },
    #[error("user `{user_id}` is not authorized to act on step {step_order}")]
    Unauthorized { user_id: String, step_order: u32 },
    #[error("submission `{submission_id}` already has approval `{approval_id}`")]
    AlreadyInitiated { submission_id: String, approval_id: String },
    #[error("approval `{approval_id}` was updated concurrently; retry the action")]
    Conflict { approval_id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ApprovalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ApprovalNotFound { .. }
            | Self::WorkflowNotFound { .. }
            | Self::SubmissionNotFound { .. }
            | Self::NoPendingApproval { .. } => ErrorKind::NotFound,
            Self::NotInProgress { .. } | Self::StepDesynchronized { .. } => ErrorKind::InvalidState,
            Self::EmptyWorkflow { .. } | Self::MissingSuccessor { .. } => ErrorKind::InvalidWorkflow,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::AlreadyInitiated { .. } | Self::Conflict { .. } => ErrorKind::Conflict,
            // Surfaced to callers as a retryable conflict-class failure.
            Self::Persistence(_) => ErrorKind::Conflict,
        }
    }
}
