pub mod approvals;
pub mod config;
pub mod domain;
pub mod errors;

pub use approvals::{
    apply_action, can_act, cancel, current_step, validate_for_initiation, ActionOutcome,
    ApprovalEffect,
};
pub use domain::approval::{
    ActionId, ActionType, Approval, ApprovalAction, ApprovalId, ApprovalStatus,
};
pub use domain::identity::{Role, RoleId, UserAccount, UserId};
pub use domain::notification::{Notification, NotificationId, NotificationKind, NotificationStatus};
pub use domain::submission::{FormSubmission, SubmissionId, SubmissionStatus};
pub use domain::workflow::{ApprovalStep, ApprovalWorkflow, StepId, WorkflowId};
pub use errors::{ApprovalError, ErrorKind};

// Re-exported so downstream crates share one chrono version for timestamps.
pub use chrono;
