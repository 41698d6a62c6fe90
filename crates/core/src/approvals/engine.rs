//! Step-advancement state machine for approval instances.
//!
//! The functions here are pure: they look at an approval, its workflow
//! template, and an incoming action, and compute the resulting state plus an
//! ordered list of side effects for the caller to carry out. Persistence,
//! authorization, and notification fan-out happen in the orchestrating
//! service, never here.

use crate::domain::approval::{ActionType, Approval, ApprovalStatus};
use crate::domain::notification::NotificationKind;
use crate::domain::submission::SubmissionStatus;
use crate::domain::workflow::{ApprovalStep, ApprovalWorkflow};
use crate::errors::ApprovalError;

/// Side effect the caller must apply alongside the computed transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalEffect {
    /// Update the bound submission's status; `completed` also stamps
    /// `completed_at`.
    SubmissionStatusChange { status: SubmissionStatus, completed: bool },
    /// Enqueue APPROVAL_REQUIRED notifications for the resolved actor set of
    /// the given step.
    NotifyStepApprovers { step_order: u32 },
    /// Enqueue a notification of the given kind to the submitter.
    NotifySubmitter { kind: NotificationKind },
}

/// Computed result of applying one action to an in-progress approval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionOutcome {
    pub from_status: ApprovalStatus,
    pub to_status: ApprovalStatus,
    pub next_step_order: u32,
    /// The approval reached a terminal state; `completed_at` must be stamped.
    pub completed: bool,
    pub effects: Vec<ApprovalEffect>,
}

/// Validate a workflow template before an approval is started against it.
pub fn validate_for_initiation(workflow: &ApprovalWorkflow) -> Result<(), ApprovalError> {
    if workflow.steps.is_empty() {
        return Err(ApprovalError::EmptyWorkflow { workflow_id: workflow.id.0.clone() });
    }
    Ok(())
}

/// Resolve the approval's current step, or explain why it cannot be resolved.
pub fn current_step<'a>(
    approval: &Approval,
    workflow: &'a ApprovalWorkflow,
) -> Result<&'a ApprovalStep, ApprovalError> {
    ensure_in_progress(approval)?;
    workflow.step_at(approval.current_step_order).ok_or_else(|| {
        ApprovalError::StepDesynchronized {
            approval_id: approval.id.0.clone(),
            workflow_id: workflow.id.0.clone(),
            step_order: approval.current_step_order,
        }
    })
}

/// Apply one action to the approval's current step.
///
/// A single APPROVE from any one authorized actor advances the step,
/// regardless of `requires_all_approvers`; quorum tracking is deliberately
/// not implemented (see DESIGN.md).
pub fn apply_action(
    approval: &Approval,
    workflow: &ApprovalWorkflow,
    action: ActionType,
) -> Result<ActionOutcome, ApprovalError> {
    let step = current_step(approval, workflow)?;

    let outcome = match action {
        ActionType::Approve if step.is_final_step => ActionOutcome {
            from_status: approval.status,
            to_status: ApprovalStatus::Approved,
            next_step_order: approval.current_step_order,
            completed: true,
            effects: vec![
                ApprovalEffect::SubmissionStatusChange {
                    status: SubmissionStatus::Approved,
                    completed: true,
                },
                ApprovalEffect::NotifySubmitter { kind: NotificationKind::Approved },
            ],
        },
        ActionType::Approve => {
            let next_order = approval.current_step_order + 1;
            // Guard the advance-to-nothing state here, before any mutation,
            // rather than letting the next action discover the gap.
            if !workflow.has_step_at(next_order) {
                return Err(ApprovalError::MissingSuccessor {
                    workflow_id: workflow.id.0.clone(),
                    step_order: approval.current_step_order,
                });
            }
            ActionOutcome {
                from_status: approval.status,
                to_status: ApprovalStatus::InProgress,
                next_step_order: next_order,
                completed: false,
                effects: vec![ApprovalEffect::NotifyStepApprovers { step_order: next_order }],
            }
        }
        ActionType::Reject => ActionOutcome {
            from_status: approval.status,
            to_status: ApprovalStatus::Rejected,
            next_step_order: approval.current_step_order,
            completed: true,
            effects: vec![
                ApprovalEffect::SubmissionStatusChange {
                    status: SubmissionStatus::Rejected,
                    completed: true,
                },
                ApprovalEffect::NotifySubmitter { kind: NotificationKind::Rejected },
            ],
        },
        ActionType::RequestChanges => ActionOutcome {
            from_status: approval.status,
            to_status: ApprovalStatus::InProgress,
            next_step_order: approval.current_step_order,
            completed: false,
            effects: vec![
                ApprovalEffect::SubmissionStatusChange {
                    status: SubmissionStatus::UnderReview,
                    completed: false,
                },
                ApprovalEffect::NotifySubmitter { kind: NotificationKind::ChangesRequested },
            ],
        },
        ActionType::Comment => ActionOutcome {
            from_status: approval.status,
            to_status: approval.status,
            next_step_order: approval.current_step_order,
            completed: false,
            effects: Vec::new(),
        },
    };

    Ok(outcome)
}

/// Cancel an in-progress approval. Terminal, no notifications.
pub fn cancel(approval: &Approval) -> Result<ActionOutcome, ApprovalError> {
    ensure_in_progress(approval)?;
    Ok(ActionOutcome {
        from_status: approval.status,
        to_status: ApprovalStatus::Cancelled,
        next_step_order: approval.current_step_order,
        completed: true,
        effects: vec![ApprovalEffect::SubmissionStatusChange {
            status: SubmissionStatus::Withdrawn,
            completed: true,
        }],
    })
}

fn ensure_in_progress(approval: &Approval) -> Result<(), ApprovalError> {
    if approval.status != ApprovalStatus::InProgress {
        return Err(ApprovalError::NotInProgress {
            approval_id: approval.id.0.clone(),
            status: approval.status.as_str().to_owned(),
        });
    }
    Ok(())
}
