use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::identity::{RoleId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

/// One stage of a workflow template. The union of `approver_users` and the
/// members of `approver_roles` is the authorized-actor set for the step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    pub workflow_id: WorkflowId,
    pub step_name: String,
    pub step_order: u32,
    pub description: Option<String>,
    pub approver_users: BTreeSet<UserId>,
    pub approver_roles: BTreeSet<RoleId>,
    pub requires_all_approvers: bool,
    pub is_final_step: bool,
    pub requires_signature: bool,
    pub auto_approve_hours: Option<u32>,
}

/// Reusable approval workflow template. Owns its steps exclusively; steps
/// are kept sorted by `step_order`, which is unique within a workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub workflow_code: String,
    pub steps: Vec<ApprovalStep>,
    pub is_active: bool,
    pub requires_digital_signature: bool,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalWorkflow {
    pub fn step_at(&self, step_order: u32) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| step.step_order == step_order)
    }

    pub fn has_step_at(&self, step_order: u32) -> bool {
        self.step_at(step_order).is_some()
    }
}
