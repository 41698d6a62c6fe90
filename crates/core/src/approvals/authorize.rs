//! Authorization check for approval steps.
//!
//! A user may act on a step when directly assigned or when holding any of
//! the step's approver roles. Pure set membership; role holdings are
//! resolved by the caller on every action so that directory changes between
//! steps are always observed.

use std::collections::BTreeSet;

use crate::domain::identity::{RoleId, UserId};
use crate::domain::workflow::ApprovalStep;

pub fn can_act(user_id: &UserId, user_roles: &BTreeSet<RoleId>, step: &ApprovalStep) -> bool {
    if step.approver_users.contains(user_id) {
        return true;
    }
    user_roles.iter().any(|role| step.approver_roles.contains(role))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::domain::identity::{RoleId, UserId};
    use crate::domain::workflow::{ApprovalStep, StepId, WorkflowId};

    use super::can_act;

    fn step(users: &[&str], roles: &[&str]) -> ApprovalStep {
        ApprovalStep {
            id: StepId("STP-1".to_owned()),
            workflow_id: WorkflowId("WF-1".to_owned()),
            step_name: "Registrar review".to_owned(),
            step_order: 1,
            description: None,
            approver_users: users.iter().map(|id| UserId((*id).to_owned())).collect(),
            approver_roles: roles.iter().map(|id| RoleId((*id).to_owned())).collect(),
            requires_all_approvers: false,
            is_final_step: false,
            requires_signature: false,
            auto_approve_hours: None,
        }
    }

    fn roles(ids: &[&str]) -> BTreeSet<RoleId> {
        ids.iter().map(|id| RoleId((*id).to_owned())).collect()
    }

    #[test]
    fn directly_assigned_user_may_act() {
        let step = step(&["U-A"], &[]);
        assert!(can_act(&UserId("U-A".to_owned()), &BTreeSet::new(), &step));
    }

    #[test]
    fn role_holder_may_act() {
        let step = step(&[], &["R-REGISTRAR"]);
        assert!(can_act(&UserId("U-B".to_owned()), &roles(&["R-REGISTRAR", "R-CLERK"]), &step));
    }

    #[test]
    fn unrelated_user_may_not_act() {
        let step = step(&["U-A"], &["R-REGISTRAR"]);
        assert!(!can_act(&UserId("U-C".to_owned()), &roles(&["R-CLERK"]), &step));
    }

    #[test]
    fn empty_actor_set_authorizes_no_one() {
        let step = step(&[], &[]);
        assert!(!can_act(&UserId("U-A".to_owned()), &roles(&["R-REGISTRAR"]), &step));
    }
}
