pub mod authorize;
pub mod engine;

pub use authorize::can_act;
pub use engine::{
    apply_action, cancel, current_step, validate_for_initiation, ActionOutcome, ApprovalEffect,
};
