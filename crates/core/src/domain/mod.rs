pub mod approval;
pub mod identity;
pub mod notification;
pub mod submission;
pub mod workflow;
