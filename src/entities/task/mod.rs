pub mod archived_task_entity;
pub mod task_assignment_entity;
pub mod task_entity;
pub mod task_submission_entity;
