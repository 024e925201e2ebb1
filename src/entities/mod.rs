pub mod admin_action_entity;
pub mod kyc_entity;
pub mod task;
pub mod user_auth;
pub mod wallet;
