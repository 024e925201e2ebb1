pub mod kyc_service;
pub mod revenue_service;
pub mod submission_service;
pub mod task_service;
pub mod wallet_service;
