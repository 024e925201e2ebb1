pub mod admin;
pub mod kyc;
pub mod tasks;
pub mod wallet;
