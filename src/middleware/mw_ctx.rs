use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::config::AppConfig;
use crate::database::client::Database;
use crate::utils::jwt::JWT;

pub const JWT_KEY: &str = "jwt";

pub struct CtxState {
    pub db: Database,
    pub is_development: bool,
    pub jwt: JWT,
    pub request_timeout: StdDuration,
    /// Re-runs of a money-moving transaction after a write conflict.
    pub tx_retries: u8,
}

impl Debug for CtxState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtxState")
            .field("is_development", &self.is_development)
            .field("request_timeout", &self.request_timeout)
            .field("tx_retries", &self.tx_retries)
            .finish()
    }
}

pub fn create_ctx_state(db: Database, config: &AppConfig) -> Arc<CtxState> {
    let ctx_state = CtxState {
        db,
        is_development: config.is_development,
        jwt: JWT::new(config.jwt_secret.clone(), Duration::days(1)),
        request_timeout: StdDuration::from_secs(config.request_timeout_secs),
        tx_retries: config.db_tx_retries,
    };
    Arc::new(ctx_state)
}
