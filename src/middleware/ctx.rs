use uuid::Uuid;

use crate::middleware::error::{AppError, AppResult, CtxError, CtxResult};

#[derive(Clone, Debug)]
pub struct Ctx {
    result_user_id: AppResult<String>,
    req_id: Uuid,
}

impl Ctx {
    pub fn new(result_user_id: AppResult<String>) -> Self {
        Self {
            result_user_id,
            req_id: Uuid::new_v4(),
        }
    }

    /// Context for work not started by a request, such as migrations.
    pub fn system(label: &str) -> Self {
        Self::new(Ok(label.to_string()))
    }

    pub fn user_id(&self) -> CtxResult<String> {
        self.result_user_id
            .clone()
            .map_err(|error| self.to_ctx_error(error))
    }

    pub fn req_id(&self) -> Uuid {
        self.req_id
    }

    pub fn to_ctx_error(&self, error: AppError) -> CtxError {
        CtxError {
            req_id: self.req_id,
            error,
        }
    }
}
