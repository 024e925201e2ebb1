use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};

use crate::database::surrdb_utils::get_table_thing;
use crate::entities::task::task_assignment_entity::TaskAssignment;
use crate::entities::task::task_entity::{self, Task};
use crate::entities::task::task_submission_entity::TaskSubmission;
use crate::middleware::auth_with_login_access::AuthWithLoginAccess;
use crate::middleware::error::{CtxError, CtxResult};
use crate::middleware::mw_ctx::CtxState;
use crate::middleware::utils::extractor_utils::JsonOrFormValidated;
use crate::services::task_service::{SubmitInput, TaskInput, TaskService};

pub fn routes() -> Router<Arc<CtxState>> {
    Router::new()
        .route("/api/tasks", post(create_task))
        .route("/api/tasks/:task_id/claim", post(claim_task))
        .route("/api/tasks/:task_id/submissions", post(submit_proof))
}

async fn create_task(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    JsonOrFormValidated(data): JsonOrFormValidated<TaskInput>,
) -> CtxResult<Json<Task>> {
    let task_service = TaskService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    let task = task_service.create(data).await?;
    Ok(Json(task))
}

async fn claim_task(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    Path(task_id): Path<String>,
) -> CtxResult<Json<TaskAssignment>> {
    let task_id = get_table_thing(task_entity::TABLE_NAME, &task_id)
        .map_err(CtxError::from(&auth_data.ctx))?;
    let task_service = TaskService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    let assignment = task_service.claim(&task_id).await?;
    Ok(Json(assignment))
}

async fn submit_proof(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    Path(task_id): Path<String>,
    JsonOrFormValidated(data): JsonOrFormValidated<SubmitInput>,
) -> CtxResult<Json<TaskSubmission>> {
    let task_id = get_table_thing(task_entity::TABLE_NAME, &task_id)
        .map_err(CtxError::from(&auth_data.ctx))?;
    let task_service = TaskService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    let submission = task_service.submit(&task_id, data).await?;
    Ok(Json(submission))
}
