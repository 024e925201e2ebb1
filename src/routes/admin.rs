use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::database::surrdb_utils::get_table_thing;
use crate::entities::task::task_entity::{self, Task};
use crate::entities::task::task_submission_entity;
use crate::entities::user_auth::local_user_entity;
use crate::middleware::auth_with_login_access::AuthWithLoginAccess;
use crate::middleware::ctx::Ctx;
use crate::middleware::error::{CtxError, CtxResult};
use crate::middleware::mw_ctx::CtxState;
use crate::middleware::utils::extractor_utils::JsonOrFormValidated;
use crate::services::submission_service::{
    BulkReviewInput, BulkReviewResult, ReviewInput, ReviewResult, SubmissionService,
};
use crate::services::task_service::{
    ApproveInput, CompleteInput, DeleteInput, TaskApproval, TaskCompletion, TaskDeletion,
    TaskService,
};
use crate::services::wallet_service::{PayoutReport, TransactionQuery, WalletMovement, WalletService};
use surrealdb::sql::Thing;

pub fn routes() -> Router<Arc<CtxState>> {
    Router::new()
        .route("/api/admin/tasks/:task_id/approve", post(approve_task))
        .route("/api/admin/tasks/:task_id/pause", post(pause_task))
        .route("/api/admin/tasks/:task_id/resume", post(resume_task))
        .route("/api/admin/tasks/:task_id/complete", post(complete_task))
        .route("/api/admin/tasks/:task_id", delete(delete_task))
        .route(
            "/api/admin/tasks/:task_id/submissions/review",
            post(bulk_review_submissions),
        )
        .route(
            "/api/admin/submissions/:submission_id/review",
            post(review_submission),
        )
        .route("/api/admin/payouts", get(get_payouts))
        .route("/api/admin/users/:user_id/reactivate", post(reactivate_user))
}

fn task_thing(ctx: &Ctx, task_id: &str) -> CtxResult<Thing> {
    get_table_thing(task_entity::TABLE_NAME, task_id).map_err(CtxError::from(ctx))
}

async fn approve_task(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    Path(task_id): Path<String>,
    JsonOrFormValidated(data): JsonOrFormValidated<ApproveInput>,
) -> CtxResult<Json<TaskApproval>> {
    let task_id = task_thing(&auth_data.ctx, &task_id)?;
    let task_service = TaskService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    Ok(Json(task_service.approve(&task_id, data).await?))
}

async fn pause_task(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    Path(task_id): Path<String>,
) -> CtxResult<Json<Task>> {
    let task_id = task_thing(&auth_data.ctx, &task_id)?;
    let task_service = TaskService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    Ok(Json(task_service.pause(&task_id).await?))
}

async fn resume_task(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    Path(task_id): Path<String>,
) -> CtxResult<Json<Task>> {
    let task_id = task_thing(&auth_data.ctx, &task_id)?;
    let task_service = TaskService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    Ok(Json(task_service.resume(&task_id).await?))
}

async fn complete_task(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    Path(task_id): Path<String>,
    JsonOrFormValidated(data): JsonOrFormValidated<CompleteInput>,
) -> CtxResult<Json<TaskCompletion>> {
    let task_id = task_thing(&auth_data.ctx, &task_id)?;
    let task_service = TaskService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    Ok(Json(task_service.complete(&task_id, data).await?))
}

async fn delete_task(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    Path(task_id): Path<String>,
    JsonOrFormValidated(data): JsonOrFormValidated<DeleteInput>,
) -> CtxResult<Json<TaskDeletion>> {
    let task_id = task_thing(&auth_data.ctx, &task_id)?;
    let task_service = TaskService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    Ok(Json(task_service.delete(&task_id, data).await?))
}

async fn review_submission(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    Path(submission_id): Path<String>,
    JsonOrFormValidated(data): JsonOrFormValidated<ReviewInput>,
) -> CtxResult<Json<ReviewResult>> {
    let submission_id = get_table_thing(task_submission_entity::TABLE_NAME, &submission_id)
        .map_err(CtxError::from(&auth_data.ctx))?;
    let submission_service =
        SubmissionService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    Ok(Json(submission_service.review(&submission_id, data).await?))
}

async fn bulk_review_submissions(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    Path(task_id): Path<String>,
    JsonOrFormValidated(data): JsonOrFormValidated<BulkReviewInput>,
) -> CtxResult<Json<BulkReviewResult>> {
    let task_id = task_thing(&auth_data.ctx, &task_id)?;
    let submission_service =
        SubmissionService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    Ok(Json(submission_service.bulk_review(&task_id, data).await?))
}

async fn get_payouts(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    Query(query): Query<TransactionQuery>,
) -> CtxResult<Json<PayoutReport>> {
    let wallet_service = WalletService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    Ok(Json(wallet_service.get_payout_report(&query).await?))
}

async fn reactivate_user(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    Path(user_id): Path<String>,
) -> CtxResult<Json<WalletMovement>> {
    let user_id = get_table_thing(local_user_entity::TABLE_NAME, &user_id)
        .map_err(CtxError::from(&auth_data.ctx))?;
    let wallet_service = WalletService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    Ok(Json(wallet_service.reactivate_account(&user_id).await?))
}
