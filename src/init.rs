use std::sync::Arc;

use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower::{timeout::TimeoutLayer, BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    database::client::Database,
    entities::{
        admin_action_entity::AdminActionDbService,
        kyc_entity::KycDbService,
        task::{
            archived_task_entity::ArchivedTaskDbService,
            task_assignment_entity::TaskAssignmentDbService, task_entity::TaskDbService,
            task_submission_entity::TaskSubmissionDbService,
        },
        user_auth::{
            advertiser_profile_entity::AdvertiserProfileDbService,
            local_user_entity::LocalUserDbService,
        },
        wallet::{
            balance_transaction_entity::BalanceTransactionDbService,
            wallet_entity::WalletDbService,
        },
    },
    middleware::{
        ctx::Ctx,
        error::{AppError, AppResult, CtxError},
        mw_ctx::CtxState,
    },
    routes::{admin, kyc, tasks, wallet},
};

pub async fn run_migrations(database: &Database) -> AppResult<()> {
    let db = &database.client;
    let c = Ctx::system("migrations");

    LocalUserDbService { db, ctx: &c }.mutate_db().await?;
    AdvertiserProfileDbService { db, ctx: &c }.mutate_db().await?;
    WalletDbService { db, ctx: &c }.mutate_db().await?;
    BalanceTransactionDbService { db, ctx: &c }
        .mutate_db()
        .await?;
    TaskDbService { db, ctx: &c }.mutate_db().await?;
    TaskAssignmentDbService { db, ctx: &c }.mutate_db().await?;
    TaskSubmissionDbService { db, ctx: &c }.mutate_db().await?;
    ArchivedTaskDbService { db, ctx: &c }.mutate_db().await?;
    AdminActionDbService { db, ctx: &c }.mutate_db().await?;
    KycDbService { db, ctx: &c }.mutate_db().await?;
    info!("->> migrations applied");
    Ok(())
}

pub fn main_router(ctx_state: &Arc<CtxState>) -> Router {
    Router::new()
        .route("/hc", get(get_hc))
        .merge(tasks::routes())
        .merge(admin::routes())
        .merge(kyc::routes())
        .merge(wallet::routes())
        .with_state(ctx_state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(HandleErrorLayer::new(handle_layer_error))
                .layer(TimeoutLayer::new(ctx_state.request_timeout)),
        )
}

async fn handle_layer_error(err: BoxError) -> CtxError {
    let error = if err.is::<tower::timeout::error::Elapsed>() {
        AppError::RequestTimeout
    } else {
        AppError::Generic {
            description: err.to_string(),
        }
    };
    error.into()
}

async fn get_hc() -> Response {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    (StatusCode::OK, format!("v{}", VERSION)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn elapsed_request_answers_408_with_code() {
        let err: BoxError = Box::new(tower::timeout::error::Elapsed::new());
        let ctx_err = handle_layer_error(err).await;
        assert_eq!(ctx_err.error, AppError::RequestTimeout);
        assert_eq!(ctx_err.error.code(), "TIMEOUT");
        assert_eq!(
            ctx_err.into_response().status(),
            StatusCode::REQUEST_TIMEOUT
        );
    }
}
