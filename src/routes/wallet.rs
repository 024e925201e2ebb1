use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::middleware::auth_with_login_access::AuthWithLoginAccess;
use crate::middleware::error::CtxResult;
use crate::middleware::mw_ctx::CtxState;
use crate::middleware::utils::extractor_utils::JsonOrFormValidated;
use crate::services::wallet_service::{
    TopupInput, TransactionQuery, WalletMovement, WalletService, WalletView, WithdrawInput,
};

pub fn routes() -> Router<Arc<CtxState>> {
    Router::new()
        .route("/api/wallet", get(get_wallet))
        .route("/api/wallet/topup", post(topup))
        .route("/api/wallet/withdraw", post(withdraw))
}

async fn get_wallet(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    Query(query): Query<TransactionQuery>,
) -> CtxResult<Json<WalletView>> {
    let wallet_service = WalletService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    Ok(Json(wallet_service.get_wallet(&query).await?))
}

async fn topup(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    JsonOrFormValidated(data): JsonOrFormValidated<TopupInput>,
) -> CtxResult<Json<WalletMovement>> {
    let wallet_service = WalletService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    Ok(Json(wallet_service.topup(data).await?))
}

async fn withdraw(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    JsonOrFormValidated(data): JsonOrFormValidated<WithdrawInput>,
) -> CtxResult<Json<WalletMovement>> {
    let wallet_service = WalletService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    Ok(Json(wallet_service.withdraw(data).await?))
}
