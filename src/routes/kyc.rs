use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::entities::kyc_entity::Kyc;
use crate::middleware::auth_with_login_access::AuthWithLoginAccess;
use crate::middleware::error::CtxResult;
use crate::middleware::mw_ctx::CtxState;
use crate::middleware::utils::extractor_utils::JsonOrFormValidated;
use crate::services::kyc_service::{KycService, KycUpdateInput};

pub fn routes() -> Router<Arc<CtxState>> {
    Router::new().route("/api/kyc", get(get_kyc).post(update_kyc))
}

async fn get_kyc(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
) -> CtxResult<Json<Kyc>> {
    let kyc_service = KycService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    Ok(Json(kyc_service.get().await?))
}

async fn update_kyc(
    auth_data: AuthWithLoginAccess,
    State(state): State<Arc<CtxState>>,
    JsonOrFormValidated(data): JsonOrFormValidated<KycUpdateInput>,
) -> CtxResult<Json<Kyc>> {
    let kyc_service = KycService::new(&state.db.client, &auth_data.ctx, state.tx_retries);
    Ok(Json(kyc_service.update(data).await?))
}
