use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::CookieJar;

use crate::{
    middleware::error::{AppError, CtxError},
    middleware::mw_ctx::{CtxState, JWT_KEY},
    utils::jwt::TokenType,
};

use super::ctx::Ctx;

/// Caller authenticated by a login JWT from the `jwt` cookie or a bearer header.
#[derive(Debug)]
pub struct AuthWithLoginAccess {
    pub user_id: String,
    pub ctx: Ctx,
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

#[async_trait]
impl FromRequestParts<Arc<CtxState>> for AuthWithLoginAccess {
    type Rejection = CtxError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<CtxState>,
    ) -> Result<Self, Self::Rejection> {
        let cookies = CookieJar::from_headers(&parts.headers);
        let token = cookies
            .get(JWT_KEY)
            .map(|c| c.value().to_string())
            .or_else(|| bearer_token(parts))
            .ok_or(AppError::AuthFailNoJwtCookie)?;

        let claims = state
            .jwt
            .decode_by_type(&token, TokenType::Login)
            .map_err(|source| AppError::AuthFailJwtInvalid { source })?;

        Ok(AuthWithLoginAccess {
            user_id: claims.auth.clone(),
            ctx: Ctx::new(Ok(claims.auth)),
        })
    }
}
