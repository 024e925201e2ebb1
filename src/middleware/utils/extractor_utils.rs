use axum::body::{Body, Bytes};
use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::{FromRequest, Request};
use axum::http::header::CONTENT_TYPE;
use axum::{
    async_trait,
    response::{IntoResponse, Response},
    Form, Json, RequestExt,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use validator::Validate;

use crate::middleware::error::{AppError, CtxError};
use crate::middleware::utils::db_utils::{Pagination, QryOrder};

const MAX_PAGE_COUNT: u16 = 100;

fn error_response(error: AppError) -> Response {
    <CtxError as From<AppError>>::from(error).into_response()
}

fn validation_response(description: String) -> Response {
    error_response(AppError::ValidationError { description })
}

/// Body read as JSON or urlencoded form, then validated. A request without
/// content type and body reads as `{}`, so inputs made of optional fields
/// may be posted empty.
#[derive(Debug)]
pub struct JsonOrFormValidated<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonOrFormValidated<T>
where
    S: Send + Sync,
    Json<T>: FromRequest<(), Rejection = JsonRejection>,
    Form<T>: FromRequest<(), Rejection = FormRejection>,
    T: DeserializeOwned + Validate + Send + Sync + 'static,
{
    type Rejection = Response;

    async fn from_request(req: Request<Body>, _state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|v| v.to_string());

        let payload: T = match content_type {
            Some(ct) if ct.starts_with("application/json") => {
                let Json(payload) = req
                    .extract::<Json<T>, _>()
                    .await
                    .map_err(|err| validation_response(err.body_text()))?;
                payload
            }
            Some(ct) if ct.starts_with("application/x-www-form-urlencoded") => {
                let Form(payload) = req
                    .extract::<Form<T>, _>()
                    .await
                    .map_err(|err| validation_response(err.body_text()))?;
                payload
            }
            None => {
                let body = Bytes::from_request(req, &())
                    .await
                    .map_err(|err| validation_response(err.body_text()))?;
                if !body.is_empty() {
                    return Err(error_response(AppError::UnsupportedMediaType {
                        description: "Body requires a JSON or form content type".to_string(),
                    }));
                }
                serde_json::from_slice::<T>(b"{}")
                    .map_err(|err| validation_response(err.to_string()))?
            }
            Some(ct) => {
                return Err(error_response(AppError::UnsupportedMediaType {
                    description: format!("Unsupported content type {ct}"),
                }))
            }
        };

        payload
            .validate()
            .map_err(|err| validation_response(err.to_string()))?;
        Ok(Self(payload))
    }
}

/// Paging query shared by the listing endpoints.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PageParams {
    pub start: Option<u32>,
    pub count: Option<u16>,
}

impl PageParams {
    pub fn to_pagination(&self) -> Pagination {
        Pagination {
            order_by: Some("created_at".to_string()),
            order_dir: Some(QryOrder::DESC),
            count: self.count.unwrap_or(20).clamp(1, MAX_PAGE_COUNT),
            start: self.start.unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_is_clamped() {
        let pag = PageParams {
            start: Some(40),
            count: Some(1000),
        }
        .to_pagination();
        assert_eq!(pag.count, MAX_PAGE_COUNT);
        assert_eq!(pag.start, 40);
        assert_eq!(PageParams::default().to_pagination().count, 20);
    }
}
