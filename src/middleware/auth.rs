use crate::error::Error;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Shared secret expected in `Authorization: Bearer <key>`.
#[derive(Clone)]
pub struct ApiKey(pub Arc<str>);

impl ApiKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    fn matches(&self, provided: &str) -> bool {
        ConstantTimeEq::ct_eq(provided.as_bytes(), self.0.as_bytes()).into()
    }
}

pub async fn require_api_key(State(key): State<ApiKey>, req: Request, next: Next) -> Response {
    let Some(auth_header) = req.headers().get(axum::http::header::AUTHORIZATION) else {
        return Error::Unauthorized("missing_authorization".into()).into_response();
    };
    let Ok(auth_str) = auth_header.to_str() else {
        return Error::Unauthorized("bad_authorization".into()).into_response();
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return Error::Unauthorized("unsupported_scheme".into()).into_response();
    };
    if !key.matches(token.trim()) {
        tracing::warn!("rejected request with invalid API key");
        return Error::Unauthorized("invalid_api_key".into()).into_response();
    }
    next.run(req).await
}
