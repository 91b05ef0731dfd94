//! 调用方身份中间件
//!
//! 从 Authorization header 中提取 Bearer Token，校验通过后将 `CallerIdentity` 注入请求扩展。
//! 校验失败不在此处拒绝请求：是否需要身份由 dispatcher 决定，以保持统一的错误格式与校验顺序。

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::auth::CallerIdentity;
use crate::state::AppState;

/// 身份中间件
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if let Some(token) = token {
        match state.verifier.verify(token) {
            Ok(identity) => {
                request.extensions_mut().insert(identity);
            }
            Err(e) => {
                warn!(error = %e, "调用方 Token 校验失败，按未认证处理");
            }
        }
    }

    next.run(request).await
}

/// 调用方身份提取器
///
/// 未通过身份中间件认证的请求得到 `Caller(None)`。
#[derive(Debug, Clone)]
pub struct Caller(pub Option<CallerIdentity>);

impl Caller {
    pub fn identity(&self) -> Option<&CallerIdentity> {
        self.0.as_ref()
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<CallerIdentity>().cloned()))
    }
}
