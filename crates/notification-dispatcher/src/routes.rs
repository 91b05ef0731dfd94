//! 路由配置模块
//!
//! 可调用函数同时挂载在区域前缀路径与无前缀路径下。

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::handlers::{self, FUNCTION_NAME};
use crate::middleware::identity_middleware;
use crate::state::AppState;

/// 可调用函数路由（经过身份中间件）
pub fn callable_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            &format!("/{FUNCTION_NAME}"),
            post(handlers::send_job_application_notification),
        )
        .route(
            &format!("/{{region}}/{FUNCTION_NAME}"),
            post(handlers::send_job_application_notification_in_region),
        )
        .layer(middleware::from_fn_with_state(state, identity_middleware))
}

/// 完整应用路由：可调用函数 + 探针
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(callable_routes(state.clone()))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(state)
}
