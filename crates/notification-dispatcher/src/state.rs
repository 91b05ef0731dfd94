//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态

use std::sync::Arc;

use crate::auth::IdentityVerifier;
use crate::dispatcher::NotificationDispatcher;

/// Axum 应用共享状态
///
/// 只包含不可变的组件引用，通过 Arc 在 handler 间共享
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<NotificationDispatcher>,
    /// 调用方 ID Token 校验器
    pub verifier: Arc<dyn IdentityVerifier>,
    /// 可调用函数绑定的部署区域
    pub region: String,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<NotificationDispatcher>,
        verifier: Arc<dyn IdentityVerifier>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            verifier,
            region: region.into(),
        }
    }
}
