//! 推送投递服务
//!
//! 通过 `PushDeliveryService` trait 抽象"多播发送"这一个操作，dispatcher 只依赖该 trait，
//! 测试时可替换为 mock 实现。提供两种实现：
//!
//! - [`FcmClient`]：FCM HTTP v1 API，逐 token 并发发送后按输入顺序汇总
//! - [`LogOnlyPushService`]：仅记录日志，用于本地开发

mod fcm;
mod token;

pub use fcm::FcmClient;
pub use token::{
    MetadataTokenProvider, ServiceAccountKey, ServiceAccountTokenProvider, StaticTokenProvider,
    TokenProvider,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify_shared::config::MessagingConfig;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// 单次多播允许的最大 token 数（FCM 的限制）
///
/// 超过该数量时整个调用失败，dispatcher 不做拆分。
pub const MAX_MULTICAST_TOKENS: usize = 500;

/// 通知展示内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
}

/// 多播消息：同一条通知发往多个设备
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastMessage {
    pub notification: PushNotification,
    pub data: HashMap<String, String>,
    pub tokens: Vec<String>,
}

/// 单个 token 的发送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResponse {
    pub success: bool,
    /// 推送服务返回的消息标识，用于追踪投递状态
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl SendResponse {
    pub fn success(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// 多播结果，`responses` 与输入 token 按位置一一对应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResponse {
    pub success_count: usize,
    pub failure_count: usize,
    pub responses: Vec<SendResponse>,
}

impl BatchResponse {
    pub fn from_responses(responses: Vec<SendResponse>) -> Self {
        let success_count = responses.iter().filter(|r| r.success).count();
        Self {
            success_count,
            failure_count: responses.len() - success_count,
            responses,
        }
    }
}

/// 推送服务错误
///
/// 只描述"整个多播调用失败"的情况；单个 token 的失败属于正常结果，记录在 `SendResponse` 中。
#[derive(Debug, Error)]
pub enum PushError {
    #[error("推送凭证无效: {0}")]
    Credentials(String),

    #[error("获取访问令牌失败: {0}")]
    Auth(String),

    #[error("多播 token 数量超限: {count} > {max}")]
    TooManyTokens { count: usize, max: usize },

    #[error("推送服务请求失败: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("推送服务返回结果数量不匹配: 期望 {expected}, 实际 {actual}")]
    MalformedResponse { expected: usize, actual: usize },
}

/// 推送投递服务 trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushDeliveryService: Send + Sync {
    /// 发送多播消息，每次调用只对推送服务发起一次逻辑上的多播
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<BatchResponse, PushError>;

    /// 推送服务名称（用于日志和指标）
    fn provider(&self) -> &'static str;
}

/// 根据配置构建推送服务
///
/// - `provider = "log"`：返回 [`LogOnlyPushService`]
/// - `provider = "fcm"`：按 access_token → credentials_path → 元数据服务 的优先级选择令牌来源
pub fn from_config(config: &MessagingConfig) -> Result<Arc<dyn PushDeliveryService>, PushError> {
    match config.provider.as_str() {
        "log" => {
            warn!("推送服务为 log 模式，通知不会真实投递到设备");
            Ok(Arc::new(LogOnlyPushService))
        }
        "fcm" => {
            let timeout = Duration::from_millis(config.timeout_ms);
            let http = reqwest::Client::builder().timeout(timeout).build()?;

            let (token_provider, key_project_id): (Arc<dyn TokenProvider>, Option<String>) =
                if let Some(token) = &config.access_token {
                    (Arc::new(StaticTokenProvider::new(token.clone())), None)
                } else if let Some(path) = &config.credentials_path {
                    let key = ServiceAccountKey::from_file(path)?;
                    let project_id = key.project_id.clone();
                    (
                        Arc::new(ServiceAccountTokenProvider::new(key, http.clone())),
                        project_id,
                    )
                } else if config.use_metadata_server {
                    (Arc::new(MetadataTokenProvider::new(http.clone())), None)
                } else {
                    return Err(PushError::Credentials(
                        "未配置 access_token、credentials_path 或 use_metadata_server".to_string(),
                    ));
                };

            let project_id = config
                .project_id
                .clone()
                .or(key_project_id)
                .ok_or_else(|| PushError::Credentials("缺少 FCM project_id".to_string()))?;

            Ok(Arc::new(FcmClient::new(
                http,
                config.endpoint.clone(),
                project_id,
                token_provider,
                config.max_concurrency,
            )))
        }
        other => Err(PushError::Credentials(format!("未知的推送服务: {other}"))),
    }
}

// ---------------------------------------------------------------------------
// 日志推送服务
// ---------------------------------------------------------------------------

/// 仅记录日志的推送服务
///
/// 本地开发时替代真实推送，所有 token 视为发送成功。
pub struct LogOnlyPushService;

#[async_trait]
impl PushDeliveryService for LogOnlyPushService {
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<BatchResponse, PushError> {
        if message.tokens.len() > MAX_MULTICAST_TOKENS {
            return Err(PushError::TooManyTokens {
                count: message.tokens.len(),
                max: MAX_MULTICAST_TOKENS,
            });
        }

        let responses = message
            .tokens
            .iter()
            .map(|token| {
                let message_id = Uuid::now_v7().to_string();
                info!(
                    provider = "log",
                    token = %token,
                    message_id = %message_id,
                    title = %message.notification.title,
                    "模拟发送推送通知"
                );
                SendResponse::success(message_id)
            })
            .collect();

        Ok(BatchResponse::from_responses(responses))
    }

    fn provider(&self) -> &'static str {
        "log"
    }
}
