//! FCM HTTP v1 推送实现
//!
//! FCM v1 API 每次请求只接受一个 token，多播通过对每个 token 单独发起请求实现。
//! 请求并发执行（受 `max_concurrency` 限制），结果按输入顺序收集，
//! 与 token 序列按位置一一对应。
//!
//! 单个 token 的 HTTP 失败或网络错误记为该 token 的失败；
//! 获取访问令牌失败或 token 数量超限则整个调用失败。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    BatchResponse, MAX_MULTICAST_TOKENS, MulticastMessage, PushDeliveryService, PushError,
    PushNotification, SendResponse, TokenProvider,
};

/// FCM v1 发送请求体
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Debug, Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: &'a PushNotification,
    #[serde(skip_serializing_if = "is_empty_data")]
    data: &'a HashMap<String, String>,
}

fn is_empty_data(data: &&HashMap<String, String>) -> bool {
    data.is_empty()
}

/// 发送成功时的响应体
#[derive(Debug, Deserialize)]
struct SendSuccess {
    name: String,
}

/// 发送失败时的响应体（Google API 标准错误格式）
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorStatus,
}

#[derive(Debug, Deserialize)]
struct ErrorStatus {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    #[serde(default)]
    error_code: Option<String>,
}

impl ErrorStatus {
    /// 优先使用 FCM 专有错误码（如 UNREGISTERED），其次是通用状态
    fn describe(&self) -> String {
        let code = self
            .details
            .iter()
            .find_map(|d| d.error_code.as_deref())
            .unwrap_or(self.status.as_str());
        if self.message.is_empty() {
            code.to_string()
        } else {
            format!("{code}: {}", self.message)
        }
    }
}

/// FCM 推送客户端
pub struct FcmClient {
    http: reqwest::Client,
    endpoint: String,
    project_id: String,
    token_provider: Arc<dyn TokenProvider>,
    max_concurrency: usize,
}

impl FcmClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        token_provider: Arc<dyn TokenProvider>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            project_id: project_id.into(),
            token_provider,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// `{endpoint}/v1/projects/{project_id}/messages:send`
    pub fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.endpoint.trim_end_matches('/'),
            self.project_id
        )
    }

    /// 向单个 token 发送，任何失败都转为该 token 的失败结果
    async fn send_one(
        &self,
        url: &str,
        access_token: &str,
        message: &MulticastMessage,
        token: &str,
    ) -> SendResponse {
        if token.is_empty() {
            return SendResponse::failure("INVALID_ARGUMENT: empty registration token");
        }

        let body = SendRequest {
            message: FcmMessage {
                token,
                notification: &message.notification,
                data: &message.data,
            },
        };

        let response = match self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return SendResponse::failure(e.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<SendSuccess>().await {
                Ok(success) => SendResponse::success(success.name),
                Err(e) => SendResponse::failure(format!("响应解析失败: {e}")),
            };
        }

        let text = response.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<ErrorEnvelope>(&text)
            .map(|envelope| envelope.error.describe())
            .unwrap_or_else(|_| format!("HTTP {}: {}", status.as_u16(), text));
        SendResponse::failure(reason)
    }
}

#[async_trait]
impl PushDeliveryService for FcmClient {
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<BatchResponse, PushError> {
        if message.tokens.len() > MAX_MULTICAST_TOKENS {
            return Err(PushError::TooManyTokens {
                count: message.tokens.len(),
                max: MAX_MULTICAST_TOKENS,
            });
        }

        let access_token = self.token_provider.access_token().await?;
        let url = self.send_url();

        debug!(
            project_id = %self.project_id,
            token_count = message.tokens.len(),
            "开始 FCM 多播发送"
        );

        let url = url.as_str();
        let access_token = access_token.as_str();

        // buffered 保持输出顺序与输入一致
        let responses: Vec<SendResponse> = stream::iter(message.tokens.clone())
            .map(|token| async move { self.send_one(url, access_token, message, &token).await })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        Ok(BatchResponse::from_responses(responses))
    }

    fn provider(&self) -> &'static str {
        "fcm"
    }
}
