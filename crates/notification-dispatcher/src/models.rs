//! 数据模型
//!
//! 可调用接口的入参、出参以及单个 token 的投递结果。字段在线上使用 camelCase。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 客户端点击通知时触发的动作键
pub const CLICK_ACTION_KEY: &str = "click_action";

/// Flutter 客户端识别的点击动作，由服务端强制写入，覆盖调用方传入的同名键
pub const CLICK_ACTION_VALUE: &str = "FLUTTER_NOTIFICATION_CLICK";

/// 推送请求
///
/// 所有字段在反序列化时都允许缺失，必填校验由 dispatcher 按固定顺序执行，
/// 以保证"先校验身份、再校验参数"的错误优先级。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    /// 发起推送的诊所（租户）ID
    pub clinic_id: Option<String>,
    /// 目标设备 token，保持调用方给定的顺序，不去重
    pub device_tokens: Option<Vec<String>>,
    pub title: Option<String>,
    pub body: Option<String>,
    /// 透传给客户端的数据，服务端只追加 click_action
    pub data: Option<HashMap<String, String>>,
}

/// 单个设备 token 的投递结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub token: String,
    pub success: bool,
    pub error: Option<String>,
}

/// 返回给调用方的汇总结果
///
/// 部分 token 失败不视为错误：success 恒为 true，失败数量体现在 failure_count。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub success: bool,
    pub success_count: usize,
    pub failure_count: usize,
}

impl DispatchResult {
    pub fn completed(success_count: usize, failure_count: usize) -> Self {
        Self {
            success: true,
            success_count,
            failure_count,
        }
    }
}

// ============================================================================
// 可调用协议信封
// ============================================================================

/// 可调用请求信封：`{"data": ...}`
#[derive(Debug, Deserialize)]
pub struct CallableRequest {
    #[serde(default)]
    pub data: serde_json::Value,
}

/// 可调用成功响应：`{"result": ...}`
#[derive(Debug, Serialize, Deserialize)]
pub struct CallableResponse<T> {
    pub result: T,
}

/// 可调用错误响应：`{"error": {...}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct CallableErrorBody {
    pub error: CallableErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CallableErrorDetail {
    /// 规范错误码，如 UNAUTHENTICATED / INVALID_ARGUMENT / INTERNAL
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
