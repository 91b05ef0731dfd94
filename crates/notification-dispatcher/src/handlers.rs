//! HTTP 请求处理器
//!
//! 实现可调用协议：请求体 `{"data": NotificationRequest}`，
//! 成功返回 `{"result": DispatchResult}`，失败返回 `{"error": {status, message, details}}`。

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::debug;

use crate::dispatcher::authenticate;
use crate::error::{DispatchError, Result};
use crate::middleware::Caller;
use crate::models::{CallableRequest, CallableResponse, DispatchResult, NotificationRequest};
use crate::state::AppState;

/// 可调用函数名
pub const FUNCTION_NAME: &str = "sendJobApplicationNotification";

/// 解析可调用请求体
fn parse_request(body: &[u8]) -> Result<NotificationRequest> {
    let envelope: CallableRequest = serde_json::from_slice(body).map_err(|e| {
        DispatchError::invalid_argument(format!("Request body must be a JSON object: {e}"))
    })?;

    if envelope.data.is_null() {
        return Ok(NotificationRequest::default());
    }

    serde_json::from_value(envelope.data)
        .map_err(|e| DispatchError::invalid_argument(format!("Invalid request data: {e}")))
}

/// 发送求职申请推送
///
/// POST /sendJobApplicationNotification
pub async fn send_job_application_notification(
    State(state): State<AppState>,
    caller: Caller,
    body: Bytes,
) -> Result<Json<CallableResponse<DispatchResult>>> {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(e) => {
            // 请求体无法解析时同样先校验身份，保证未认证错误优先
            authenticate(caller.identity())?;
            debug!(error = %e, "可调用请求体解析失败");
            return Err(e);
        }
    };

    let result = state
        .dispatcher
        .dispatch(caller.identity(), &request)
        .await?;

    Ok(Json(CallableResponse { result }))
}

/// 带区域前缀的可调用入口
///
/// POST /{region}/sendJobApplicationNotification，区域不匹配时返回 404
pub async fn send_job_application_notification_in_region(
    State(state): State<AppState>,
    Path(region): Path<String>,
    caller: Caller,
    body: Bytes,
) -> Response {
    if region != state.region {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": {
                    "status": "NOT_FOUND",
                    "message": format!("Function {FUNCTION_NAME} is not deployed in region {region}.")
                }
            })),
        )
            .into_response();
    }

    send_job_application_notification(State(state), caller, body)
        .await
        .into_response()
}

/// 存活探针
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "notification-dispatcher"
    }))
}

/// 就绪探针：报告当前的推送服务与部署区域
pub async fn readiness_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "notification-dispatcher",
        "region": state.region,
        "provider": state.dispatcher.provider(),
        "locale": state.dispatcher.locale().code()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let request = parse_request(
            br#"{"data": {"clinicId": "clinic-1", "deviceTokens": ["tokA"]}}"#,
        )
        .unwrap();
        assert_eq!(request.clinic_id.as_deref(), Some("clinic-1"));
        assert_eq!(request.device_tokens, Some(vec!["tokA".to_string()]));
    }

    #[test]
    fn test_parse_request_missing_data() {
        assert_eq!(parse_request(b"{}").unwrap(), NotificationRequest::default());
    }

    #[test]
    fn test_parse_request_not_json() {
        assert!(matches!(
            parse_request(b"clinicId=1"),
            Err(DispatchError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_parse_request_wrong_shape() {
        assert!(matches!(
            parse_request(br#"{"data": {"clinicId": "c", "deviceTokens": "tokA"}}"#),
            Err(DispatchError::InvalidArgument(_))
        ));
    }
}
