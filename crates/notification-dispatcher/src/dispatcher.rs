//! 推送分发器
//!
//! 单次调用经历 校验 → 发送 → 汇总 三个阶段：
//!
//! 1. 校验：调用方身份、clinicId、deviceTokens，任一失败立即返回，不触达推送服务
//! 2. 发送：对推送服务发起恰好一次多播调用，不重试、不拆分
//! 3. 汇总：逐 token 统计成功/失败，失败的 token 只记录日志
//!
//! 分发器只持有不可变配置与推送服务引用，并发调用之间没有共享的可变状态。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use notify_shared::observability::metrics;
use tracing::{error, info, warn};

use crate::auth::CallerIdentity;
use crate::error::{DispatchError, Result};
use crate::models::{
    CLICK_ACTION_KEY, CLICK_ACTION_VALUE, DeliveryOutcome, DispatchResult, NotificationRequest,
};
use crate::sender::{BatchResponse, MulticastMessage, PushDeliveryService, PushError, PushNotification};
use crate::templates::{Locale, NotificationTemplates};

/// 推送分发器
pub struct NotificationDispatcher {
    push_service: Arc<dyn PushDeliveryService>,
    locale: Locale,
}

impl NotificationDispatcher {
    pub fn new(push_service: Arc<dyn PushDeliveryService>, locale: Locale) -> Self {
        Self {
            push_service,
            locale,
        }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn provider(&self) -> &'static str {
        self.push_service.provider()
    }

    /// 处理一次推送请求
    ///
    /// 多播调用正常返回即视为完成，即使部分 token 失败；
    /// 只有推送服务调用本身失败时才返回 `Internal`。
    pub async fn dispatch(
        &self,
        caller: Option<&CallerIdentity>,
        request: &NotificationRequest,
    ) -> Result<DispatchResult> {
        let result = self.run(caller, request).await;

        let outcome = match &result {
            Ok(_) => "completed",
            Err(e) => e.outcome(),
        };
        metrics::record_push_dispatch(outcome);

        result
    }

    async fn run(
        &self,
        caller: Option<&CallerIdentity>,
        request: &NotificationRequest,
    ) -> Result<DispatchResult> {
        let caller = authenticate(caller)?;
        let (clinic_id, tokens) = validate(request)?;

        let message = self.build_message(request, tokens);

        info!(
            clinic_id = %clinic_id,
            caller_uid = %caller.uid,
            token_count = tokens.len(),
            provider = self.push_service.provider(),
            "开始发送求职申请推送"
        );

        let start = Instant::now();
        let batch = self.push_service.send_multicast(&message).await;
        metrics::record_push_delivery_duration(
            self.push_service.provider(),
            start.elapsed().as_secs_f64(),
        );

        let batch = batch.map_err(|e| {
            error!(
                clinic_id = %clinic_id,
                token_count = tokens.len(),
                error = %e,
                "推送服务调用失败"
            );
            DispatchError::internal(e)
        })?;

        let outcomes = aggregate(tokens, batch).map_err(DispatchError::internal)?;

        let success_count = outcomes.iter().filter(|o| o.success).count();
        let failure_count = outcomes.len() - success_count;

        for outcome in outcomes.iter().filter(|o| !o.success) {
            warn!(
                clinic_id = %clinic_id,
                token = %outcome.token,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "推送到设备失败"
            );
        }

        metrics::record_push_tokens(success_count, failure_count);

        info!(
            clinic_id = %clinic_id,
            success_count,
            failure_count,
            "推送发送完成"
        );

        Ok(DispatchResult::completed(success_count, failure_count))
    }

    /// 构造多播消息
    ///
    /// 标题/正文为空时使用默认文案；data 浅拷贝后写入 click_action，服务端的值覆盖调用方的同名键。
    pub fn build_message(&self, request: &NotificationRequest, tokens: &[String]) -> MulticastMessage {
        let title = NotificationTemplates::or_default(
            request.title.as_deref(),
            NotificationTemplates::default_title(self.locale),
        );
        let body = NotificationTemplates::or_default(
            request.body.as_deref(),
            NotificationTemplates::default_body(self.locale),
        );

        let mut data: HashMap<String, String> = request.data.clone().unwrap_or_default();
        data.insert(CLICK_ACTION_KEY.to_string(), CLICK_ACTION_VALUE.to_string());

        MulticastMessage {
            notification: PushNotification { title, body },
            data,
            tokens: tokens.to_vec(),
        }
    }
}

/// 校验调用方身份
pub fn authenticate(caller: Option<&CallerIdentity>) -> Result<&CallerIdentity> {
    caller.ok_or_else(DispatchError::unauthenticated)
}

/// 按顺序校验 clinicId 与 deviceTokens，返回借用的字段
pub fn validate(request: &NotificationRequest) -> Result<(&str, &[String])> {
    let clinic_id = request
        .clinic_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DispatchError::invalid_argument("clinicId is required."))?;

    let tokens = request
        .device_tokens
        .as_deref()
        .filter(|tokens| !tokens.is_empty())
        .ok_or_else(|| DispatchError::invalid_argument("deviceTokens must be a non-empty array."))?;

    Ok((clinic_id, tokens))
}

/// 将推送服务返回的结果与输入 token 按位置对齐
///
/// 结果数量与 token 数量不一致说明推送服务违反约定，整体视为调用失败。
pub fn aggregate(
    tokens: &[String],
    batch: BatchResponse,
) -> std::result::Result<Vec<DeliveryOutcome>, PushError> {
    if batch.responses.len() != tokens.len() {
        return Err(PushError::MalformedResponse {
            expected: tokens.len(),
            actual: batch.responses.len(),
        });
    }

    Ok(tokens
        .iter()
        .zip(batch.responses)
        .map(|(token, response)| DeliveryOutcome {
            token: token.clone(),
            success: response.success,
            error: if response.success {
                None
            } else {
                Some(response.error.unwrap_or_else(|| "unknown".to_string()))
            },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::{MockPushDeliveryService, SendResponse};
    use std::io;
    use std::sync::Mutex;
    use tracing_subscriber::fmt::MakeWriter;

    fn caller() -> CallerIdentity {
        CallerIdentity::new("clinic-owner-uid")
    }

    fn make_request(tokens: &[&str]) -> NotificationRequest {
        NotificationRequest {
            clinic_id: Some("clinic-001".to_string()),
            device_tokens: Some(tokens.iter().map(|t| t.to_string()).collect()),
            ..Default::default()
        }
    }

    /// 不允许被调用的推送服务
    fn untouched_service() -> MockPushDeliveryService {
        let mut mock = MockPushDeliveryService::new();
        mock.expect_send_multicast().never();
        mock.expect_provider().return_const("mock");
        mock
    }

    fn dispatcher(mock: MockPushDeliveryService) -> NotificationDispatcher {
        NotificationDispatcher::new(Arc::new(mock), Locale::En)
    }

    /// 收集日志输出，用于断言诊断日志
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_completed() {
        let mut mock = MockPushDeliveryService::new();
        mock.expect_provider().return_const("mock");
        mock.expect_send_multicast()
            .times(1)
            .withf(|message| message.tokens == vec!["tokA", "tokB", "tokC"])
            .returning(|_| {
                Ok(BatchResponse::from_responses(vec![
                    SendResponse::success("m-a"),
                    SendResponse::failure("UNREGISTERED"),
                    SendResponse::success("m-c"),
                ]))
            });

        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let result = dispatcher(mock)
            .dispatch(Some(&caller()), &make_request(&["tokA", "tokB", "tokC"]))
            .await
            .unwrap();

        assert_eq!(result, DispatchResult::completed(2, 1));
        assert!(result.success);

        let output = logs.contents();
        let failure_lines: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("推送到设备失败"))
            .collect();
        assert_eq!(failure_lines.len(), 1);
        assert!(failure_lines[0].contains("tokB"));
        assert!(failure_lines[0].contains("UNREGISTERED"));
    }

    #[tokio::test]
    async fn test_empty_tokens_rejected_without_delivery() {
        let result = dispatcher(untouched_service())
            .dispatch(Some(&caller()), &make_request(&[]))
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_missing_tokens_rejected_without_delivery() {
        let request = NotificationRequest {
            clinic_id: Some("clinic-001".to_string()),
            ..Default::default()
        };
        let result = dispatcher(untouched_service())
            .dispatch(Some(&caller()), &request)
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_missing_or_empty_clinic_id_rejected() {
        for clinic_id in [None, Some(String::new())] {
            let request = NotificationRequest {
                clinic_id,
                device_tokens: Some(vec!["tokA".to_string()]),
                ..Default::default()
            };
            let result = dispatcher(untouched_service())
                .dispatch(Some(&caller()), &request)
                .await;
            match result {
                Err(DispatchError::InvalidArgument(message)) => {
                    assert_eq!(message, "clinicId is required.")
                }
                other => panic!("期望 InvalidArgument，实际 {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_unauthenticated_checked_before_fields() {
        // 请求本身也不合法，但身份校验优先
        let result = dispatcher(untouched_service())
            .dispatch(None, &NotificationRequest::default())
            .await;
        assert!(matches!(result, Err(DispatchError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_provider_failure_is_internal() {
        let mut mock = MockPushDeliveryService::new();
        mock.expect_provider().return_const("mock");
        mock.expect_send_multicast()
            .times(1)
            .returning(|_| Err(PushError::Auth("connection reset".to_string())));

        let result = dispatcher(mock)
            .dispatch(Some(&caller()), &make_request(&["tokA"]))
            .await;

        match result {
            Err(DispatchError::Internal { source, .. }) => {
                assert!(matches!(source, PushError::Auth(ref m) if m == "connection reset"));
            }
            other => panic!("期望 Internal，实际 {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mismatched_response_is_internal() {
        let mut mock = MockPushDeliveryService::new();
        mock.expect_provider().return_const("mock");
        mock.expect_send_multicast()
            .returning(|_| Ok(BatchResponse::from_responses(vec![SendResponse::success("m")])));

        let result = dispatcher(mock)
            .dispatch(Some(&caller()), &make_request(&["tokA", "tokB"]))
            .await;

        assert!(matches!(
            result,
            Err(DispatchError::Internal {
                source: PushError::MalformedResponse { expected: 2, actual: 1 },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_default_title_and_body() {
        let mut mock = MockPushDeliveryService::new();
        mock.expect_provider().return_const("mock");
        mock.expect_send_multicast()
            .times(1)
            .withf(|message| {
                message.notification.title == "New job application"
                    && message.notification.body == "A dentist has applied for your job posting."
            })
            .returning(|m| {
                Ok(BatchResponse::from_responses(
                    m.tokens.iter().map(|_| SendResponse::success("m")).collect(),
                ))
            });

        let mut request = make_request(&["tokA"]);
        request.title = Some(String::new());

        let result = dispatcher(mock)
            .dispatch(Some(&caller()), &request)
            .await
            .unwrap();
        assert_eq!(result, DispatchResult::completed(1, 0));
    }

    #[tokio::test]
    async fn test_identical_calls_deliver_twice() {
        let mut mock = MockPushDeliveryService::new();
        mock.expect_provider().return_const("mock");
        mock.expect_send_multicast().times(2).returning(|m| {
            Ok(BatchResponse::from_responses(
                m.tokens.iter().map(|_| SendResponse::success("m")).collect(),
            ))
        });

        let dispatcher = dispatcher(mock);
        let request = make_request(&["tokA", "tokA"]);

        let first = dispatcher.dispatch(Some(&caller()), &request).await.unwrap();
        let second = dispatcher.dispatch(Some(&caller()), &request).await.unwrap();

        // 不去重：同一个 token 出现两次就发送两次
        assert_eq!(first, DispatchResult::completed(2, 0));
        assert_eq!(second, first);
    }

    #[test]
    fn test_build_message_click_action_wins() {
        let mut request = make_request(&["tokA", "tokB"]);
        request.title = Some("ผู้สมัครใหม่".to_string());
        request.body = Some("ทันตแพทย์สมัครงาน".to_string());
        let mut data = HashMap::new();
        data.insert("click_action".to_string(), "OPEN_SETTINGS".to_string());
        data.insert("jobId".to_string(), "job-42".to_string());
        request.data = Some(data);

        let message = dispatcher(untouched_service()).build_message(
            &request,
            request.device_tokens.as_deref().unwrap(),
        );

        assert_eq!(message.notification.title, "ผู้สมัครใหม่");
        assert_eq!(message.notification.body, "ทันตแพทย์สมัครงาน");
        assert_eq!(message.data.get("click_action").unwrap(), CLICK_ACTION_VALUE);
        assert_eq!(message.data.get("jobId").unwrap(), "job-42");
        assert_eq!(message.tokens, vec!["tokA", "tokB"]);
        // 调用方的 data 不被修改
        assert_eq!(
            request.data.unwrap().get("click_action").unwrap(),
            "OPEN_SETTINGS"
        );
    }

    #[test]
    fn test_build_message_thai_defaults() {
        let dispatcher = NotificationDispatcher::new(Arc::new(untouched_service()), Locale::Th);
        let request = make_request(&["tokA"]);
        let message = dispatcher.build_message(&request, request.device_tokens.as_deref().unwrap());

        assert_eq!(message.notification.title, "มีผู้สมัครงานใหม่");
        assert_eq!(message.notification.body, "มีผู้สมัครงานใหม่สำหรับงานของคุณ");
        assert_eq!(message.data.len(), 1);
    }

    #[test]
    fn test_aggregate_aligns_by_position() {
        let tokens = vec!["tokA".to_string(), "tokB".to_string()];
        let outcomes = aggregate(
            &tokens,
            BatchResponse::from_responses(vec![
                SendResponse::failure("INVALID_ARGUMENT"),
                SendResponse::success("m-b"),
            ]),
        )
        .unwrap();

        assert_eq!(
            outcomes,
            vec![
                DeliveryOutcome {
                    token: "tokA".to_string(),
                    success: false,
                    error: Some("INVALID_ARGUMENT".to_string()),
                },
                DeliveryOutcome {
                    token: "tokB".to_string(),
                    success: true,
                    error: None,
                },
            ]
        );
    }

    #[test]
    fn test_validate_order() {
        let request = NotificationRequest {
            clinic_id: None,
            device_tokens: None,
            ..Default::default()
        };
        // clinicId 先于 deviceTokens 校验
        match validate(&request) {
            Err(DispatchError::InvalidArgument(message)) => {
                assert_eq!(message, "clinicId is required.")
            }
            other => panic!("期望 InvalidArgument，实际 {other:?}"),
        }
    }

    #[test]
    fn test_authenticate() {
        let identity = caller();
        tokio_test::assert_ok!(authenticate(Some(&identity)));
        tokio_test::assert_err!(authenticate(None));
    }
}
