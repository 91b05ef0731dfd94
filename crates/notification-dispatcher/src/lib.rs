//! 求职申请推送中继服务
//!
//! 诊所端 App 通过可调用接口提交推送请求，服务校验调用方身份与请求参数后，
//! 对给定的设备 token 执行一次多播推送，并汇总每个 token 的投递结果返回给调用方。
//!
//! ## 模块结构
//!
//! - `models`: 请求、投递结果与可调用协议的数据结构
//! - `templates`: 按部署语言提供默认通知文案
//! - `dispatcher`: 校验 → 发送 → 汇总的核心流程
//! - `sender`: 推送服务抽象及 FCM / 日志实现
//! - `auth`: 调用方身份（ID Token）校验
//! - `middleware`: 将调用方身份注入请求扩展
//! - `handlers` / `routes` / `state`: HTTP 可调用接口
//!
//! 单次调用不持有任何跨请求的可变状态，失败的 token 只记录日志，不重试。

pub mod auth;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod sender;
pub mod state;
pub mod templates;

pub use dispatcher::NotificationDispatcher;
pub use error::{DispatchError, Result};
pub use models::{DeliveryOutcome, DispatchResult, NotificationRequest};
pub use sender::{MAX_MULTICAST_TOKENS, PushDeliveryService};
