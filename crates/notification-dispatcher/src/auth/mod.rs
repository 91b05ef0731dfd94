//! 调用方身份模块
//!
//! 校验客户端随请求携带的 ID Token，产出 `CallerIdentity` 供 dispatcher 使用。

mod jwt;

pub use jwt::{IdTokenClaims, IdentityError, IdentityVerifier, JwtIdentityVerifier, VerifyingKeys};

use serde::{Deserialize, Serialize};

/// 已认证的调用方
///
/// 由宿主环境（HTTP 中间件）解析后作为显式参数传给 dispatcher，
/// dispatcher 本身不读取任何全局或隐式的身份上下文。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// 身份提供方中的用户 ID
    pub uid: String,
    pub email: Option<String>,
    /// 签发时间（Unix 秒）
    pub issued_at: i64,
    /// 过期时间（Unix 秒）
    pub expires_at: i64,
}

impl CallerIdentity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            issued_at: 0,
            expires_at: 0,
        }
    }
}
