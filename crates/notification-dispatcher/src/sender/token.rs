//! FCM 访问令牌来源
//!
//! FCM HTTP v1 API 需要 OAuth2 Bearer 令牌。令牌来源有三种：
//!
//! - 服务账号 JSON：本地签发 RS256 断言，向 token_uri 换取访问令牌
//! - 元数据服务：运行在 GCE / Cloud Run 上时直接获取默认服务账号的令牌
//! - 静态令牌：模拟器或测试环境
//!
//! 获取到的令牌缓存到过期前一分钟，避免每次多播都重新换取。

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::PushError;

/// FCM 推送所需的 OAuth scope
pub const FIREBASE_MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_METADATA_HOST: &str = "http://metadata.google.internal";

/// 断言有效期（秒），Google 允许的上限为 1 小时
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// 令牌提前刷新的余量
const EXPIRY_MARGIN_SECS: i64 = 60;

/// 访问令牌来源
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, PushError>;
}

// ---------------------------------------------------------------------------
// 静态令牌
// ---------------------------------------------------------------------------

pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, PushError> {
        Ok(self.token.clone())
    }
}

// ---------------------------------------------------------------------------
// 令牌缓存
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// OAuth token 端点响应
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

impl TokenResponse {
    fn into_cached(self, now: DateTime<Utc>) -> CachedToken {
        CachedToken {
            token: self.access_token,
            expires_at: now + Duration::seconds(self.expires_in),
        }
    }
}

/// 解析 token 端点响应，非 2xx 时带上响应体便于排查
async fn read_token_response(response: reqwest::Response) -> Result<TokenResponse, PushError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PushError::Auth(format!("status={}, body={}", status.as_u16(), body)));
    }
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| PushError::Auth(format!("令牌响应解析失败: {e}")))
}

// ---------------------------------------------------------------------------
// 服务账号
// ---------------------------------------------------------------------------

/// 服务账号 JSON 凭证中用到的字段
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: Option<String>,
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, PushError> {
        serde_json::from_str(json)
            .map_err(|e| PushError::Credentials(format!("服务账号 JSON 解析失败: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PushError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            PushError::Credentials(format!("读取服务账号文件失败 {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}

/// 服务账号断言的载荷
#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// 基于服务账号的令牌来源
pub struct ServiceAccountTokenProvider {
    key: ServiceAccountKey,
    http: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenProvider {
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> Self {
        Self {
            key,
            http,
            cache: Mutex::new(None),
        }
    }

    /// 签发 RS256 断言
    pub fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String, PushError> {
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: FIREBASE_MESSAGING_SCOPE.to_string(),
            aud: self.key.token_uri.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| PushError::Credentials(format!("服务账号私钥无效: {e}")))?;

        encode(&header, &claims, &encoding_key)
            .map_err(|e| PushError::Credentials(format!("断言签名失败: {e}")))
    }

    async fn fetch(&self) -> Result<CachedToken, PushError> {
        let now = Utc::now();
        let assertion = self.sign_assertion(now)?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| PushError::Auth(e.to_string()))?;

        let token = read_token_response(response).await?.into_cached(now);
        debug!(
            client_email = %self.key.client_email,
            expires_at = %token.expires_at,
            "已换取服务账号访问令牌"
        );
        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokenProvider {
    async fn access_token(&self) -> Result<String, PushError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh(Utc::now())) {
            return Ok(cached.token.clone());
        }

        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}

// ---------------------------------------------------------------------------
// 元数据服务
// ---------------------------------------------------------------------------

/// 从 GCE / Cloud Run 元数据服务获取默认服务账号令牌
pub struct MetadataTokenProvider {
    host: String,
    http: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl MetadataTokenProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_host(http, DEFAULT_METADATA_HOST)
    }

    pub fn with_host(http: reqwest::Client, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            http,
            cache: Mutex::new(None),
        }
    }

    fn token_url(&self) -> String {
        format!(
            "{}/computeMetadata/v1/instance/service-accounts/default/token?scopes={}",
            self.host.trim_end_matches('/'),
            FIREBASE_MESSAGING_SCOPE
        )
    }
}

#[async_trait]
impl TokenProvider for MetadataTokenProvider {
    async fn access_token(&self) -> Result<String, PushError> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now();
        if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh(now)) {
            return Ok(cached.token.clone());
        }

        let response = self
            .http
            .get(self.token_url())
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| PushError::Auth(e.to_string()))?;

        let fresh = read_token_response(response).await?.into_cached(now);
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}
