//! ID Token 校验
//!
//! 支持两种验签方式：
//!
//! - HS256 共享密钥（本地开发、内部调用）
//! - RS256 公钥，按 JWT header 中的 kid 选择（身份提供方签发的 ID Token）

use std::collections::HashMap;
use std::path::Path;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use notify_shared::config::AuthConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CallerIdentity;

/// 身份校验错误
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Token 已过期")]
    Expired,

    #[error("无效的 Token: {0}")]
    Invalid(String),

    #[error("未知的签名密钥: kid={0}")]
    UnknownKey(String),

    #[error("身份校验配置错误: {0}")]
    Configuration(String),
}

/// ID Token 载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// 用户 ID
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

impl From<IdTokenClaims> for CallerIdentity {
    fn from(claims: IdTokenClaims) -> Self {
        Self {
            uid: claims.sub,
            email: claims.email,
            issued_at: claims.iat,
            expires_at: claims.exp,
        }
    }
}

/// 身份校验 trait
///
/// 宿主环境在调用 dispatcher 前使用它解析 Bearer Token。
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<CallerIdentity, IdentityError>;
}

/// 验签密钥
pub enum VerifyingKeys {
    /// HS256 共享密钥
    Shared(DecodingKey),
    /// RS256 公钥，kid -> key
    Rsa(HashMap<String, DecodingKey>),
}

impl VerifyingKeys {
    pub fn shared_secret(secret: &str) -> Self {
        Self::Shared(DecodingKey::from_secret(secret.as_bytes()))
    }

    /// 从 kid -> PEM 映射构建 RS256 公钥集
    pub fn rsa_pems(pems: &HashMap<String, String>) -> Result<Self, IdentityError> {
        let keys = pems
            .iter()
            .map(|(kid, pem)| {
                DecodingKey::from_rsa_pem(pem.as_bytes())
                    .map(|key| (kid.clone(), key))
                    .map_err(|e| IdentityError::Configuration(format!("公钥 {kid} 无效: {e}")))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;

        if keys.is_empty() {
            return Err(IdentityError::Configuration("公钥集为空".to_string()));
        }
        Ok(Self::Rsa(keys))
    }

    /// 从 JSON 文件（`{"kid": "-----BEGIN PUBLIC KEY-----..."}`）加载 RS256 公钥集
    pub fn rsa_pem_file(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            IdentityError::Configuration(format!("读取公钥文件失败 {}: {e}", path.display()))
        })?;
        let pems: HashMap<String, String> = serde_json::from_str(&json)
            .map_err(|e| IdentityError::Configuration(format!("公钥文件格式错误: {e}")))?;
        Self::rsa_pems(&pems)
    }

    fn algorithm(&self) -> Algorithm {
        match self {
            Self::Shared(_) => Algorithm::HS256,
            Self::Rsa(_) => Algorithm::RS256,
        }
    }
}

/// 基于 jsonwebtoken 的 ID Token 校验器
pub struct JwtIdentityVerifier {
    keys: VerifyingKeys,
    validation: Validation,
}

impl JwtIdentityVerifier {
    pub fn new(keys: VerifyingKeys, issuer: &str, audience: &str, leeway_seconds: u64) -> Self {
        let mut validation = Validation::new(keys.algorithm());
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = leeway_seconds;

        Self { keys, validation }
    }

    /// 按配置构建：优先 HS256 共享密钥，其次 RS256 公钥文件
    pub fn from_config(config: &AuthConfig) -> Result<Self, IdentityError> {
        let keys = if let Some(secret) = &config.hs256_secret {
            VerifyingKeys::shared_secret(secret)
        } else if let Some(path) = &config.rs256_public_keys_path {
            VerifyingKeys::rsa_pem_file(path)?
        } else {
            return Err(IdentityError::Configuration(
                "未配置 hs256_secret 或 rs256_public_keys_path".to_string(),
            ));
        };

        Ok(Self::new(
            keys,
            &config.issuer,
            &config.audience,
            config.leeway_seconds,
        ))
    }

    fn decoding_key(&self, token: &str) -> Result<&DecodingKey, IdentityError> {
        match &self.keys {
            VerifyingKeys::Shared(key) => Ok(key),
            VerifyingKeys::Rsa(keys) => {
                let header =
                    decode_header(token).map_err(|e| IdentityError::Invalid(e.to_string()))?;
                let kid = header
                    .kid
                    .ok_or_else(|| IdentityError::Invalid("缺少 kid".to_string()))?;
                keys.get(&kid).ok_or(IdentityError::UnknownKey(kid))
            }
        }
    }
}

impl IdentityVerifier for JwtIdentityVerifier {
    fn verify(&self, token: &str) -> Result<CallerIdentity, IdentityError> {
        let key = self.decoding_key(token)?;

        let token_data = decode::<IdTokenClaims>(token, key, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => IdentityError::Expired,
                _ => IdentityError::Invalid(e.to_string()),
            }
        })?;

        if token_data.claims.sub.is_empty() {
            return Err(IdentityError::Invalid("sub 为空".to_string()));
        }

        Ok(token_data.claims.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &str = "unit-test-secret";
    const ISSUER: &str = "https://securetoken.google.com/jobs4dent";
    const AUDIENCE: &str = "jobs4dent";

    fn verifier() -> JwtIdentityVerifier {
        JwtIdentityVerifier::new(VerifyingKeys::shared_secret(SECRET), ISSUER, AUDIENCE, 0)
    }

    fn sign(claims: &IdTokenClaims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn claims(sub: &str, exp_offset_secs: i64) -> IdTokenClaims {
        let now = Utc::now();
        IdTokenClaims {
            sub: sub.to_string(),
            email: Some("clinic@example.com".to_string()),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(exp_offset_secs)).timestamp(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
        }
    }

    #[test]
    fn test_verify_valid_token() {
        let token = sign(&claims("uid-1", 3600));
        let identity = verifier().verify(&token).unwrap();
        assert_eq!(identity.uid, "uid-1");
        assert_eq!(identity.email.as_deref(), Some("clinic@example.com"));
    }

    #[test]
    fn test_verify_expired_token() {
        let token = sign(&claims("uid-1", -3600));
        assert!(matches!(verifier().verify(&token), Err(IdentityError::Expired)));
    }

    #[test]
    fn test_verify_wrong_audience() {
        let mut c = claims("uid-1", 3600);
        c.aud = "other-project".to_string();
        assert!(matches!(
            verifier().verify(&sign(&c)),
            Err(IdentityError::Invalid(_))
        ));
    }

    #[test]
    fn test_verify_wrong_issuer() {
        let mut c = claims("uid-1", 3600);
        c.iss = "https://evil.example.com".to_string();
        assert!(verifier().verify(&sign(&c)).is_err());
    }

    #[test]
    fn test_verify_empty_subject() {
        let token = sign(&claims("", 3600));
        assert!(matches!(verifier().verify(&token), Err(IdentityError::Invalid(_))));
    }

    #[test]
    fn test_verify_garbage() {
        assert!(verifier().verify("invalid.token.here").is_err());
    }

    #[test]
    fn test_rsa_keys_reject_invalid_pem() {
        let mut pems = HashMap::new();
        pems.insert("kid-1".to_string(), "not a pem".to_string());
        assert!(matches!(
            VerifyingKeys::rsa_pems(&pems),
            Err(IdentityError::Configuration(_))
        ));
    }

    #[test]
    fn test_rsa_keys_reject_empty_set() {
        assert!(VerifyingKeys::rsa_pems(&HashMap::new()).is_err());
    }

    #[test]
    fn test_from_config_requires_key_material() {
        let config = AuthConfig::default();
        assert!(matches!(
            JwtIdentityVerifier::from_config(&config),
            Err(IdentityError::Configuration(_))
        ));
    }

    #[test]
    fn test_from_config_with_secret() {
        let config = AuthConfig {
            hs256_secret: Some(SECRET.to_string()),
            issuer: ISSUER.to_string(),
            audience: AUDIENCE.to_string(),
            ..Default::default()
        };
        let verifier = JwtIdentityVerifier::from_config(&config).unwrap();
        let identity = verifier.verify(&sign(&claims("uid-2", 3600))).unwrap();
        assert_eq!(identity.uid, "uid-2");
    }
}
