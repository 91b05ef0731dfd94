//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// 服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 单次请求的处理超时（秒），超时由 HTTP 层终止
    pub request_timeout_seconds: u64,
    /// 允许的跨域来源，逗号分隔；"*" 表示全部放行
    pub cors_origins: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_seconds: 60,
            cors_origins: "*".to_string(),
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 可调用函数的部署配置
///
/// region 决定对外暴露的路径前缀，locale 决定通知默认文案的语言。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FunctionsConfig {
    pub region: String,
    pub locale: String,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            region: "asia-southeast1".to_string(),
            locale: "en".to_string(),
        }
    }
}

/// 推送服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// 推送实现：fcm（真实投递）或 log（仅记录日志，用于本地开发）
    pub provider: String,
    /// FCM 所属的项目 ID；为空时从服务账号凭证中读取
    pub project_id: Option<String>,
    /// FCM HTTP v1 API 根地址，测试时可指向本地模拟服务
    pub endpoint: String,
    /// 服务账号 JSON 凭证路径
    pub credentials_path: Option<String>,
    /// 未配置服务账号时，是否从 GCE/Cloud Run 元数据服务获取访问令牌
    pub use_metadata_server: bool,
    /// 直接指定的访问令牌（模拟器 / 测试环境）
    pub access_token: Option<String>,
    pub timeout_ms: u64,
    /// 单次多播中并发发送的 HTTP 请求上限
    pub max_concurrency: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            provider: "fcm".to_string(),
            project_id: None,
            endpoint: "https://fcm.googleapis.com".to_string(),
            credentials_path: None,
            use_metadata_server: false,
            access_token: None,
            timeout_ms: 10_000,
            max_concurrency: 100,
        }
    }
}

/// 调用方身份校验配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// 期望的签发者，例如 https://securetoken.google.com/<project>
    pub issuer: String,
    /// 期望的受众（通常为项目 ID）
    pub audience: String,
    /// HS256 共享密钥
    pub hs256_secret: Option<String>,
    /// RS256 公钥 JSON 文件路径（kid -> PEM）
    pub rs256_public_keys_path: Option<String>,
    /// 时钟偏差容忍（秒）
    pub leeway_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "https://securetoken.google.com/jobs4dent".to_string(),
            audience: "jobs4dent".to_string(),
            hs256_secret: None,
            rs256_public_keys_path: None,
            leeway_seconds: 60,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub server: ServerConfig,
    pub observability: ObservabilityConfig,
    pub functions: FunctionsConfig,
    pub messaging: MessagingConfig,
    pub auth: AuthConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（NOTIFY_ 前缀，层级用双下划线，如 NOTIFY_MESSAGING__PROJECT_ID -> messaging.project_id）
    /// 5. 服务特定端口环境变量（如 NOTIFICATION_DISPATCHER_PORT）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("NOTIFY_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("NOTIFY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: Self = builder.build()?.try_deserialize()?;

        if let Some(port) = Self::service_port_from_env(service_name) {
            config.server.port = port;
        }

        Ok(config)
    }

    /// 服务特定端口的环境变量名
    ///
    /// 将 "notification-dispatcher" 转换为 "NOTIFICATION_DISPATCHER_PORT"
    fn service_port_env_var(service_name: &str) -> String {
        format!("{}_PORT", service_name.to_uppercase().replace('-', "_"))
    }

    fn service_port_from_env(service_name: &str) -> Option<u16> {
        std::env::var(Self::service_port_env_var(service_name))
            .ok()
            .and_then(|v| v.parse().ok())
    }

    /// 获取服务地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.functions.region, "asia-southeast1");
        assert_eq!(config.functions.locale, "en");
        assert_eq!(config.messaging.provider, "fcm");
        assert_eq!(config.messaging.endpoint, "https://fcm.googleapis.com");
    }

    #[test]
    fn test_server_addr() {
        let config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(config.server_addr(), "127.0.0.1:3000");
    }

    #[test]
    fn test_service_port_env_var_name() {
        assert_eq!(
            AppConfig::service_port_env_var("notification-dispatcher"),
            "NOTIFICATION_DISPATCHER_PORT"
        );
    }

    #[test]
    fn test_service_port_from_env() {
        // SAFETY: 使用测试专用的变量名，不与其他测试共享
        unsafe {
            std::env::set_var("PORT_PROBE_SERVICE_PORT", "12345");
        }
        assert_eq!(AppConfig::service_port_from_env("port-probe-service"), Some(12345));
        unsafe {
            std::env::remove_var("PORT_PROBE_SERVICE_PORT");
        }
        assert_eq!(AppConfig::service_port_from_env("port-probe-service"), None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(
                "[functions]\nlocale = \"th\"\n[messaging]\nprovider = \"log\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.functions.locale, "th");
        assert_eq!(config.functions.region, "asia-southeast1");
        assert_eq!(config.messaging.provider, "log");
        assert_eq!(config.messaging.max_concurrency, 100);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_json_logs_flag() {
        let mut obs = ObservabilityConfig::default();
        assert!(!obs.json_logs());
        obs.log_format = "JSON".to_string();
        assert!(obs.json_logs());
    }
}
