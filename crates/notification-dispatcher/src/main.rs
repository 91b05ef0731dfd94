//! 求职申请推送中继服务
//!
//! 对外暴露 sendJobApplicationNotification 可调用接口，将诊所端的推送请求多播到申请者设备。

use std::sync::Arc;
use std::time::Duration;

use axum::{http::HeaderValue, middleware};
use notification_dispatcher::{
    NotificationDispatcher,
    auth::{IdentityVerifier, JwtIdentityVerifier, VerifyingKeys},
    routes, sender,
    state::AppState,
    templates::Locale,
};
use notify_shared::{
    config::AppConfig,
    observability::{self, middleware as obs_middleware},
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::{info, warn};

const SERVICE_NAME: &str = "notification-dispatcher";

/// 开发环境默认的 HS256 密钥，仅用于本地联调
const DEV_HS256_SECRET: &str = "jobs4dent-dev-secret-change-in-production";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;

    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        region = %config.functions.region,
        "Starting {} on {}",
        SERVICE_NAME,
        config.server_addr()
    );

    let push_service = sender::from_config(&config.messaging)?;
    info!(provider = push_service.provider(), "推送服务已初始化");

    let verifier = build_verifier(&config)?;

    let locale = config.functions.locale.parse::<Locale>().unwrap_or_else(|e| {
        warn!(error = %e, "无法识别的 locale，使用默认英文文案");
        Locale::default()
    });

    let dispatcher = Arc::new(NotificationDispatcher::new(push_service, locale));
    let state = AppState::new(dispatcher, verifier, config.functions.region.clone());

    let app = routes::app(state)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_seconds,
        )))
        .layer(build_cors(&config))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id));

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");

    Ok(())
}

/// 构建调用方身份校验器
///
/// 未配置任何密钥时，开发环境回退到默认 HS256 密钥，生产环境直接报错。
fn build_verifier(config: &AppConfig) -> anyhow::Result<Arc<dyn IdentityVerifier>> {
    let auth = &config.auth;
    if auth.hs256_secret.is_some() || auth.rs256_public_keys_path.is_some() {
        return Ok(Arc::new(JwtIdentityVerifier::from_config(auth)?));
    }

    if config.is_production() {
        anyhow::bail!("生产环境必须配置 auth.hs256_secret 或 auth.rs256_public_keys_path");
    }

    warn!("Using default HS256 secret - set NOTIFY_AUTH__HS256_SECRET for production");
    Ok(Arc::new(JwtIdentityVerifier::new(
        VerifyingKeys::shared_secret(DEV_HS256_SECRET),
        &auth.issuer,
        &auth.audience,
        auth.leeway_seconds,
    )))
}

/// CORS 配置：`cors_origins` 为 "*" 时全部放行，否则按逗号分隔的来源列表放行
fn build_cors(config: &AppConfig) -> CorsLayer {
    let allowed_origins = config.server.cors_origins.as_str();

    if allowed_origins == "*" {
        if config.is_production() {
            warn!("cors_origins=\"*\" 在生产环境中不安全，请设置为具体域名");
        }
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    info!("CORS allowed_origins: {}", allowed_origins);
    let origins: Vec<_> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// 监听关闭信号
///
/// Cloud Run / K8s 通过 SIGTERM 通知实例停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
