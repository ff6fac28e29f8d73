use crate::api::v1::routes::api_routes;
use crate::config::AdminConfig;
use crate::error::AppError;
use crate::metrics::METRICS;
use crate::supervisor::SharedSupervisor;
use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_graceful_shutdown::{IntoSubsystem, SubsystemHandle};
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

/// 构建管理服务路由：健康检查、指标和 API v1
pub fn build_admin_router(
    supervisor: SharedSupervisor,
    token: Option<String>,
    timeout: Duration,
) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_routes(supervisor, token))
        .layer(TimeoutLayer::new(timeout))
}

// 管理服务
pub struct AdminServer {
    // 监听地址
    addr: SocketAddr,
    // 管理配置
    config: AdminConfig,
    // 转发器监管器
    supervisor: SharedSupervisor,
}

impl AdminServer {
    pub fn new(config: AdminConfig, supervisor: SharedSupervisor) -> Result<Self, AppError> {
        let addr = format!("{}:{}", config.address, config.port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid admin server address: {}", e)))?;
        Ok(Self {
            addr,
            config,
            supervisor,
        })
    }

    #[inline]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl IntoSubsystem<AppError> for AdminServer {
    async fn run(self, subsys: SubsystemHandle) -> Result<(), AppError> {
        let app = build_admin_router(
            self.supervisor.clone(),
            self.config.token.clone(),
            Duration::from_secs(self.config.timeout),
        );

        // 绑定TCP监听器
        let listener = match TcpListener::bind(self.addr).await {
            Ok(listener) => {
                info!("Admin service listening on {}", self.addr);
                listener
            }
            Err(e) => {
                error!("Failed to bind admin service: {}", e);
                return Err(AppError::Io(e));
            }
        };

        // 使用tokio::select!监听服务器和关闭信号
        tokio::select! {
            result = axum::serve(listener, app) => {
                if let Err(e) = result {
                    error!("Admin service error: {}", e);
                } else {
                    info!("Admin service completed normally");
                }
                Ok(())
            }
            _ = subsys.on_shutdown_requested() => {
                info!("Shutdown requested, stopping admin service");
                Ok(())
            }
        }
    }
}

// 健康检查处理程序
async fn health_handler() -> &'static str {
    "OK"
}

// 指标处理函数
async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = METRICS.registry().gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match String::from_utf8(buffer) {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Metrics UTF-8 conversion failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
