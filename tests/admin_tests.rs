use axum::{
    body::{to_bytes, Body},
    http::{header::AUTHORIZATION, Method, Request, StatusCode},
    response::Response,
    Router,
};
use ruleproxy::{
    admin::build_admin_router,
    config::{Config, TcpForwarderConfig},
    logger::LogRouter,
    supervisor::{ForwarderSupervisor, SharedSupervisor},
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

// 测试环境：管理路由加上它背后的监管器
struct TestApp {
    router: Router,
    supervisor: SharedSupervisor,
    _logs: TempDir,
}

impl TestApp {
    fn new(token: Option<&str>) -> Self {
        let logs = tempdir().unwrap();
        let log = Arc::new(LogRouter::new(logs.path(), &[]).unwrap());
        let config = Config {
            tcp_forwarders: vec![TcpForwarderConfig {
                name: "web".to_string(),
                address: Some("127.0.0.1".to_string()),
                port: 0,
                distant_address: "127.0.0.1".to_string(),
                distant_port: 9,
                buffer_size: 4096,
            }],
            ..Config::default()
        };
        let supervisor = ForwarderSupervisor::new(config, log).into_shared();
        let router = build_admin_router(
            supervisor.clone(),
            token.map(str::to_string),
            Duration::from_secs(5),
        );
        Self {
            router,
            supervisor,
            _logs: logs,
        }
    }

    // 发送请求，可选携带 Bearer 令牌
    async fn send(&self, method: Method, path: &str, token: Option<&str>) -> Response {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = builder.body(Body::empty()).unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, path: &str) -> Response {
        self.send(Method::GET, path, None).await
    }

    async fn post(&self, path: &str) -> Response {
        self.send(Method::POST, path, None).await
    }
}

async fn json_body(response: Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// 测试健康检查
#[tokio::test]
async fn test_health() {
    let app = TestApp::new(None);
    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"OK");
}

/// 测试指标导出
#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::new(None);
    // 只有出现过的标签组合才会被导出
    ruleproxy::METRICS
        .relay_connections_total()
        .with_label_values(&["admin-test", "tcp"])
        .inc();

    let response = app.get("/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("ruleproxy_relay_connections_total"));
    assert!(text.contains("admin-test"));
}

/// 测试启动、列出、停止的完整流程，且启动与停止都是幂等的
#[tokio::test]
async fn test_start_list_stop() {
    let app = TestApp::new(None);

    let response = app.get("/api/v1/forwarders").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    let response = app.post("/api/v1/start").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Started 1 forwarder(s)");

    let response = app.post("/api/v1/start").await;
    let body = json_body(response).await;
    assert_eq!(body["message"], "Forwarders already running");

    let body = json_body(app.get("/api/v1/forwarders").await).await;
    let forwarders = body["data"].as_array().unwrap();
    assert_eq!(forwarders.len(), 1);
    assert_eq!(forwarders[0]["name"], "web");
    assert_eq!(forwarders[0]["kind"], "tcp");
    assert_eq!(forwarders[0]["target"], "127.0.0.1:9");
    assert!(forwarders[0]["endpoint"].is_string());

    let body = json_body(app.post("/api/v1/stop").await).await;
    assert_eq!(body["message"], "Stopped 1 forwarder(s)");
    let body = json_body(app.post("/api/v1/stop").await).await;
    assert_eq!(body["message"], "Forwarders already stopped");

    assert!(!app.supervisor.lock().await.is_running());
}

/// 测试没有配置文件路径时重启沿用当前配置
#[tokio::test]
async fn test_restart_without_config_path() {
    let app = TestApp::new(None);
    app.post("/api/v1/start").await;

    let response = app.post("/api/v1/restart").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Restarted 1 forwarder(s)");

    app.post("/api/v1/stop").await;
}

/// 测试切换抓包开关
#[tokio::test]
async fn test_toggle_dump() {
    let app = TestApp::new(None);

    let body = json_body(app.post("/api/v1/dump").await).await;
    assert_eq!(body["data"]["enabled"], true);
    assert!(app.supervisor.lock().await.log().dump_enabled());

    let body = json_body(app.post("/api/v1/dump").await).await;
    assert_eq!(body["data"]["enabled"], false);
    assert_eq!(body["message"], "Dump capture disabled");
}

/// 测试配置了令牌时 API 需要认证，健康检查不需要
#[tokio::test]
async fn test_bearer_token_required() {
    let app = TestApp::new(Some("s3cret"));

    let response = app.get("/api/v1/forwarders").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["type"], "Unauthorized");

    let response = app
        .send(Method::GET, "/api/v1/forwarders", Some("wrong"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(Method::GET, "/api/v1/forwarders", Some("s3cret"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(app.get("/health").await.status(), StatusCode::OK);
}

/// 测试未知路径返回 404
#[tokio::test]
async fn test_unknown_route() {
    let app = TestApp::new(None);
    assert_eq!(app.get("/api/v1/nope").await.status(), StatusCode::NOT_FOUND);
}
