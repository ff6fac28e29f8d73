use crate::api::v1::{auth::auth_middleware, handlers};
use crate::supervisor::SharedSupervisor;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub const START_PATH: &str = "/start";
pub const STOP_PATH: &str = "/stop";
pub const RESTART_PATH: &str = "/restart";
pub const DUMP_PATH: &str = "/dump";
pub const FORWARDERS_PATH: &str = "/forwarders";

/// 创建API v1路由
pub fn api_routes(supervisor: SharedSupervisor, token: Option<String>) -> Router {
    let token: Option<Arc<str>> = token.filter(|t| !t.is_empty()).map(Arc::from);

    Router::new()
        .route(START_PATH, post(handlers::start))
        .route(STOP_PATH, post(handlers::stop))
        .route(RESTART_PATH, post(handlers::restart))
        .route(DUMP_PATH, post(handlers::toggle_dump))
        .route(FORWARDERS_PATH, get(handlers::list_forwarders))
        .with_state(supervisor)
        .layer(middleware::from_fn_with_state(token, auth_middleware))
}
