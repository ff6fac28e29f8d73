// API v1 模块
pub mod auth;
pub mod handlers;
pub mod models;
pub mod routes;

// 重新导出常用类型
pub use self::models::{ApiResponse, DumpState, ErrorDetail};
pub use self::routes::api_routes;
