use crate::{
    api::v1::models::{ApiResponse, DumpState},
    supervisor::{ActiveForwarder, SharedSupervisor},
};
use axum::{
    extract::State,
    response::{IntoResponse, Response},
};
use tracing::info;

/// 启动尚未运行的转发器；全部已在运行时报告成功
pub async fn start(State(supervisor): State<SharedSupervisor>) -> Response {
    let mut supervisor = supervisor.lock().await;
    if supervisor.is_running() && supervisor.pending_count() == 0 {
        return ApiResponse::success_with_data(
            supervisor.list_active(),
            "Forwarders already running",
        )
        .into_response();
    }

    info!("API: start requested");
    match supervisor.start_all().await {
        Ok(count) => ApiResponse::success_with_data(
            supervisor.list_active(),
            format!("Started {} forwarder(s)", count),
        )
        .into_response(),
        Err(e) => ApiResponse::from(e).into_response(),
    }
}

/// 停止全部转发器；已停止时报告成功
pub async fn stop(State(supervisor): State<SharedSupervisor>) -> Response {
    info!("API: stop requested");
    let count = supervisor.lock().await.stop_all().await;
    let message = if count == 0 {
        "Forwarders already stopped".to_string()
    } else {
        format!("Stopped {} forwarder(s)", count)
    };
    ApiResponse::success(message).into_response()
}

/// 重新加载配置并重启全部转发器
pub async fn restart(State(supervisor): State<SharedSupervisor>) -> Response {
    info!("API: restart requested");
    let mut supervisor = supervisor.lock().await;
    match supervisor.restart().await {
        Ok(count) => ApiResponse::success_with_data(
            supervisor.list_active(),
            format!("Restarted {} forwarder(s)", count),
        )
        .into_response(),
        Err(e) => ApiResponse::from(e).into_response(),
    }
}

/// 切换抓包开关
pub async fn toggle_dump(State(supervisor): State<SharedSupervisor>) -> ApiResponse<DumpState> {
    let enabled = supervisor.lock().await.toggle_dump();
    ApiResponse::success_with_data(
        DumpState { enabled },
        if enabled {
            "Dump capture enabled"
        } else {
            "Dump capture disabled"
        },
    )
}

/// 列出正在运行的转发器
pub async fn list_forwarders(
    State(supervisor): State<SharedSupervisor>,
) -> ApiResponse<Vec<ActiveForwarder>> {
    let active = supervisor.lock().await.list_active();
    let message = format!("{} forwarder(s) running", active.len());
    ApiResponse::success_with_data(active, message)
}
