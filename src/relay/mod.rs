//! TCP/UDP 转发器
//!
//! 每个转发器拥有一个监听器和一个取消令牌；每个连接（或数据报交换）都是独立的任务，
//! 彼此不共享可变状态。停止时先取消令牌，再在有限时间内等待在途任务结束。

mod events;
mod tcp;
mod udp;
pub mod utils;

pub use events::{Direction, EventSink, RelayEvent};
pub use tcp::TcpRelay;
pub use udp::UdpRelay;

pub(crate) use tcp::copy_loop;

use crate::{
    error::AppError,
    logger::{EventKind, LogRouter},
    r#const::relay_limits,
};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::time::timeout;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

/// 转发器运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayStatus {
    Stopped,
    Starting,
    Listening,
}

// 正在运行的监听器句柄
struct Running {
    local: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

// 转发器的生命周期状态
struct RelayState {
    status: RelayStatus,
    running: Option<Running>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self {
            status: RelayStatus::Stopped,
            running: None,
        }
    }
}

impl RelayState {
    // 已绑定的地址（仅在监听中时有值）
    fn local(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local)
    }
}

// TCP/UDP 转发器共享的不可变上下文
struct RelayContext {
    name: String,
    kind: EventKind,
    distant: SocketAddr,
    log: Option<Arc<LogRouter>>,
    events: EventSink,
}

impl RelayContext {
    async fn access(&self, client: Option<SocketAddr>, local: SocketAddr, description: &str) {
        if let Some(log) = &self.log {
            log.access(self.kind, client, local, description).await;
        }
    }

    #[track_caller]
    fn report(&self, operation: &str, err: &AppError) {
        match &self.log {
            Some(log) => log.errors().report(operation, err),
            None => warn!("{} failed for forwarder {:?}: {}", operation, self.name, err),
        }
    }
}

// 取消监听并在有限时间内等待在途任务
async fn shutdown(ctx: &RelayContext, running: Running) {
    running.cancel.cancel();
    running.tracker.close();

    if timeout(relay_limits::STOP_GRACE, running.tracker.wait())
        .await
        .is_err()
    {
        warn!(
            "Forwarder {:?} still has {} task(s) running after {:?}, leaving them to finish",
            ctx.name,
            running.tracker.len(),
            relay_limits::STOP_GRACE
        );
    }

    info!("Forwarder {:?} stopped on {}", ctx.name, running.local);
}
