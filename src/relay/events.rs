use std::{fmt, net::SocketAddr};
use tokio::sync::mpsc::UnboundedSender;

/// 中继方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::ClientToServer => crate::r#const::direction_labels::CLIENT_TO_SERVER,
            Direction::ServerToClient => crate::r#const::direction_labels::SERVER_TO_CLIENT,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::ClientToServer => "client -> server",
            Direction::ServerToClient => "server -> client",
        })
    }
}

/// 中继生命周期事件，每个里程碑发送一次
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// 监听器已就绪
    Listening { local: SocketAddr },
    /// 接受了一个客户端连接（TCP）或数据报（UDP）
    Accepted { client: SocketAddr },
    /// 一次写入完成
    Forwarded {
        client: SocketAddr,
        direction: Direction,
        bytes: usize,
    },
    /// TCP 连接的两个方向都已结束
    Closed { client: SocketAddr },
    /// 拨号远端失败
    ConnectFailed { client: SocketAddr, reason: String },
    /// UDP 交换完成，应答已回送
    ExchangeCompleted {
        client: SocketAddr,
        request: usize,
        reply: usize,
    },
    /// UDP 交换失败或被取消
    ExchangeFailed { client: SocketAddr, reason: String },
    /// 监听器已停止
    Stopped { local: SocketAddr },
}

/// 事件发送端，未订阅时什么也不做
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<RelayEvent>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<RelayEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    #[inline]
    pub fn emit(&self, event: RelayEvent) {
        if let Some(tx) = &self.tx {
            // 订阅方已经离开时丢弃事件
            let _ = tx.send(event);
        }
    }

    #[inline]
    pub fn is_subscribed(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}
