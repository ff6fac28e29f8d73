use super::{
    events::{EventSink, RelayEvent},
    shutdown,
    utils::{create_udp_socket, ephemeral_bind_addr, resolve_bind_addr},
    RelayContext, RelayState, RelayStatus, Running,
};
use crate::{
    config::UdpForwarderConfig,
    error::AppError,
    logger::{EventKind, LogRouter},
    metrics::METRICS,
    r#const::{exchange_labels, forwarder_labels, relay_limits},
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::UdpSocket;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info};

const RECV_BACKOFF: Duration = Duration::from_millis(100);

// 一次交换的结果
enum Outcome {
    Completed(usize),
    Cancelled,
}

/// UDP 转发器
///
/// 每个入站数据报都通过一个临时套接字完成一次"发送-等待一个应答"的交换，
/// 应答从监听套接字回送，因此客户端看到的源地址始终是转发器的绑定地址。
pub struct UdpRelay {
    ctx: Arc<RelayContext>,
    address: Option<String>,
    port: u16,
    state: Mutex<RelayState>,
}

impl UdpRelay {
    pub fn new(
        config: &UdpForwarderConfig,
        log: Option<Arc<LogRouter>>,
        events: EventSink,
    ) -> Result<Self, AppError> {
        Ok(Self {
            ctx: Arc::new(RelayContext {
                name: config.name.clone(),
                kind: EventKind::UdpForwarder,
                distant: config.distant()?,
                log,
                events,
            }),
            address: config.local_address().map(str::to_string),
            port: config.port,
            state: Mutex::new(RelayState::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    pub fn distant(&self) -> SocketAddr {
        self.ctx.distant
    }

    pub fn status(&self) -> RelayStatus {
        self.state.lock().status
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().local()
    }

    /// 绑定监听套接字并开始接收数据报，返回实际绑定的地址
    pub async fn start(&self) -> Result<SocketAddr, AppError> {
        {
            let mut state = self.state.lock();
            match state.status {
                RelayStatus::Listening => {
                    if let Some(local) = state.local() {
                        return Ok(local);
                    }
                }
                RelayStatus::Starting => {
                    return Err(AppError::AlreadyRunning(format!(
                        "UDP forwarder {:?} is already starting",
                        self.ctx.name
                    )))
                }
                RelayStatus::Stopped => {}
            }
            state.status = RelayStatus::Starting;
        }

        let bound = resolve_bind_addr(self.address.as_deref(), self.port)
            .and_then(create_udp_socket)
            .and_then(|socket| Ok((socket.local_addr()?, socket)));

        let (local, socket) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                self.state.lock().status = RelayStatus::Stopped;
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(receive_loop(
            self.ctx.clone(),
            Arc::new(socket),
            local,
            cancel.clone(),
            tracker.clone(),
        ));

        {
            let mut state = self.state.lock();
            state.status = RelayStatus::Listening;
            state.running = Some(Running {
                local,
                cancel,
                tracker,
            });
        }

        info!(
            "UDP forwarder {:?} listening on {}, forwarding to {}",
            self.ctx.name, local, self.ctx.distant
        );
        self.ctx
            .access(Some(self.ctx.distant), local, "Starting udp forwarder server...")
            .await;
        self.ctx.events.emit(RelayEvent::Listening { local });

        Ok(local)
    }

    /// 停止接收；等待应答的交换被放弃，临时套接字随任务一起释放
    pub async fn stop(&self) -> Result<(), AppError> {
        let running = {
            let mut state = self.state.lock();
            state.status = RelayStatus::Stopped;
            state.running.take()
        };
        let Some(running) = running else {
            return Ok(());
        };

        let local = running.local;
        shutdown(&self.ctx, running).await;
        self.ctx
            .access(Some(self.ctx.distant), local, "Stopping udp forwarder server...")
            .await;
        self.ctx.events.emit(RelayEvent::Stopped { local });
        Ok(())
    }
}

async fn receive_loop(
    ctx: Arc<RelayContext>,
    socket: Arc<UdpSocket>,
    local: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    let mut buf = vec![0u8; relay_limits::MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, client)) => {
                    tracker.spawn(exchange(
                        ctx.clone(),
                        socket.clone(),
                        Bytes::copy_from_slice(&buf[..n]),
                        client,
                        local,
                        cancel.clone(),
                    ));
                }
                Err(e) => {
                    // ICMP 端口不可达等错误会在这里出现，不影响后续数据报
                    error!("UDP forwarder {:?} failed to receive: {}", ctx.name, e);
                    tokio::time::sleep(RECV_BACKOFF).await;
                }
            },
        }
    }
    debug!("UDP forwarder {:?} receive loop exited", ctx.name);
}

async fn exchange(
    ctx: Arc<RelayContext>,
    listener: Arc<UdpSocket>,
    payload: Bytes,
    client: SocketAddr,
    local: SocketAddr,
    cancel: CancellationToken,
) {
    METRICS
        .relay_connections_total()
        .with_label_values(&[&ctx.name, forwarder_labels::UDP])
        .inc();
    ctx.events.emit(RelayEvent::Accepted { client });
    ctx.access(
        Some(client),
        local,
        &format!("FWD {}:{}", ctx.distant.ip(), ctx.distant.port()),
    )
    .await;

    let (label, failure) = match round_trip(&ctx, &listener, &payload, client, &cancel).await {
        Ok(Outcome::Completed(reply)) => {
            ctx.events.emit(RelayEvent::ExchangeCompleted {
                client,
                request: payload.len(),
                reply,
            });
            (exchange_labels::COMPLETED, None)
        }
        Ok(Outcome::Cancelled) => (
            exchange_labels::CANCELLED,
            Some("cancelled while awaiting reply".to_string()),
        ),
        Err(e) => {
            if matches!(e, AppError::Connect(_)) {
                METRICS
                    .relay_connect_errors_total()
                    .with_label_values(&[&ctx.name, forwarder_labels::UDP])
                    .inc();
            }
            ctx.report("UdpRelay::exchange", &e);
            (exchange_labels::FAILED, Some(e.to_string()))
        }
    };

    METRICS
        .udp_exchanges_total()
        .with_label_values(&[&ctx.name, label])
        .inc();
    if let Some(reason) = failure {
        ctx.events
            .emit(RelayEvent::ExchangeFailed { client, reason });
    }
}

// 临时套接字在函数返回时释放，无论成功、失败还是取消
async fn round_trip(
    ctx: &RelayContext,
    listener: &UdpSocket,
    payload: &[u8],
    client: SocketAddr,
    cancel: &CancellationToken,
) -> Result<Outcome, AppError> {
    let outbound = UdpSocket::bind(ephemeral_bind_addr(&ctx.distant))
        .await
        .map_err(|e| AppError::Connect(format!("bind ephemeral socket: {}", e)))?;
    outbound
        .connect(ctx.distant)
        .await
        .map_err(|e| AppError::Connect(format!("{}: {}", ctx.distant, e)))?;
    outbound
        .send(payload)
        .await
        .map_err(|e| AppError::Stream(format!("send to {}: {}", ctx.distant, e)))?;

    let mut reply = vec![0u8; relay_limits::MAX_DATAGRAM_SIZE];
    let n = tokio::select! {
        _ = cancel.cancelled() => return Ok(Outcome::Cancelled),
        received = outbound.recv(&mut reply) => received
            .map_err(|e| AppError::Stream(format!("receive from {}: {}", ctx.distant, e)))?,
    };

    listener
        .send_to(&reply[..n], client)
        .await
        .map_err(|e| AppError::Stream(format!("reply to {}: {}", client, e)))?;

    debug!(
        "UDP forwarder {:?} relayed {} -> {} bytes for {}",
        ctx.name,
        payload.len(),
        n,
        client
    );
    Ok(Outcome::Completed(n))
}
