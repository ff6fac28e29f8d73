use super::{
    events::{Direction, EventSink, RelayEvent},
    shutdown,
    utils::{create_tcp_listener, resolve_bind_addr},
    RelayContext, RelayState, RelayStatus, Running,
};
use crate::{
    config::TcpForwarderConfig,
    error::AppError,
    logger::{EventKind, LogRouter},
    metrics::METRICS,
    r#const::{forwarder_labels, relay_limits},
};
use parking_lot::Mutex;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info};

// accept 出错后的退避时间
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// 单向复制：从 reader 读取，原样写入 writer
///
/// 每次只写入实际读到的字节数，写入成功后把这段字节交给 `on_chunk`；
/// 读到 0 字节、任一方向出错或令牌被取消时结束。
/// 结束时关闭 writer 的写方向，并取消令牌，让另一方向的复制随之结束。
pub(crate) async fn copy_loop<R, W, F>(
    mut reader: R,
    mut writer: W,
    buffer_size: usize,
    cancel: &CancellationToken,
    mut on_chunk: F,
) -> Result<u64, AppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(&[u8]),
{
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;

    let result = loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break Ok(total),
            read = reader.read(&mut buf) => match read {
                Ok(0) => break Ok(total),
                Ok(n) => n,
                Err(e) => break Err(AppError::Stream(format!("read failed: {}", e))),
            },
        };

        tokio::select! {
            _ = cancel.cancelled() => break Ok(total),
            written = writer.write_all(&buf[..n]) => {
                if let Err(e) = written {
                    break Err(AppError::Stream(format!("write failed: {}", e)));
                }
            }
        }

        total += n as u64;
        on_chunk(&buf[..n]);
    };

    let _ = writer.shutdown().await;
    cancel.cancel();
    result
}

/// TCP 转发器
///
/// 每个接受的连接都会拨号远端，然后启动两个复制任务，共享一个属于该连接的取消令牌。
pub struct TcpRelay {
    ctx: Arc<RelayContext>,
    // 配置的监听地址，None 表示本机出口地址
    address: Option<String>,
    port: u16,
    buffer_size: usize,
    state: Mutex<RelayState>,
}

impl TcpRelay {
    pub fn new(
        config: &TcpForwarderConfig,
        log: Option<Arc<LogRouter>>,
        events: EventSink,
    ) -> Result<Self, AppError> {
        Ok(Self {
            ctx: Arc::new(RelayContext {
                name: config.name.clone(),
                kind: EventKind::TcpForwarder,
                distant: config.distant()?,
                log,
                events,
            }),
            address: config.local_address().map(str::to_string),
            port: config.port,
            buffer_size: config.buffer_size,
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

    /// 已绑定的本地地址，未运行时为 None
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().local()
    }

    /// 绑定并开始接受连接，返回实际绑定的地址
    ///
    /// 已在监听时直接返回当前地址。
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
                        "TCP forwarder {:?} is already starting",
                        self.ctx.name
                    )))
                }
                RelayStatus::Stopped => {}
            }
            state.status = RelayStatus::Starting;
        }

        let bound = resolve_bind_addr(self.address.as_deref(), self.port)
            .and_then(|addr| create_tcp_listener(addr, relay_limits::LISTEN_BACKLOG))
            .and_then(|listener| Ok((listener.local_addr()?, listener)));

        let (local, listener) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                self.state.lock().status = RelayStatus::Stopped;
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(accept_loop(
            self.ctx.clone(),
            listener,
            local,
            self.buffer_size,
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
            "TCP forwarder {:?} listening on {}, forwarding to {}",
            self.ctx.name, local, self.ctx.distant
        );
        self.ctx
            .access(Some(self.ctx.distant), local, "Starting tcp forwarder server...")
            .await;
        self.ctx.events.emit(RelayEvent::Listening { local });

        Ok(local)
    }

    /// 停止监听；已停止时什么也不做
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
            .access(Some(self.ctx.distant), local, "Stopping tcp forwarder server...")
            .await;
        self.ctx.events.emit(RelayEvent::Stopped { local });
        Ok(())
    }
}

async fn accept_loop(
    ctx: Arc<RelayContext>,
    listener: TcpListener,
    local: SocketAddr,
    buffer_size: usize,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, client)) => {
                    tracker.spawn(handle_connection(
                        ctx.clone(),
                        stream,
                        client,
                        local,
                        buffer_size,
                        cancel.child_token(),
                        tracker.clone(),
                    ));
                }
                Err(e) => {
                    error!("TCP forwarder {:?} failed to accept: {}", ctx.name, e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    debug!("TCP forwarder {:?} accept loop exited", ctx.name);
}

async fn handle_connection(
    ctx: Arc<RelayContext>,
    client_stream: TcpStream,
    client: SocketAddr,
    local: SocketAddr,
    buffer_size: usize,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    METRICS
        .relay_connections_total()
        .with_label_values(&[&ctx.name, forwarder_labels::TCP])
        .inc();
    ctx.events.emit(RelayEvent::Accepted { client });
    ctx.access(
        Some(client),
        local,
        &format!("FWD {}:{}", ctx.distant.ip(), ctx.distant.port()),
    )
    .await;

    let dialed = tokio::select! {
        _ = cancel.cancelled() => return,
        dialed = TcpStream::connect(ctx.distant) => dialed,
    };
    let server_stream = match dialed {
        Ok(stream) => stream,
        Err(e) => {
            METRICS
                .relay_connect_errors_total()
                .with_label_values(&[&ctx.name, forwarder_labels::TCP])
                .inc();
            let err = AppError::Connect(format!("{} -> {}: {}", client, ctx.distant, e));
            ctx.events.emit(RelayEvent::ConnectFailed {
                client,
                reason: err.to_string(),
            });
            ctx.report("TcpRelay::dial", &err);
            return;
        }
    };

    let _ = client_stream.set_nodelay(true);
    let _ = server_stream.set_nodelay(true);
    debug!(
        "TCP forwarder {:?} relaying {} <-> {}",
        ctx.name, client, ctx.distant
    );

    let active = METRICS
        .relay_active_connections()
        .with_label_values(&[&ctx.name]);
    active.inc();

    let (client_read, client_write) = client_stream.into_split();
    let (server_read, server_write) = server_stream.into_split();

    let upstream = tracker.spawn(pipe(
        ctx.clone(),
        client_read,
        server_write,
        client,
        Direction::ClientToServer,
        buffer_size,
        cancel.clone(),
    ));
    let downstream = tracker.spawn(pipe(
        ctx.clone(),
        server_read,
        client_write,
        client,
        Direction::ServerToClient,
        buffer_size,
        cancel,
    ));
    let _ = tokio::join!(upstream, downstream);

    active.dec();
    ctx.events.emit(RelayEvent::Closed { client });
    debug!("TCP forwarder {:?} closed connection from {}", ctx.name, client);
}

async fn pipe<R, W>(
    ctx: Arc<RelayContext>,
    reader: R,
    writer: W,
    client: SocketAddr,
    direction: Direction,
    buffer_size: usize,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let bytes = METRICS
        .relay_bytes_total()
        .with_label_values(&[&ctx.name, direction.label()]);

    let result = copy_loop(reader, writer, buffer_size, &cancel, |chunk| {
        bytes.inc_by(chunk.len() as f64);
        ctx.events.emit(RelayEvent::Forwarded {
            client,
            direction,
            bytes: chunk.len(),
        });
    })
    .await;

    match result {
        Ok(total) => debug!(
            "TCP forwarder {:?} {} ({}) finished after {} bytes",
            ctx.name, direction, client, total
        ),
        Err(e) => ctx.report("TcpRelay::pipe", &e),
    }
}
