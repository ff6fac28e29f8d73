use super::{
    capture::{BodyCapture, BodyEnd},
    head::{read_head, RequestHead},
    hooks::{ProxyEngine, ProxyEngineFactory, ProxyHooks, RequestInfo, ResponseInfo},
};
use crate::{
    error::AppError,
    r#const::{proxy_engine, relay_limits},
    relay::{copy_loop, utils::create_tcp_listener},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    io::AsyncWriteExt,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};
use url::Url;

const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";
const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n";
const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\nConnection: close\r\n\r\n";

struct EngineRunning {
    local: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// 内置的显式 HTTP 代理
///
/// 支持 CONNECT 隧道和绝对形式的请求；不终止 TLS，HTTPS 内容原样透传。
#[derive(Default)]
pub struct TunnelEngine {
    running: Mutex<Option<EngineRunning>>,
}

impl TunnelEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProxyEngine for TunnelEngine {
    async fn start(
        &self,
        local: SocketAddr,
        hooks: Arc<dyn ProxyHooks>,
    ) -> Result<SocketAddr, AppError> {
        let mut running = self.running.lock();
        if let Some(running) = running.as_ref() {
            return Ok(running.local);
        }

        let listener = create_tcp_listener(local, relay_limits::LISTEN_BACKLOG)?;
        let bound = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(accept_loop(
            listener,
            hooks,
            cancel.clone(),
            tracker.clone(),
        ));

        *running = Some(EngineRunning {
            local: bound,
            cancel,
            tracker,
        });
        info!("HTTP proxy engine listening on {}", bound);
        Ok(bound)
    }

    async fn stop(&self) -> Result<(), AppError> {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return Ok(());
        };

        running.cancel.cancel();
        running.tracker.close();
        if timeout(relay_limits::STOP_GRACE, running.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "HTTP proxy engine on {} still has {} task(s) running",
                running.local,
                running.tracker.len()
            );
        }
        info!("HTTP proxy engine on {} stopped", running.local);
        Ok(())
    }

    fn as_str(&self) -> &'static str {
        "tunnel"
    }
}

/// 创建 [`TunnelEngine`]
#[derive(Debug, Default, Clone, Copy)]
pub struct TunnelEngineFactory;

impl ProxyEngineFactory for TunnelEngineFactory {
    fn create(&self) -> Box<dyn ProxyEngine> {
        Box::new(TunnelEngine::new())
    }
}

async fn accept_loop(
    listener: TcpListener,
    hooks: Arc<dyn ProxyHooks>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, client)) => {
                    let hooks = hooks.clone();
                    let cancel = cancel.child_token();
                    tracker.spawn(async move {
                        if let Err(e) = handle_client(stream, client, hooks.as_ref(), &cancel).await {
                            hooks.on_error("TunnelEngine::handle_client", &e);
                        }
                    });
                }
                Err(e) => {
                    error!("HTTP proxy engine failed to accept: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            },
        }
    }
}

async fn handle_client(
    mut client_stream: TcpStream,
    client: SocketAddr,
    hooks: &dyn ProxyHooks,
    cancel: &CancellationToken,
) -> Result<(), AppError> {
    let request = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        read = read_head(&mut client_stream, proxy_engine::MAX_HEAD_SIZE) => read?,
    };
    if request.buf.is_empty() {
        return Ok(());
    }

    let parsed = request
        .head_len
        .ok_or_else(|| AppError::Stream("request head incomplete or too large".to_string()))
        .and_then(|_| RequestHead::parse(request.head()))
        .and_then(|head| Ok((head.url()?, head)));
    let (url, head) = match parsed {
        Ok(parsed) => parsed,
        Err(e) => {
            let _ = client_stream.write_all(BAD_REQUEST).await;
            return Err(e);
        }
    };

    hooks
        .before_request(&RequestInfo {
            client,
            method: &head.method,
            url: &url,
            head: request.head(),
            body: &[],
        })
        .await;
    let upstream = hooks.choose_upstream(&url, client).await;

    let (host, port) = upstream.authority();
    let dialed = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        dialed = TcpStream::connect((host, port)) => dialed,
    };
    let mut server_stream = match dialed {
        Ok(stream) => stream,
        Err(e) => {
            let _ = client_stream.write_all(BAD_GATEWAY).await;
            return Err(AppError::Connect(format!(
                "{} via {}: {}:{}: {}",
                url, upstream, host, port, e
            )));
        }
    };
    let _ = server_stream.set_nodelay(true);
    let _ = client_stream.set_nodelay(true);
    let capture = hooks.wants_capture(&url, client);

    if upstream.is_direct() && head.is_connect() {
        client_stream
            .write_all(CONNECT_ESTABLISHED)
            .await
            .map_err(|e| AppError::Stream(format!("reply to {}: {}", client, e)))?;
        let established = ResponseInfo {
            client,
            url: &url,
            head: CONNECT_ESTABLISHED,
            body: &[],
        };
        hooks.before_response(&established).await;
        // 隧道内容不可见，只记录握手
        if capture {
            hooks
                .request_captured(&RequestInfo {
                    client,
                    method: &head.method,
                    url: &url,
                    head: request.head(),
                    body: &[],
                })
                .await;
            hooks.response_captured(&established).await;
        }
        server_stream
            .write_all(request.rest())
            .await
            .map_err(|e| AppError::Stream(format!("write to {}: {}", url, e)))?;

        debug!("Tunnelling {} for {} via {}", url, client, upstream);
        return tunnel(client_stream, server_stream, cancel).await;
    }

    let outgoing = if upstream.is_direct() {
        head.to_origin_form(&url)
    } else {
        head.to_proxy_form(upstream.credentials())
    };
    server_stream
        .write_all(&outgoing)
        .await
        .map_err(|e| AppError::Stream(format!("write to {}: {}", upstream, e)))?;
    server_stream
        .write_all(request.rest())
        .await
        .map_err(|e| AppError::Stream(format!("write to {}: {}", upstream, e)))?;

    let mut request_capture = capture.then(|| {
        BodyCapture::new(
            request.head(),
            BodyEnd::for_request(&head),
            proxy_engine::MAX_CAPTURE_BODY,
        )
    });
    if let Some(captured) = request_capture.as_mut() {
        captured.push(request.rest());
    }

    debug!("Relaying {} for {} via {}", url, client, upstream);
    let cancel = cancel.child_token();
    let (client_read, client_write) = client_stream.into_split();
    let (server_read, server_write) = server_stream.into_split();
    let exchange = Exchange {
        client,
        url: &url,
        method: &head.method,
        hooks,
        capture,
    };

    let ((request_capture, sent), (response_capture, received)) = tokio::join!(
        send_request(client_read, server_write, request_capture, &cancel),
        exchange.relay_response(server_read, client_write, &cancel),
    );

    // 两个方向都结束后依次写出抓包
    if let Some(captured) = request_capture {
        exchange.log_capture("request", &captured);
        hooks
            .request_captured(&RequestInfo {
                client,
                method: &head.method,
                url: &url,
                head: captured.head(),
                body: captured.body(),
            })
            .await;
    }
    if let Some(captured) = response_capture {
        exchange.log_capture("response", &captured);
        hooks
            .response_captured(&ResponseInfo {
                client,
                url: &url,
                head: captured.head(),
                body: captured.body(),
            })
            .await;
    }

    sent.and(received).map(|_| ())
}

// 把客户端的后续字节转发给上游：消息体以及同一连接上的后续请求
async fn send_request(
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    mut capture: Option<BodyCapture>,
    cancel: &CancellationToken,
) -> (Option<BodyCapture>, Result<u64, AppError>) {
    // 客户端半关闭只结束这一方向，响应照常转发
    let sending = cancel.child_token();
    let result = copy_loop(
        reader,
        writer,
        proxy_engine::RELAY_BUFFER_SIZE,
        &sending,
        |chunk| {
            if let Some(captured) = capture.as_mut() {
                captured.push(chunk);
            }
        },
    )
    .await;

    if result.is_err() {
        cancel.cancel();
    }
    (capture, result)
}

// 一次非隧道请求的上下文
struct Exchange<'a> {
    client: SocketAddr,
    url: &'a Url,
    method: &'a str,
    hooks: &'a dyn ProxyHooks,
    capture: bool,
}

impl Exchange<'_> {
    /// 读取上游的第一个响应头交给钩子，然后持续转发响应直到任一方结束
    async fn relay_response(
        &self,
        mut reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
        cancel: &CancellationToken,
    ) -> (Option<BodyCapture>, Result<u64, AppError>) {
        let read = tokio::select! {
            _ = cancel.cancelled() => return (None, Ok(0)),
            read = read_head(&mut reader, proxy_engine::MAX_HEAD_SIZE) => read,
        };
        let response = match read {
            Ok(response) => response,
            Err(e) => {
                cancel.cancel();
                return (None, Err(e));
            }
        };

        let mut capture = None;
        if response.head_len.is_some() {
            self.hooks
                .before_response(&ResponseInfo {
                    client: self.client,
                    url: self.url,
                    head: response.head(),
                    body: response.rest(),
                })
                .await;
            if self.capture {
                let mut captured = BodyCapture::new(
                    response.head(),
                    BodyEnd::for_response(response.head(), self.method),
                    proxy_engine::MAX_CAPTURE_BODY,
                );
                captured.push(response.rest());
                capture = Some(captured);
            }
        }

        if let Err(e) = writer.write_all(&response.buf).await {
            cancel.cancel();
            let err = AppError::Stream(format!("reply to {}: {}", self.client, e));
            return (capture, Err(err));
        }

        let result = copy_loop(
            reader,
            writer,
            proxy_engine::RELAY_BUFFER_SIZE,
            cancel,
            |chunk| {
                if let Some(captured) = capture.as_mut() {
                    captured.push(chunk);
                }
            },
        )
        .await;
        (capture, result)
    }

    fn log_capture(&self, what: &str, captured: &BodyCapture) {
        debug!(
            "Captured {} of {} for {}: {} body byte(s), complete: {}, truncated: {}",
            what,
            self.url,
            self.client,
            captured.body().len(),
            captured.is_complete(),
            captured.is_truncated()
        );
    }
}

async fn tunnel(
    client_stream: TcpStream,
    server_stream: TcpStream,
    cancel: &CancellationToken,
) -> Result<(), AppError> {
    let cancel = cancel.child_token();
    let (client_read, client_write) = client_stream.into_split();
    let (server_read, server_write) = server_stream.into_split();

    let (upstream, downstream) = tokio::join!(
        copy_loop(
            client_read,
            server_write,
            proxy_engine::RELAY_BUFFER_SIZE,
            &cancel,
            |_| {}
        ),
        copy_loop(
            server_read,
            client_write,
            proxy_engine::RELAY_BUFFER_SIZE,
            &cancel,
            |_| {}
        ),
    );
    upstream.and(downstream).map(|_| ())
}
