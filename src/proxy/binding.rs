use super::hooks::{ProxyEngine, ProxyHooks, RequestInfo, ResponseInfo};
use crate::{
    config::{ForwardRuleConfig, HttpProxyConfig},
    error::AppError,
    logger::{Capture, CaptureKind, EventKind, LogRouter},
    relay::utils::resolve_bind_addr,
    selector::{EnvProxyResolver, SystemProxyResolver, Upstream, UpstreamSelector},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{net::SocketAddr, sync::Arc};
use tracing::info;
use url::Url;

/// 绑定交给引擎的钩子：选择上游、写访问日志、抓包
pub struct BindingHooks {
    local: SocketAddr,
    selector: UpstreamSelector,
    log: Arc<LogRouter>,
}

impl BindingHooks {
    pub fn new(local: SocketAddr, selector: UpstreamSelector, log: Arc<LogRouter>) -> Self {
        Self {
            local,
            selector,
            log,
        }
    }
}

#[async_trait]
impl ProxyHooks for BindingHooks {
    async fn choose_upstream(&self, url: &Url, client: SocketAddr) -> Upstream {
        self.selector.select(url, Some(client)).await
    }

    async fn before_request(&self, request: &RequestInfo<'_>) {
        self.log
            .access(
                EventKind::HttpProxy,
                Some(request.client),
                self.local,
                &format!("{} {}", request.method, request.url),
            )
            .await;
    }

    fn wants_capture(&self, url: &Url, client: SocketAddr) -> bool {
        self.log.wants_dump(url, client.ip())
    }

    async fn request_captured(&self, request: &RequestInfo<'_>) {
        self.log
            .dump(&Capture {
                kind: CaptureKind::Request,
                client: request.client.ip(),
                url: request.url,
                head: request.head,
                body: request.body,
            })
            .await;
    }

    async fn response_captured(&self, response: &ResponseInfo<'_>) {
        self.log
            .dump(&Capture {
                kind: CaptureKind::Response,
                client: response.client.ip(),
                url: response.url,
                head: response.head,
                body: response.body,
            })
            .await;
    }

    fn on_error(&self, operation: &str, err: &AppError) {
        self.log.errors().report(operation, err);
    }
}

/// HTTP 代理绑定：一个本地端点加一组上游选择规则
pub struct HttpProxyBinding {
    name: String,
    address: Option<String>,
    port: u16,
    rules: Vec<ForwardRuleConfig>,
    engine: Box<dyn ProxyEngine>,
    log: Arc<LogRouter>,
    system: Arc<dyn SystemProxyResolver>,
    bound: Mutex<Option<SocketAddr>>,
}

impl HttpProxyBinding {
    pub fn new(config: &HttpProxyConfig, engine: Box<dyn ProxyEngine>, log: Arc<LogRouter>) -> Self {
        Self {
            name: config.name.clone(),
            address: config.local_address().map(str::to_string),
            port: config.port,
            rules: config.rules.clone(),
            engine,
            log,
            system: Arc::new(EnvProxyResolver),
            bound: Mutex::new(None),
        }
    }

    pub fn with_system_resolver(mut self, system: Arc<dyn SystemProxyResolver>) -> Self {
        self.system = system;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// 编译规则并启动引擎，返回实际绑定的地址
    pub async fn start(&self) -> Result<SocketAddr, AppError> {
        if let Some(local) = self.local_addr() {
            return Ok(local);
        }

        let local = resolve_bind_addr(self.address.as_deref(), self.port)?;
        let selector = UpstreamSelector::new(self.name.clone(), local, &self.rules)?
            .with_system_resolver(self.system.clone())
            .with_log_router(self.log.clone());
        let hooks = Arc::new(BindingHooks::new(local, selector, self.log.clone()));

        let bound = self.engine.start(local, hooks).await?;
        *self.bound.lock() = Some(bound);

        info!(
            "HTTP proxy {:?} listening on {} with {} rule(s) ({} engine)",
            self.name,
            bound,
            self.rules.len(),
            self.engine.as_str()
        );
        self.log
            .access(EventKind::HttpProxy, Some(bound), bound, "Starting proxy server...")
            .await;
        Ok(bound)
    }

    /// 停止引擎；未运行时什么也不做
    pub async fn stop(&self) -> Result<(), AppError> {
        let bound = self.bound.lock().take();
        let Some(bound) = bound else {
            return Ok(());
        };

        self.engine.stop().await?;
        self.log
            .access(EventKind::HttpProxy, Some(bound), bound, "Stopping proxy server...")
            .await;
        Ok(())
    }
}
