use crate::{
    config::Config,
    error::AppError,
    logger::LogRouter,
    proxy::{HttpProxyBinding, ProxyEngineFactory, TunnelEngineFactory},
    relay::{utils::resolve_bind_addr, EventSink, TcpRelay, UdpRelay},
    selector::{EnvProxyResolver, SystemProxyResolver},
};
use async_trait::async_trait;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Mutex;
use tokio_graceful_shutdown::{IntoSubsystem, SubsystemHandle};
use tracing::{error, info, warn};

/// 多个任务共享的监管器
pub type SharedSupervisor = Arc<Mutex<ForwarderSupervisor>>;

/// 转发器在监管器中的编号，按启动顺序递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ForwarderId(u64);

impl fmt::Display for ForwarderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 转发器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwarderKind {
    HttpProxy,
    Tcp,
    Udp,
}

impl ForwarderKind {
    // HTTP 代理也占用 TCP 端点
    fn is_stream(self) -> bool {
        !matches!(self, ForwarderKind::Udp)
    }
}

/// 正在运行的转发器
pub enum ForwarderInstance {
    HttpProxy(HttpProxyBinding),
    Tcp(TcpRelay),
    Udp(UdpRelay),
}

impl ForwarderInstance {
    pub fn kind(&self) -> ForwarderKind {
        match self {
            ForwarderInstance::HttpProxy(_) => ForwarderKind::HttpProxy,
            ForwarderInstance::Tcp(_) => ForwarderKind::Tcp,
            ForwarderInstance::Udp(_) => ForwarderKind::Udp,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ForwarderInstance::HttpProxy(binding) => binding.name(),
            ForwarderInstance::Tcp(relay) => relay.name(),
            ForwarderInstance::Udp(relay) => relay.name(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            ForwarderInstance::HttpProxy(binding) => binding.local_addr(),
            ForwarderInstance::Tcp(relay) => relay.local_addr(),
            ForwarderInstance::Udp(relay) => relay.local_addr(),
        }
    }

    // 面向操作员的目标描述
    fn target(&self) -> String {
        match self {
            ForwarderInstance::HttpProxy(binding) => format!("{} rule(s)", binding.rule_count()),
            ForwarderInstance::Tcp(relay) => relay.distant().to_string(),
            ForwarderInstance::Udp(relay) => relay.distant().to_string(),
        }
    }

    pub async fn start(&self) -> Result<SocketAddr, AppError> {
        match self {
            ForwarderInstance::HttpProxy(binding) => binding.start().await,
            ForwarderInstance::Tcp(relay) => relay.start().await,
            ForwarderInstance::Udp(relay) => relay.start().await,
        }
    }

    pub async fn stop(&self) -> Result<(), AppError> {
        match self {
            ForwarderInstance::HttpProxy(binding) => binding.stop().await,
            ForwarderInstance::Tcp(relay) => relay.stop().await,
            ForwarderInstance::Udp(relay) => relay.stop().await,
        }
    }
}

/// `list-active` 的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveForwarder {
    pub id: ForwarderId,
    pub name: String,
    pub kind: ForwarderKind,
    pub endpoint: Option<SocketAddr>,
    pub target: String,
}

/// 转发器监管器
///
/// 按配置顺序启动全部转发器，并持有它们直到停止。
pub struct ForwarderSupervisor {
    // 当前配置快照
    config: Arc<Config>,
    // 重启时重新读取的配置文件
    config_path: Option<PathBuf>,
    log: Arc<LogRouter>,
    engine_factory: Arc<dyn ProxyEngineFactory>,
    system: Arc<dyn SystemProxyResolver>,
    events: EventSink,
    next_id: u64,
    instances: BTreeMap<ForwarderId, ForwarderInstance>,
}

impl ForwarderSupervisor {
    pub fn new(config: Config, log: Arc<LogRouter>) -> Self {
        Self {
            config: Arc::new(config),
            config_path: None,
            log,
            engine_factory: Arc::new(TunnelEngineFactory),
            system: Arc::new(EnvProxyResolver),
            events: EventSink::default(),
            next_id: 0,
            instances: BTreeMap::new(),
        }
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_engine_factory(mut self, factory: Arc<dyn ProxyEngineFactory>) -> Self {
        self.engine_factory = factory;
        self
    }

    pub fn with_system_resolver(mut self, system: Arc<dyn SystemProxyResolver>) -> Self {
        self.system = system;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn into_shared(self) -> SharedSupervisor {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn log(&self) -> &Arc<LogRouter> {
        &self.log
    }

    pub fn is_running(&self) -> bool {
        !self.instances.is_empty()
    }

    // 该配置项是否已有运行中的实例
    fn is_started(&self, kind: ForwarderKind, name: &str) -> bool {
        self.instances
            .values()
            .any(|instance| instance.kind() == kind && instance.name() == name)
    }

    /// 配置中尚未运行的转发器数量
    pub fn pending_count(&self) -> usize {
        let config = &self.config;
        let proxies = config
            .http_proxies
            .iter()
            .filter(|p| !self.is_started(ForwarderKind::HttpProxy, &p.name))
            .count();
        let tcp = config
            .tcp_forwarders
            .iter()
            .filter(|f| !self.is_started(ForwarderKind::Tcp, &f.name))
            .count();
        let udp = config
            .udp_forwarders
            .iter()
            .filter(|f| !self.is_started(ForwarderKind::Udp, &f.name))
            .count();
        proxies + tcp + udp
    }

    /// 按配置顺序启动尚未运行的转发器
    ///
    /// 第一个启动失败会中止其余的启动并返回错误，已经启动的转发器保持运行；
    /// 再次调用会从未启动的转发器继续。全部已在运行时直接返回当前数量。
    pub async fn start_all(&mut self) -> Result<usize, AppError> {
        if self.is_running() && self.pending_count() == 0 {
            info!(
                "Forwarders already running ({}), start skipped",
                self.instances.len()
            );
            return Ok(self.instances.len());
        }

        let config = self.config.clone();

        for proxy in &config.http_proxies {
            if self.is_started(ForwarderKind::HttpProxy, &proxy.name) {
                continue;
            }
            let requested = resolve_bind_addr(proxy.local_address(), proxy.port)?;
            self.ensure_endpoint_free(ForwarderKind::HttpProxy, requested)?;
            let binding = HttpProxyBinding::new(proxy, self.engine_factory.create(), self.log.clone())
                .with_system_resolver(self.system.clone());
            self.launch(ForwarderInstance::HttpProxy(binding)).await?;
        }

        for forwarder in &config.tcp_forwarders {
            if self.is_started(ForwarderKind::Tcp, &forwarder.name) {
                continue;
            }
            let requested = resolve_bind_addr(forwarder.local_address(), forwarder.port)?;
            self.ensure_endpoint_free(ForwarderKind::Tcp, requested)?;
            let relay = TcpRelay::new(forwarder, Some(self.log.clone()), self.events.clone())?;
            self.launch(ForwarderInstance::Tcp(relay)).await?;
        }

        for forwarder in &config.udp_forwarders {
            if self.is_started(ForwarderKind::Udp, &forwarder.name) {
                continue;
            }
            let requested = resolve_bind_addr(forwarder.local_address(), forwarder.port)?;
            self.ensure_endpoint_free(ForwarderKind::Udp, requested)?;
            let relay = UdpRelay::new(forwarder, Some(self.log.clone()), self.events.clone())?;
            self.launch(ForwarderInstance::Udp(relay)).await?;
        }

        info!("Started {} forwarder(s)", self.instances.len());
        Ok(self.instances.len())
    }

    // 同一 (端点, 协议) 上只能有一个监听器；端口 0 由系统分配，不会冲突
    fn ensure_endpoint_free(&self, kind: ForwarderKind, requested: SocketAddr) -> Result<(), AppError> {
        if requested.port() == 0 {
            return Ok(());
        }
        let taken = self.instances.values().find(|instance| {
            instance.kind().is_stream() == kind.is_stream()
                && instance.local_addr() == Some(requested)
        });
        match taken {
            Some(instance) => Err(AppError::AlreadyRunning(format!(
                "{} is already bound by forwarder {:?}",
                requested,
                instance.name()
            ))),
            None => Ok(()),
        }
    }

    async fn launch(&mut self, instance: ForwarderInstance) -> Result<ForwarderId, AppError> {
        let local = match instance.start().await {
            Ok(local) => local,
            Err(e) => {
                error!(
                    "Failed to start {:?} forwarder {:?}: {}",
                    instance.kind(),
                    instance.name(),
                    e
                );
                self.log.errors().report("ForwarderSupervisor::start_all", &e);
                return Err(e);
            }
        };

        let id = ForwarderId(self.next_id);
        self.next_id += 1;
        info!(
            "Forwarder {} {:?} ({:?}) running on {}",
            id,
            instance.name(),
            instance.kind(),
            local
        );
        self.instances.insert(id, instance);
        Ok(id)
    }

    /// 停止全部转发器
    ///
    /// 单个转发器的停止失败只记录日志；无论成败集合都会被清空。返回停止的数量。
    pub async fn stop_all(&mut self) -> usize {
        let instances = std::mem::take(&mut self.instances);
        let count = instances.len();

        for (id, instance) in instances.into_iter().rev() {
            if let Err(e) = instance.stop().await {
                warn!(
                    "Failed to stop forwarder {} {:?}: {}",
                    id,
                    instance.name(),
                    e
                );
                self.log.errors().report("ForwarderSupervisor::stop_all", &e);
            }
        }

        if count > 0 {
            info!("Stopped {} forwarder(s)", count);
        }
        count
    }

    /// 停止全部、重新加载配置、再全部启动
    ///
    /// 配置重新加载失败时，已停止的转发器不会恢复。
    pub async fn restart(&mut self) -> Result<usize, AppError> {
        self.stop_all().await;

        if let Some(path) = &self.config_path {
            let config = Config::from_file(path).map_err(|e| {
                self.log.errors().report("ForwarderSupervisor::restart", &e);
                e
            })?;
            self.log.set_rules(&config.log_rules)?;
            self.config = Arc::new(config);
            info!("Configuration reloaded from {:?}", path);
        }

        self.start_all().await
    }

    /// 切换抓包开关，返回新的状态
    pub fn toggle_dump(&self) -> bool {
        let enabled = self.log.toggle_dump();
        info!("Dump capture {}", if enabled { "enabled" } else { "disabled" });
        enabled
    }

    /// 正在运行的转发器，按启动顺序
    pub fn list_active(&self) -> Vec<ActiveForwarder> {
        self.instances
            .iter()
            .map(|(id, instance)| ActiveForwarder {
                id: *id,
                name: instance.name().to_string(),
                kind: instance.kind(),
                endpoint: instance.local_addr(),
                target: instance.target(),
            })
            .collect()
    }
}

/// 在优雅关闭框架下运行监管器：启动全部转发器，收到关闭请求后全部停止
pub struct SupervisorSubsystem {
    supervisor: SharedSupervisor,
}

impl SupervisorSubsystem {
    pub fn new(supervisor: SharedSupervisor) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl IntoSubsystem<AppError> for SupervisorSubsystem {
    async fn run(self, subsys: SubsystemHandle) -> Result<(), AppError> {
        {
            let mut supervisor = self.supervisor.lock().await;
            if let Err(e) = supervisor.start_all().await {
                error!(
                    "Forwarder startup aborted, {} forwarder(s) remain running: {}",
                    supervisor.list_active().len(),
                    e
                );
            }
        }

        subsys.on_shutdown_requested().await;
        info!("Shutdown requested, stopping forwarders");

        let mut supervisor = self.supervisor.lock().await;
        supervisor.stop_all().await;
        supervisor.log().flush().await;
        Ok(())
    }
}
