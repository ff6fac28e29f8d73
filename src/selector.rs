use crate::{
    config::ForwardRuleConfig,
    error::AppError,
    logger::{EventKind, LogRouter},
    matcher::RuleMatcher,
    metrics::METRICS,
    r#const::{selection_labels, upstream},
};
use std::{fmt, net::SocketAddr, sync::Arc};
use tracing::debug;
use url::{Host, Url};

/// 上游代理认证信息，密码只在有用户名时才有意义
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

/// 一次上游选择的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upstream {
    /// 经由上游 HTTP 代理
    Proxy {
        host: String,
        port: u16,
        credentials: Option<Credentials>,
    },
    /// 直连请求本身的 host:port
    Direct { host: String, port: u16 },
}

/// URL 中可直接拨号的主机名，IPv6 字面量去掉方括号
pub fn dial_host(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(domain) => Some(domain.to_string()),
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}

impl Upstream {
    /// 请求 URL 对应的直连目标
    pub fn direct_for(url: &Url) -> Self {
        Upstream::Direct {
            host: dial_host(url).unwrap_or_default(),
            port: url.port_or_known_default().unwrap_or(80),
        }
    }

    /// 需要拨号的主机和端口
    pub fn authority(&self) -> (&str, u16) {
        match self {
            Upstream::Proxy { host, port, .. } | Upstream::Direct { host, port } => {
                (host.as_str(), *port)
            }
        }
    }

    #[inline]
    pub fn is_direct(&self) -> bool {
        matches!(self, Upstream::Direct { .. })
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        match self {
            Upstream::Proxy { credentials, .. } => credentials.as_ref(),
            Upstream::Direct { .. } => None,
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upstream::Proxy { host, port, .. } => write!(f, "EXTERNAL PROXY {}:{}", host, port),
            Upstream::Direct { .. } => f.write_str(upstream::DIRECT),
        }
    }
}

/// 操作系统代理设置的解析器
///
/// 每次求值都会重新调用，不做缓存。
pub trait SystemProxyResolver: Send + Sync {
    /// 返回该 URL 应使用的系统代理；不使用代理时返回 None
    fn resolve(&self, url: &Url) -> Option<Upstream>;
}

/// 从进程环境变量读取系统代理（http_proxy / https_proxy / all_proxy / no_proxy）
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvProxyResolver;

impl SystemProxyResolver for EnvProxyResolver {
    fn resolve(&self, url: &Url) -> Option<Upstream> {
        resolve_proxy_with(|key| std::env::var(key).ok(), url)
    }
}

// 读取小写优先、大写兜底的环境变量
fn lookup_pair<F>(lookup: &F, lower: &str, upper: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(lower)
        .or_else(|| lookup(upper))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// 判断主机是否在 no_proxy 列表中
fn is_bypassed(no_proxy: &str, host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    no_proxy
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .any(|entry| {
            if entry == "*" {
                return true;
            }
            let entry = entry.trim_start_matches("*.").trim_start_matches('.');
            host.eq_ignore_ascii_case(entry)
                || (host.len() > entry.len()
                    && host.to_ascii_lowercase().ends_with(&entry.to_ascii_lowercase())
                    && host.as_bytes()[host.len() - entry.len() - 1] == b'.')
        })
}

pub(crate) fn resolve_proxy_with<F>(lookup: F, url: &Url) -> Option<Upstream>
where
    F: Fn(&str) -> Option<String>,
{
    let host = url.host_str()?;

    if let Some(no_proxy) = lookup_pair(&lookup, "no_proxy", "NO_PROXY") {
        if is_bypassed(&no_proxy, host) {
            return None;
        }
    }

    let scheme_proxy = match url.scheme() {
        "https" | "wss" => lookup_pair(&lookup, "https_proxy", "HTTPS_PROXY"),
        _ => lookup_pair(&lookup, "http_proxy", "HTTP_PROXY"),
    };
    let raw = scheme_proxy.or_else(|| lookup_pair(&lookup, "all_proxy", "ALL_PROXY"))?;

    // 环境变量里常见不带协议的 host:port 写法
    let proxy_url = if raw.contains("://") {
        Url::parse(&raw).ok()?
    } else {
        Url::parse(&format!("http://{}", raw)).ok()?
    };

    let credentials = if proxy_url.username().is_empty() {
        None
    } else {
        Some(Credentials {
            username: proxy_url.username().to_string(),
            password: proxy_url.password().map(str::to_string),
        })
    };

    Some(Upstream::Proxy {
        host: dial_host(&proxy_url)?,
        port: proxy_url.port_or_known_default().unwrap_or(80),
        credentials,
    })
}

// 规则命中后的目标
#[derive(Debug, Clone)]
enum RuleTarget {
    // 固定的上游代理
    Fixed(Upstream),
    // 每次求值时解析的系统代理
    SystemDefault,
}

impl From<&ForwardRuleConfig> for RuleTarget {
    fn from(rule: &ForwardRuleConfig) -> Self {
        if rule.is_system_default() {
            RuleTarget::SystemDefault
        } else {
            RuleTarget::Fixed(Upstream::Proxy {
                host: rule.host.clone(),
                port: rule.port,
                credentials: rule.credentials(),
            })
        }
    }
}

/// 按请求选择上游代理
///
/// 规则按配置顺序求值，首个匹配生效；没有规则匹配时直连。选择总是有结果。
pub struct UpstreamSelector {
    // 所属绑定名称，用于指标
    name: String,
    // 绑定的本地端点，用于访问日志
    local: SocketAddr,
    // 预编译规则
    matcher: RuleMatcher<RuleTarget>,
    // 系统代理解析器
    system: Arc<dyn SystemProxyResolver>,
    // 访问日志
    log: Option<Arc<LogRouter>>,
}

impl UpstreamSelector {
    /// 创建选择器，任一规则模式无效即失败
    pub fn new(
        name: impl Into<String>,
        local: SocketAddr,
        rules: &[ForwardRuleConfig],
    ) -> Result<Self, AppError> {
        let matcher = RuleMatcher::new(
            rules
                .iter()
                .map(|rule| (rule.pattern.clone(), RuleTarget::from(rule))),
        )?;

        Ok(Self {
            name: name.into(),
            local,
            matcher,
            system: Arc::new(EnvProxyResolver),
            log: None,
        })
    }

    /// 创建选择器，无效规则在求值时视为不匹配，错误写入错误通道
    pub fn lenient(
        name: impl Into<String>,
        local: SocketAddr,
        rules: &[ForwardRuleConfig],
        log: Arc<LogRouter>,
    ) -> Self {
        let (matcher, errors) = RuleMatcher::lenient(
            rules
                .iter()
                .map(|rule| (rule.pattern.clone(), RuleTarget::from(rule))),
        );
        for e in &errors {
            log.errors().report("UpstreamSelector::lenient", e);
        }

        Self {
            name: name.into(),
            local,
            matcher,
            system: Arc::new(EnvProxyResolver),
            log: Some(log),
        }
    }

    pub fn with_system_resolver(mut self, system: Arc<dyn SystemProxyResolver>) -> Self {
        self.system = system;
        self
    }

    pub fn with_log_router(mut self, log: Arc<LogRouter>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn rule_count(&self) -> usize {
        self.matcher.len()
    }

    /// 为请求选择上游
    pub async fn select(&self, url: &Url, client: Option<SocketAddr>) -> Upstream {
        let (upstream, label) = match self.matcher.first_match(url.as_str()) {
            Some(RuleTarget::Fixed(upstream)) => (upstream.clone(), selection_labels::PROXY),
            Some(RuleTarget::SystemDefault) => match self.system.resolve(url) {
                Some(upstream) => (upstream, selection_labels::SYSTEM),
                None => (Upstream::direct_for(url), selection_labels::DIRECT),
            },
            None => (Upstream::direct_for(url), selection_labels::DIRECT),
        };

        METRICS
            .upstream_selections_total()
            .with_label_values(&[&self.name, label])
            .inc();

        // 访问日志保留 URL 中的写法，IPv6 带方括号
        let host = url.host_str().unwrap_or_default();
        let port = url.port_or_known_default().unwrap_or(80);
        debug!(
            "Selected upstream for {:?}: {} (binding {:?})",
            url.as_str(),
            upstream,
            self.name
        );

        if let Some(log) = &self.log {
            log.access(
                EventKind::HttpProxy,
                client,
                self.local,
                &format!("NEW SERVER CONNECTION TO {}:{} USING {}", host, port, upstream),
            )
            .await;
        }

        upstream
    }
}
