use ruleproxy::{
    config::ForwardRuleConfig,
    logger::LogRouter,
    selector::{Credentials, SystemProxyResolver, Upstream, UpstreamSelector},
};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tempfile::tempdir;
use url::Url;

fn rule(pattern: &str, host: &str, port: u16) -> ForwardRuleConfig {
    ForwardRuleConfig {
        pattern: pattern.to_string(),
        host: host.to_string(),
        port,
        username: None,
        password: None,
    }
}

fn local() -> SocketAddr {
    "127.0.0.1:666".parse().unwrap()
}

fn url(text: &str) -> Url {
    Url::parse(text).unwrap()
}

/// 固定返回一个代理，并记录被调用的次数
struct FixedSystemProxy {
    upstream: Option<Upstream>,
    calls: AtomicUsize,
}

impl SystemProxyResolver for FixedSystemProxy {
    fn resolve(&self, _url: &Url) -> Option<Upstream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.upstream.clone()
    }
}

/// 测试按顺序求值，首个匹配的规则生效
#[tokio::test]
async fn test_first_matching_rule_wins() {
    let selector = UpstreamSelector::new(
        "proxy",
        local(),
        &[
            rule(".*cnaf.*", "192.168.213.137", 3128),
            rule(".*", "172.27.25.3", 8080),
        ],
    )
    .unwrap();

    let chosen = selector.select(&url("http://payroll.cnaf.example/x"), None).await;
    assert_eq!(chosen.authority(), ("192.168.213.137", 3128));

    let chosen = selector.select(&url("http://example.com"), None).await;
    assert_eq!(chosen.authority(), ("172.27.25.3", 8080));
}

/// 测试没有规则匹配时直连请求本身的主机
#[tokio::test]
async fn test_no_match_goes_direct() {
    let selector =
        UpstreamSelector::new("proxy", local(), &[rule("intranet", "10.0.0.1", 3128)]).unwrap();

    let chosen = selector.select(&url("https://example.com/a"), None).await;
    assert!(chosen.is_direct());
    assert_eq!(chosen.authority(), ("example.com", 443));
    assert_eq!(chosen.to_string(), "DIRECT");

    let empty = UpstreamSelector::new("proxy", local(), &[]).unwrap();
    assert_eq!(
        empty.select(&url("http://example.com:8080/"), None).await,
        Upstream::Direct {
            host: "example.com".to_string(),
            port: 8080
        }
    );
}

/// 测试模式不区分大小写且不锚定
#[tokio::test]
async fn test_pattern_is_case_insensitive_substring() {
    let selector =
        UpstreamSelector::new("proxy", local(), &[rule("CNAF", "10.0.0.1", 3128)]).unwrap();
    assert!(!selector.select(&url("http://www.cnaf.fr/path"), None).await.is_direct());
}

/// 测试系统默认规则在每次求值时都会询问系统代理
#[tokio::test]
async fn test_system_default_is_resolved_per_request() {
    let system = Arc::new(FixedSystemProxy {
        upstream: Some(Upstream::Proxy {
            host: "10.9.9.9".to_string(),
            port: 8080,
            credentials: None,
        }),
        calls: AtomicUsize::new(0),
    });
    let selector = UpstreamSelector::new("proxy", local(), &[rule(".*", "system-default", 0)])
        .unwrap()
        .with_system_resolver(system.clone());

    for _ in 0..3 {
        let chosen = selector.select(&url("http://example.com/"), None).await;
        assert_eq!(chosen.authority(), ("10.9.9.9", 8080));
    }
    assert_eq!(system.calls.load(Ordering::SeqCst), 3);
}

/// 测试系统代理不适用时直连
#[tokio::test]
async fn test_system_default_without_proxy_goes_direct() {
    let system = Arc::new(FixedSystemProxy {
        upstream: None,
        calls: AtomicUsize::new(0),
    });
    let selector = UpstreamSelector::new("proxy", local(), &[rule(".*", "SystemWebProxy", 0)])
        .unwrap()
        .with_system_resolver(system);

    assert!(selector.select(&url("http://example.com/"), None).await.is_direct());
}

/// 测试规则上的认证信息随选择结果返回
#[tokio::test]
async fn test_rule_credentials_are_carried() {
    let mut with_auth = rule(".*", "10.0.0.1", 3128);
    with_auth.username = Some("bob".to_string());
    with_auth.password = Some("secret".to_string());

    let selector = UpstreamSelector::new("proxy", local(), &[with_auth]).unwrap();
    let chosen = selector.select(&url("http://example.com/"), None).await;
    assert_eq!(
        chosen.credentials(),
        Some(&Credentials {
            username: "bob".to_string(),
            password: Some("secret".to_string()),
        })
    );
}

/// 测试严格模式拒绝无效模式
#[test]
fn test_strict_selector_rejects_invalid_pattern() {
    let result = UpstreamSelector::new("proxy", local(), &[rule("(", "10.0.0.1", 3128)]);
    assert!(result.is_err());
}

/// 测试宽松模式下无效规则永远不匹配，错误写入错误通道
#[tokio::test]
async fn test_lenient_selector_skips_invalid_rule() {
    let dir = tempdir().unwrap();
    let log = Arc::new(LogRouter::new(dir.path(), &[]).unwrap());

    let selector = UpstreamSelector::lenient(
        "proxy",
        local(),
        &[rule("(", "10.0.0.1", 3128), rule("example", "10.0.0.2", 3128)],
        log.clone(),
    );
    assert_eq!(selector.rule_count(), 2);
    assert_eq!(log.errors().reported(), 1);

    let chosen = selector.select(&url("http://example.com/"), None).await;
    assert_eq!(chosen.authority(), ("10.0.0.2", 3128));

    let chosen = selector.select(&url("http://other.org/"), None).await;
    assert!(chosen.is_direct());
}

/// 测试每次选择都写一行访问日志
#[tokio::test]
async fn test_selection_is_logged() {
    let dir = tempdir().unwrap();
    let log = Arc::new(LogRouter::new(dir.path(), &[]).unwrap());
    let selector = UpstreamSelector::new("proxy", local(), &[rule("cnaf", "10.0.0.1", 3128)])
        .unwrap()
        .with_log_router(log.clone());

    let client: SocketAddr = "192.168.1.5:50000".parse().unwrap();
    selector.select(&url("http://www.cnaf.fr/"), Some(client)).await;
    selector.select(&url("http://example.com/"), Some(client)).await;

    let content = std::fs::read_to_string(log.access_log_path(&chrono::Local::now())).unwrap();
    assert!(content.contains("NEW SERVER CONNECTION TO www.cnaf.fr:80 USING EXTERNAL PROXY 10.0.0.1:3128"));
    assert!(content.contains("NEW SERVER CONNECTION TO example.com:80 USING DIRECT"));
    assert!(content.contains("192.168.1.5:50000"));
}
