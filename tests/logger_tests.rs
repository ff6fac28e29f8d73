use chrono::Local;
use ruleproxy::{
    config::LogRuleConfig,
    error::AppError,
    logger::{Capture, CaptureKind, EventKind, LogRouter},
};
use std::{fs, net::IpAddr, net::SocketAddr};
use tempfile::tempdir;
use url::Url;

fn local() -> SocketAddr {
    "127.0.0.1:666".parse().unwrap()
}

fn capture<'a>(kind: CaptureKind, client: &str, url: &'a Url, head: &'a [u8]) -> Capture<'a> {
    Capture {
        kind,
        client: client.parse::<IpAddr>().unwrap(),
        url,
        head,
        body: b"",
    }
}

/// 测试访问日志的表头只在新文件中写一次
#[tokio::test]
async fn test_access_log_header_written_once() {
    let dir = tempdir().unwrap();
    let router = LogRouter::new(dir.path(), &[]).unwrap();
    let client: SocketAddr = "10.1.2.3:4567".parse().unwrap();

    assert!(router.access(EventKind::HttpProxy, Some(client), local(), "GET http://a/").await);
    assert!(router.access(EventKind::TcpForwarder, None, local(), "FWD 10.0.0.1:80").await);

    let path = router.access_log_path(&Local::now());
    assert!(path.starts_with(dir.path()));
    assert!(path.ends_with("access.log"));

    let content = fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "[time]\tType\tClient\tProxy\tRequest");

    let fields: Vec<&str> = lines[1].split('\t').collect();
    assert_eq!(fields[1], "HttpProxy");
    assert_eq!(fields[2], "10.1.2.3:4567");
    assert_eq!(fields[3], "127.0.0.1:666");
    assert_eq!(fields[4], "GET http://a/");

    assert!(lines[2].contains("\tTcpForwarder\t-\t"));
}

/// 测试访问日志按天分目录
#[test]
fn test_access_log_day_folder() {
    let dir = tempdir().unwrap();
    let router = LogRouter::new(dir.path(), &[]).unwrap();
    let now = Local::now();
    let path = router.access_log_path(&now);
    assert_eq!(
        path,
        dir.path()
            .join(now.format("%d-%m-%y").to_string())
            .join("access.log")
    );
}

/// 测试只设置客户端模式的规则也能触发抓包
#[tokio::test]
async fn test_dump_by_client_ip_with_empty_url_pattern() {
    let dir = tempdir().unwrap();
    let rules = vec![LogRuleConfig {
        url_pattern: Some(String::new()),
        client_ip: Some("192\\..*".to_string()),
    }];
    let router = LogRouter::new(dir.path(), &rules).unwrap();
    router.set_dump_enabled(true);

    let url = Url::parse("http://example.com/index.html?a=1").unwrap();
    let head = b"GET http://example.com/index.html?a=1 HTTP/1.1\r\nHost: example.com\r\n\r\n";

    let written = router
        .dump(&capture(CaptureKind::Request, "192.168.1.5", &url, head))
        .await
        .unwrap();
    assert_eq!(fs::read(&written).unwrap(), head.to_vec());

    let name = written.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.ends_with("_~index.html~a=1.req"));
    assert_eq!(written.parent().unwrap().file_name().unwrap(), "dump");

    // 其他客户端不匹配
    assert!(router
        .dump(&capture(CaptureKind::Request, "10.0.0.1", &url, head))
        .await
        .is_none());
}

/// 测试 URL 模式与客户端模式是逻辑或
#[tokio::test]
async fn test_dump_rule_fields_are_ored() {
    let dir = tempdir().unwrap();
    let rules = vec![LogRuleConfig {
        url_pattern: Some("cnaf".to_string()),
        client_ip: Some("192\\.168\\.1\\.5".to_string()),
    }];
    let router = LogRouter::new(dir.path(), &rules).unwrap();
    router.set_dump_enabled(true);

    let cnaf = Url::parse("http://www.cnaf.fr/").unwrap();
    let other = Url::parse("http://example.com/").unwrap();

    assert!(router
        .dump(&capture(CaptureKind::Response, "10.0.0.1", &cnaf, b"HTTP/1.1 200 OK\r\n\r\n"))
        .await
        .is_some());
    assert!(router
        .dump(&capture(CaptureKind::Response, "192.168.1.5", &other, b"HTTP/1.1 200 OK\r\n\r\n"))
        .await
        .is_some());
    assert!(router
        .dump(&capture(CaptureKind::Response, "10.0.0.1", &other, b"HTTP/1.1 200 OK\r\n\r\n"))
        .await
        .is_none());
}

/// 测试抓包关闭时不写文件
#[tokio::test]
async fn test_dump_disabled_writes_nothing() {
    let dir = tempdir().unwrap();
    let rules = vec![LogRuleConfig {
        url_pattern: Some(".*".to_string()),
        client_ip: None,
    }];
    let router = LogRouter::new(dir.path(), &rules).unwrap();
    let url = Url::parse("http://example.com/").unwrap();

    assert!(!router.dump_enabled());
    assert!(router
        .dump(&capture(CaptureKind::Request, "10.0.0.1", &url, b"GET / HTTP/1.1\r\n\r\n"))
        .await
        .is_none());

    assert!(router.toggle_dump());
    assert!(router
        .dump(&capture(CaptureKind::Request, "10.0.0.1", &url, b"GET / HTTP/1.1\r\n\r\n"))
        .await
        .is_some());
}

/// 测试替换规则后立即生效
#[tokio::test]
async fn test_set_rules_replaces_dump_rules() {
    let dir = tempdir().unwrap();
    let router = LogRouter::new(dir.path(), &[]).unwrap();
    router.set_dump_enabled(true);
    let url = Url::parse("http://example.com/").unwrap();

    assert!(router
        .dump(&capture(CaptureKind::Request, "10.0.0.1", &url, b"x"))
        .await
        .is_none());

    router
        .set_rules(&[LogRuleConfig {
            url_pattern: Some("example".to_string()),
            client_ip: None,
        }])
        .unwrap();
    assert!(router
        .dump(&capture(CaptureKind::Request, "10.0.0.1", &url, b"x"))
        .await
        .is_some());

    let invalid = router.set_rules(&[LogRuleConfig {
        url_pattern: Some("(".to_string()),
        client_ip: None,
    }]);
    assert!(invalid.is_err());
}

/// 测试错误通道追加记录
#[test]
fn test_error_channel_appends_blocks() {
    let dir = tempdir().unwrap();
    let router = LogRouter::new(dir.path(), &[]).unwrap();

    router
        .errors()
        .report("TcpRelay::dial", &AppError::Connect("refused".to_string()));
    router
        .errors()
        .report("UdpRelay::exchange", &AppError::Stream("reset".to_string()));

    assert_eq!(router.errors().reported(), 2);
    assert_eq!(router.errors().path(), dir.path().join("exceptions.log"));
    let content = fs::read_to_string(router.errors().path()).unwrap();
    assert!(content.contains("WHAT : TcpRelay::dial"));
    assert!(content.contains("WHAT : UdpRelay::exchange"));
}
