use ruleproxy::{
    config::{Config, HttpProxyConfig, TcpForwarderConfig, UdpForwarderConfig},
    error::AppError,
    logger::LogRouter,
    relay::{EventSink, RelayEvent},
    supervisor::{ForwarderKind, ForwarderSupervisor},
};
use std::{net::SocketAddr, sync::Arc};
use tempfile::{tempdir, TempDir};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
    sync::mpsc,
};

fn tcp(name: &str, port: u16, distant: SocketAddr) -> TcpForwarderConfig {
    TcpForwarderConfig {
        name: name.to_string(),
        address: Some("127.0.0.1".to_string()),
        port,
        distant_address: distant.ip().to_string(),
        distant_port: distant.port(),
        buffer_size: 4096,
    }
}

fn udp(name: &str, distant: SocketAddr) -> UdpForwarderConfig {
    UdpForwarderConfig {
        name: name.to_string(),
        address: Some("127.0.0.1".to_string()),
        port: 0,
        distant_address: distant.ip().to_string(),
        distant_port: distant.port(),
    }
}

fn http_proxy(name: &str) -> HttpProxyConfig {
    HttpProxyConfig {
        name: name.to_string(),
        address: Some("127.0.0.1".to_string()),
        port: 0,
        rules: Vec::new(),
    }
}

fn distant() -> SocketAddr {
    "127.0.0.1:9".parse().unwrap()
}

/// 创建使用临时日志目录的监管器
fn build_supervisor(config: Config) -> (ForwarderSupervisor, TempDir) {
    let dir = tempdir().unwrap();
    let log = Arc::new(LogRouter::new(dir.path(), &[]).unwrap());
    (ForwarderSupervisor::new(config, log), dir)
}

/// 测试按配置顺序启动：HTTP 代理、TCP、UDP
#[tokio::test]
async fn test_start_all_in_config_order() {
    let config = Config {
        http_proxies: vec![http_proxy("proxy")],
        tcp_forwarders: vec![tcp("tcp-a", 0, distant()), tcp("tcp-b", 0, distant())],
        udp_forwarders: vec![udp("dns", distant())],
        ..Config::default()
    };
    let (mut supervisor, _dir) = build_supervisor(config);

    assert!(!supervisor.is_running());
    assert_eq!(supervisor.start_all().await.unwrap(), 4);
    assert!(supervisor.is_running());

    let active = supervisor.list_active();
    let names: Vec<&str> = active.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["proxy", "tcp-a", "tcp-b", "dns"]);
    let kinds: Vec<ForwarderKind> = active.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ForwarderKind::HttpProxy,
            ForwarderKind::Tcp,
            ForwarderKind::Tcp,
            ForwarderKind::Udp
        ]
    );
    assert!(active.windows(2).all(|w| w[0].id < w[1].id));
    assert!(active.iter().all(|a| a.endpoint.is_some()));
    assert_eq!(active[0].target, "0 rule(s)");
    assert_eq!(active[1].target, "127.0.0.1:9");

    // 已在运行时再次启动不会产生新的转发器
    assert_eq!(supervisor.start_all().await.unwrap(), 4);
    assert_eq!(supervisor.list_active().len(), 4);

    assert_eq!(supervisor.stop_all().await, 4);
}

/// 测试第一个启动失败中止后续启动，已启动的保持运行
#[tokio::test]
async fn test_first_failure_aborts_remaining() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken_port = occupied.local_addr().unwrap().port();

    let config = Config {
        tcp_forwarders: vec![
            tcp("first", 0, distant()),
            tcp("conflict", taken_port, distant()),
            tcp("never", 0, distant()),
        ],
        ..Config::default()
    };
    let (mut supervisor, _dir) = build_supervisor(config);

    assert!(supervisor.start_all().await.is_err());

    let active = supervisor.list_active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name, "first");
    assert!(supervisor.log().errors().reported() >= 1);

    assert_eq!(supervisor.stop_all().await, 1);
    assert!(!supervisor.is_running());
}

/// 测试部分启动后再次启动会补齐剩余的转发器
#[tokio::test]
async fn test_start_resumes_after_partial_failure() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken_port = occupied.local_addr().unwrap().port();

    let config = Config {
        tcp_forwarders: vec![
            tcp("first", 0, distant()),
            tcp("conflict", taken_port, distant()),
            tcp("last", 0, distant()),
        ],
        ..Config::default()
    };
    let (mut supervisor, _dir) = build_supervisor(config);

    assert!(supervisor.start_all().await.is_err());
    assert!(supervisor.is_running());
    assert_eq!(supervisor.pending_count(), 2);

    // 释放端口后再次启动，已运行的不会重复启动
    drop(occupied);
    assert_eq!(supervisor.start_all().await.unwrap(), 3);
    assert_eq!(supervisor.pending_count(), 0);

    let mut names: Vec<String> = supervisor.list_active().into_iter().map(|a| a.name).collect();
    names.sort();
    assert_eq!(names, vec!["conflict", "first", "last"]);

    assert_eq!(supervisor.start_all().await.unwrap(), 3);
    assert_eq!(supervisor.stop_all().await, 3);
}

/// 测试停止全部后集合被清空，端点被释放
#[tokio::test]
async fn test_stop_all_releases_endpoints() {
    let config = Config {
        tcp_forwarders: vec![tcp("tcp", 0, distant())],
        ..Config::default()
    };
    let (mut supervisor, _dir) = build_supervisor(config);
    supervisor.start_all().await.unwrap();
    let endpoint = supervisor.list_active()[0].endpoint.unwrap();

    assert_eq!(supervisor.stop_all().await, 1);
    assert!(supervisor.list_active().is_empty());
    assert_eq!(supervisor.stop_all().await, 0);

    // 端口可以被重新绑定
    let rebound = TcpListener::bind(endpoint).await;
    assert!(rebound.is_ok());
}

/// 测试转发器通过监管器真正转发流量，事件送达订阅方
#[tokio::test]
async fn test_supervised_forwarders_relay_traffic() {
    let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let echo_addr = echo.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = echo.accept().await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        stream.write_all(&buf).await.unwrap();
    });

    let udp_peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let udp_peer_addr = udp_peer.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let (n, from) = udp_peer.recv_from(&mut buf).await.unwrap();
        udp_peer.send_to(&buf[..n], from).await.unwrap();
    });

    let config = Config {
        tcp_forwarders: vec![tcp("tcp", 0, echo_addr)],
        udp_forwarders: vec![udp("udp", udp_peer_addr)],
        ..Config::default()
    };
    let (tx, mut events) = mpsc::unbounded_channel();
    let (supervisor, _dir) = build_supervisor(config);
    let mut supervisor = supervisor.with_events(EventSink::new(tx));
    supervisor.start_all().await.unwrap();

    let active = supervisor.list_active();
    let tcp_local = active[0].endpoint.unwrap();
    let udp_local = active[1].endpoint.unwrap();

    let mut client = TcpStream::connect(tcp_local).await.unwrap();
    client.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(b"ping", udp_local).await.unwrap();
    let mut reply = [0u8; 16];
    let (n, from) = socket.recv_from(&mut reply).await.unwrap();
    assert_eq!(&reply[..n], b"ping");
    assert_eq!(from, udp_local);

    supervisor.stop_all().await;

    let mut listening = 0;
    let mut stopped = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            RelayEvent::Listening { .. } => listening += 1,
            RelayEvent::Stopped { .. } => stopped += 1,
            _ => {}
        }
    }
    assert_eq!(listening, 2);
    assert_eq!(stopped, 2);
}

/// 测试重启会重新读取配置文件
#[tokio::test]
async fn test_restart_reloads_config_file() {
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = reserved.local_addr().unwrap().port();
    drop(reserved);

    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
        &path,
        format!(
            r#"
tcp_forwarders:
  - name: "reloaded"
    address: "127.0.0.1"
    port: {}
    distant_address: "127.0.0.1"
    distant_port: 9
log_rules:
  - url_pattern: "cnaf"
"#,
            port
        ),
    )
    .unwrap();

    let config = Config {
        tcp_forwarders: vec![tcp("initial", 0, distant())],
        ..Config::default()
    };
    let (supervisor, _logs) = build_supervisor(config);
    let mut supervisor = supervisor.with_config_path(&path);
    supervisor.start_all().await.unwrap();
    assert_eq!(supervisor.list_active()[0].name, "initial");

    assert_eq!(supervisor.restart().await.unwrap(), 1);
    let active = supervisor.list_active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name, "reloaded");
    assert_eq!(active[0].endpoint.unwrap().port(), port);
    assert_eq!(supervisor.config().log_rules.len(), 1);

    supervisor.stop_all().await;
}

/// 测试配置文件无效时重启失败，转发器保持停止
#[tokio::test]
async fn test_restart_with_broken_config_stays_stopped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "tcp_forwarders: [").unwrap();

    let config = Config {
        tcp_forwarders: vec![tcp("initial", 0, distant())],
        ..Config::default()
    };
    let (supervisor, _logs) = build_supervisor(config);
    let mut supervisor = supervisor.with_config_path(&path);
    supervisor.start_all().await.unwrap();

    let result = supervisor.restart().await;
    assert!(matches!(result, Err(AppError::Config(_))));
    assert!(!supervisor.is_running());
}

/// 测试抓包开关通过监管器切换
#[tokio::test]
async fn test_toggle_dump() {
    let (supervisor, _dir) = build_supervisor(Config::default());
    assert!(!supervisor.log().dump_enabled());
    assert!(supervisor.toggle_dump());
    assert!(supervisor.log().dump_enabled());
    assert!(!supervisor.toggle_dump());
}
