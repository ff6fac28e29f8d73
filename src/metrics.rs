use once_cell::sync::Lazy;
use prometheus::{CounterVec, IntGaugeVec, Opts, Registry};

/// 应用指标
pub struct Metrics {
    registry: Registry,
    // 中继接受的连接/会话计数
    relay_connections_total: CounterVec,
    // 当前活跃的中继连接
    relay_active_connections: IntGaugeVec,
    // 拨号远端失败计数
    relay_connect_errors_total: CounterVec,
    // 中继字节数
    relay_bytes_total: CounterVec,
    // UDP 请求/响应交换计数
    udp_exchanges_total: CounterVec,
    // 上游选择计数
    upstream_selections_total: CounterVec,
    // 因锁竞争跳过的日志写入
    log_writes_skipped_total: CounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let relay_connections_total = CounterVec::new(
            Opts::new(
                "ruleproxy_relay_connections_total",
                "Total number of client connections or datagrams accepted by forwarders.",
            ),
            &["forwarder", "kind"],
        )
        .unwrap();

        let relay_active_connections = IntGaugeVec::new(
            Opts::new(
                "ruleproxy_relay_active_connections",
                "Number of TCP connections currently being relayed.",
            ),
            &["forwarder"],
        )
        .unwrap();

        let relay_connect_errors_total = CounterVec::new(
            Opts::new(
                "ruleproxy_relay_connect_errors_total",
                "Total number of failures while dialing the distant endpoint.",
            ),
            &["forwarder", "kind"],
        )
        .unwrap();

        let relay_bytes_total = CounterVec::new(
            Opts::new(
                "ruleproxy_relay_bytes_total",
                "Total number of bytes relayed, by direction.",
            ),
            &["forwarder", "direction"],
        )
        .unwrap();

        let udp_exchanges_total = CounterVec::new(
            Opts::new(
                "ruleproxy_udp_exchanges_total",
                "Total number of UDP request/response exchanges, by outcome.",
            ),
            &["forwarder", "result"],
        )
        .unwrap();

        let upstream_selections_total = CounterVec::new(
            Opts::new(
                "ruleproxy_upstream_selections_total",
                "Total number of upstream selections made by HTTP proxy bindings.",
            ),
            &["binding", "target"],
        )
        .unwrap();

        let log_writes_skipped_total = CounterVec::new(
            Opts::new(
                "ruleproxy_log_writes_skipped_total",
                "Total number of log writes dropped because another writer held the log.",
            ),
            &["log"],
        )
        .unwrap();

        registry
            .register(Box::new(relay_connections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(relay_active_connections.clone()))
            .unwrap();
        registry
            .register(Box::new(relay_connect_errors_total.clone()))
            .unwrap();
        registry
            .register(Box::new(relay_bytes_total.clone()))
            .unwrap();
        registry
            .register(Box::new(udp_exchanges_total.clone()))
            .unwrap();
        registry
            .register(Box::new(upstream_selections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(log_writes_skipped_total.clone()))
            .unwrap();

        Self {
            registry,
            relay_connections_total,
            relay_active_connections,
            relay_connect_errors_total,
            relay_bytes_total,
            udp_exchanges_total,
            upstream_selections_total,
            log_writes_skipped_total,
        }
    }

    /// 获取注册表
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn relay_connections_total(&self) -> &CounterVec {
        &self.relay_connections_total
    }

    pub fn relay_active_connections(&self) -> &IntGaugeVec {
        &self.relay_active_connections
    }

    pub fn relay_connect_errors_total(&self) -> &CounterVec {
        &self.relay_connect_errors_total
    }

    pub fn relay_bytes_total(&self) -> &CounterVec {
        &self.relay_bytes_total
    }

    pub fn udp_exchanges_total(&self) -> &CounterVec {
        &self.udp_exchanges_total
    }

    pub fn upstream_selections_total(&self) -> &CounterVec {
        &self.upstream_selections_total
    }

    pub fn log_writes_skipped_total(&self) -> &CounterVec {
        &self.log_writes_skipped_total
    }
}

/// 全局指标实例
pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);
