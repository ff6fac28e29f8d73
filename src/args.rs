use crate::r#const::{log_layout, shutdown_timeout};
use clap::{ArgAction, Parser};
use std::path::PathBuf;

// RuleProxy - 规则驱动的上游代理选择与 TCP/UDP 转发
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ruleproxyd",
    author,
    version,
    about = "A rule-driven traffic relay: chooses an upstream proxy per HTTP request from ordered \
             pattern rules, and relays arbitrary TCP and UDP services.\n\n\
             Key Features:\n\
             - Rule-based Upstream Selection: ordered, case-insensitive regex rules per HTTP proxy binding, first match wins, direct when none match.\n\
             - System Proxy Fallback: a rule can defer to the host's proxy settings, resolved per request.\n\
             - TCP Forwarding: bidirectional byte relay with a configurable buffer per forwarder.\n\
             - UDP Forwarding: one request/reply exchange per datagram through an ephemeral socket.\n\
             - Access Log & Dumps: per-day access log and rule-filtered request/response captures.\n\
             - Admin API: start, stop, restart, toggle dump capture and list running forwarders."
)]
pub struct Args {
    // 配置文件路径
    #[clap(
        short,
        long,
        value_name = "FILE",
        default_value = "config.yaml",
        help = "Path to the configuration file"
    )]
    pub config: PathBuf,

    // 是否开启调试模式
    #[clap(
        short,
        long,
        action = ArgAction::SetTrue,
        help = "Enable debug mode"
    )]
    pub debug: bool,

    // 是否仅测试配置文件
    #[clap(
        short = 't',
        long = "test",
        action = ArgAction::SetTrue,
        help = "Test configuration file for validity and exit"
    )]
    pub test_config: bool,

    // 优雅关闭超时时间（秒）
    #[clap(
        long = "shutdown-timeout",
        value_name = "SECONDS",
        default_value_t = shutdown_timeout::DEFAULT,
        help = "Maximum time in seconds to wait for complete shutdown"
    )]
    pub shutdown_timeout: u64,

    // 访问日志、抓包和错误日志的根目录
    #[clap(
        long = "log-dir",
        value_name = "DIR",
        default_value = log_layout::ROOT,
        help = "Directory for the access log, dump captures and exceptions.log"
    )]
    pub log_dir: PathBuf,

    // 启动时开启抓包
    #[clap(
        long,
        action = ArgAction::SetTrue,
        help = "Start with request/response dump capture enabled"
    )]
    pub dump: bool,

    // 打印示例配置并退出
    #[clap(
        long,
        action = ArgAction::SetTrue,
        help = "Print a sample configuration file and exit"
    )]
    pub sample: bool,
}

impl Args {
    // 解析命令行参数
    pub fn parse_args() -> Self {
        Self::parse()
    }

    // 验证参数
    pub fn validation(&self) -> Result<(), String> {
        if self.shutdown_timeout < shutdown_timeout::MIN
            || self.shutdown_timeout > shutdown_timeout::MAX
        {
            return Err(format!(
                "Shutdown timeout must be between {} and {} seconds",
                shutdown_timeout::MIN,
                shutdown_timeout::MAX
            ));
        }

        if self.log_dir.as_os_str().is_empty() {
            return Err("Log directory cannot be empty".to_string());
        }

        Ok(())
    }
}
