// 导出子模块
pub mod admin;
pub mod defaults;
pub mod forwarder;
pub mod http_proxy;
pub mod log_rule;
pub mod validation;

// 重新导出常用类型
pub use self::admin::AdminConfig;
pub use self::forwarder::{TcpForwarderConfig, UdpForwarderConfig};
pub use self::http_proxy::{ForwardRuleConfig, HttpProxyConfig};
pub use self::log_rule::LogRuleConfig;

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;
use validator::Validate;

// 配置文件结构
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    // 管理服务配置
    #[serde(default)]
    #[validate(nested)]
    pub admin: AdminConfig,
    // HTTP 代理绑定
    #[serde(default)]
    #[validate(nested)]
    pub http_proxies: Vec<HttpProxyConfig>,
    // TCP 转发器
    #[serde(default)]
    #[validate(nested)]
    pub tcp_forwarders: Vec<TcpForwarderConfig>,
    // UDP 转发器
    #[serde(default)]
    #[validate(nested)]
    pub udp_forwarders: Vec<UdpForwarderConfig>,
    // 抓包规则
    #[serde(default)]
    #[validate(nested)]
    pub log_rules: Vec<LogRuleConfig>,
}

impl Config {
    // 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        debug!("Attempting to load configuration from file: {:?}", path);

        // 打开并读取文件
        let mut file = File::open(path).map_err(|e| {
            AppError::Config(format!(
                "Unable to open configuration file {:?}: {}",
                path, e
            ))
        })?;

        let mut content = String::new();
        file.read_to_string(&mut content).map_err(|e| {
            AppError::Config(format!(
                "Unable to read configuration file {:?}: {}",
                path, e
            ))
        })?;

        Self::from_yaml_str(&content)
    }

    // 从 YAML 文本加载配置
    pub fn from_yaml_str(content: &str) -> Result<Self, AppError> {
        // 解析YAML
        let mut config: Config = serde_yaml::from_str(content)
            .map_err(|e| AppError::Config(format!("Configuration file parsing error: {}", e)))?;

        // 预处理配置
        config.post_process();

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    // 导出示例配置
    pub fn sample() -> Self {
        let mut config = Config {
            admin: AdminConfig::default(),
            http_proxies: vec![HttpProxyConfig {
                name: String::new(),
                address: None,
                port: 666,
                rules: vec![
                    ForwardRuleConfig {
                        pattern: ".*cnaf.*".to_string(),
                        host: "192.168.213.137".to_string(),
                        port: 3128,
                        username: None,
                        password: None,
                    },
                    ForwardRuleConfig {
                        pattern: ".*".to_string(),
                        host: "172.27.25.3".to_string(),
                        port: 8080,
                        username: None,
                        password: None,
                    },
                ],
            }],
            tcp_forwarders: vec![TcpForwarderConfig {
                name: String::new(),
                address: None,
                port: 667,
                distant_address: "172.27.50.55".to_string(),
                distant_port: 80,
                buffer_size: defaults::default_buffer_size(),
            }],
            udp_forwarders: Vec::new(),
            log_rules: vec![LogRuleConfig {
                url_pattern: Some(".*cnaf.*".to_string()),
                client_ip: Some("192\\..*".to_string()),
            }],
        };
        config.post_process();
        config
    }

    // 以 YAML 文本导出示例配置
    pub fn sample_yaml() -> Result<String, AppError> {
        Ok(serde_yaml::to_string(&Self::sample())?)
    }

    // 预处理配置：为未命名的转发器生成名称
    fn post_process(&mut self) {
        for (i, proxy) in self.http_proxies.iter_mut().enumerate() {
            if proxy.name.is_empty() {
                proxy.name = format!("http-proxy-{}", i);
            }
        }
        for (i, fwd) in self.tcp_forwarders.iter_mut().enumerate() {
            if fwd.name.is_empty() {
                fwd.name = format!("tcp-{}", i);
            }
        }
        for (i, fwd) in self.udp_forwarders.iter_mut().enumerate() {
            if fwd.name.is_empty() {
                fwd.name = format!("udp-{}", i);
            }
        }
    }

    // 配置中的转发器总数
    pub fn forwarder_count(&self) -> usize {
        self.http_proxies.len() + self.tcp_forwarders.len() + self.udp_forwarders.len()
    }
}

// 把空字符串视为未设置
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
