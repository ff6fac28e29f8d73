pub mod custom;

use std::collections::HashSet;

use crate::error::AppError;
use tracing::debug;
use validator::Validate;

use super::Config;

// 监听协议，用于端点唯一性检查
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ListenProtocol {
    Tcp,
    Udp,
}

impl Config {
    // 验证配置
    pub fn validate(&self) -> Result<(), AppError> {
        // 字段级与结构级校验（包括所有规则模式的预编译）
        Validate::validate(self).map_err(|e| AppError::Config(e.to_string()))?;

        // 验证名称唯一性
        self.validate_name_uniqueness()?;

        // 同一 (端点, 协议) 至多一个监听器
        self.validate_endpoint_uniqueness()?;

        debug!(
            "Configuration validated: {} http proxies, {} tcp forwarders, {} udp forwarders, {} log rules",
            self.http_proxies.len(),
            self.tcp_forwarders.len(),
            self.udp_forwarders.len(),
            self.log_rules.len()
        );

        Ok(())
    }

    // 验证名称唯一性
    fn validate_name_uniqueness(&self) -> Result<(), AppError> {
        let mut proxy_names = HashSet::new();
        for proxy in &self.http_proxies {
            if !proxy_names.insert(proxy.name.as_str()) {
                return Err(AppError::Config(format!(
                    "HTTP proxy name '{}' is duplicated",
                    proxy.name
                )));
            }
        }

        let mut tcp_names = HashSet::new();
        for fwd in &self.tcp_forwarders {
            if !tcp_names.insert(fwd.name.as_str()) {
                return Err(AppError::Config(format!(
                    "TCP forwarder name '{}' is duplicated",
                    fwd.name
                )));
            }
        }

        let mut udp_names = HashSet::new();
        for fwd in &self.udp_forwarders {
            if !udp_names.insert(fwd.name.as_str()) {
                return Err(AppError::Config(format!(
                    "UDP forwarder name '{}' is duplicated",
                    fwd.name
                )));
            }
        }

        Ok(())
    }

    // 验证监听端点唯一性（未设置地址的条目视为同一个自动地址）
    fn validate_endpoint_uniqueness(&self) -> Result<(), AppError> {
        let mut endpoints = HashSet::new();

        let tcp_endpoints = self
            .http_proxies
            .iter()
            .map(|p| (p.name.as_str(), p.local_address(), p.port))
            .chain(
                self.tcp_forwarders
                    .iter()
                    .map(|f| (f.name.as_str(), f.local_address(), f.port)),
            )
            .map(|(name, address, port)| (name, address, port, ListenProtocol::Tcp));

        let udp_endpoints = self
            .udp_forwarders
            .iter()
            .map(|f| (f.name.as_str(), f.local_address(), f.port, ListenProtocol::Udp));

        for (name, address, port, protocol) in tcp_endpoints.chain(udp_endpoints) {
            let address = address.unwrap_or("auto");
            if !endpoints.insert((address.to_string(), port, protocol)) {
                return Err(AppError::Config(format!(
                    "Forwarder '{}' listens on {}:{} ({:?}) which is already used by another forwarder",
                    name, address, port, protocol
                )));
            }
        }

        Ok(())
    }
}
