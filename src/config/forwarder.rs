use crate::config::{defaults::default_buffer_size, non_empty, validation::custom};
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use validator::Validate;

// TCP 转发器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
#[validate(schema(function = "custom::validate_tcp_forwarder"))]
pub struct TcpForwarderConfig {
    // 转发器名称
    #[serde(default)]
    pub name: String,
    // 监听地址，未设置时使用本机出口地址
    #[serde(default)]
    pub address: Option<String>,
    // 监听端口
    #[validate(range(min = 1, message = "TCP forwarder port cannot be 0"))]
    pub port: u16,
    // 远端地址
    pub distant_address: String,
    // 远端端口
    #[validate(range(min = 1, message = "TCP forwarder distant port cannot be 0"))]
    pub distant_port: u16,
    // 每个方向的读缓冲区大小（字节）
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl TcpForwarderConfig {
    // 显式配置的监听地址
    pub fn local_address(&self) -> Option<&str> {
        non_empty(&self.address)
    }

    // 远端端点
    pub fn distant(&self) -> Result<SocketAddr, AppError> {
        parse_distant(&self.name, &self.distant_address, self.distant_port)
    }
}

// UDP 转发器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
#[validate(schema(function = "custom::validate_udp_forwarder"))]
pub struct UdpForwarderConfig {
    // 转发器名称
    #[serde(default)]
    pub name: String,
    // 监听地址，未设置时使用本机出口地址
    #[serde(default)]
    pub address: Option<String>,
    // 监听端口
    #[validate(range(min = 1, message = "UDP forwarder port cannot be 0"))]
    pub port: u16,
    // 远端地址
    pub distant_address: String,
    // 远端端口
    #[validate(range(min = 1, message = "UDP forwarder distant port cannot be 0"))]
    pub distant_port: u16,
}

impl UdpForwarderConfig {
    // 显式配置的监听地址
    pub fn local_address(&self) -> Option<&str> {
        non_empty(&self.address)
    }

    // 远端端点
    pub fn distant(&self) -> Result<SocketAddr, AppError> {
        parse_distant(&self.name, &self.distant_address, self.distant_port)
    }
}

fn parse_distant(name: &str, address: &str, port: u16) -> Result<SocketAddr, AppError> {
    let ip: IpAddr = address.trim().parse().map_err(|e| {
        AppError::Config(format!(
            "Invalid distant address {:?} for forwarder {:?}: {}",
            address, name, e
        ))
    })?;
    Ok(SocketAddr::new(ip, port))
}
