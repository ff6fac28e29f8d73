use crate::config::defaults::{default_admin_address, default_admin_port, default_admin_timeout};
use serde::{Deserialize, Serialize};
use validator::Validate;

// 管理服务配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct AdminConfig {
    // 监听地址
    #[serde(default = "default_admin_address")]
    #[validate(length(min = 1, message = "Admin address cannot be empty"))]
    pub address: String,
    // 监听端口
    #[serde(default = "default_admin_port")]
    pub port: u16,
    // Bearer 认证令牌，未设置时不做认证
    #[serde(default)]
    pub token: Option<String>,
    // 请求超时（秒）
    #[serde(default = "default_admin_timeout")]
    #[validate(range(min = 1, max = 600, message = "Admin timeout must be between 1 and 600 seconds"))]
    pub timeout: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            address: default_admin_address(),
            port: default_admin_port(),
            token: None,
            timeout: default_admin_timeout(),
        }
    }
}
