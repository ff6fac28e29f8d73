use crate::config::{non_empty, validation::custom};
use crate::r#const::upstream;
use crate::selector::Credentials;
use serde::{Deserialize, Serialize};
use validator::Validate;

// 上游代理选择规则，按配置顺序求值，首个匹配生效
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
#[validate(schema(function = "custom::validate_forward_rule"))]
pub struct ForwardRuleConfig {
    // 匹配请求绝对 URL 的正则（不区分大小写，不锚定）
    #[validate(length(min = 1, message = "Rule pattern cannot be empty"))]
    pub pattern: String,
    // 上游代理主机，或 "system-default"
    #[validate(length(min = 1, message = "Rule target host cannot be empty"))]
    pub host: String,
    // 上游代理端口
    #[serde(default)]
    pub port: u16,
    // 上游代理用户名
    #[serde(default)]
    pub username: Option<String>,
    // 上游代理密码，仅在设置了用户名时有效
    #[serde(default)]
    pub password: Option<String>,
}

impl ForwardRuleConfig {
    // 是否使用操作系统的代理设置
    pub fn is_system_default(&self) -> bool {
        self.host.eq_ignore_ascii_case(upstream::SYSTEM_DEFAULT)
            || self.host.eq_ignore_ascii_case(upstream::LEGACY_SYSTEM_DEFAULT)
    }

    // 上游认证信息；用户名去掉首尾空白，密码原样保留
    pub fn credentials(&self) -> Option<Credentials> {
        non_empty(&self.username).map(|username| Credentials {
            username: username.to_string(),
            password: self.password.clone().filter(|p| !p.is_empty()),
        })
    }
}

// HTTP 代理绑定配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
#[validate(schema(function = "custom::validate_http_proxy"))]
pub struct HttpProxyConfig {
    // 绑定名称
    #[serde(default)]
    pub name: String,
    // 监听地址，未设置时使用本机出口地址
    #[serde(default)]
    pub address: Option<String>,
    // 监听端口
    #[validate(range(min = 1, message = "HTTP proxy port cannot be 0"))]
    pub port: u16,
    // 上游选择规则
    #[serde(default)]
    #[validate(nested)]
    pub rules: Vec<ForwardRuleConfig>,
}

impl HttpProxyConfig {
    // 显式配置的监听地址
    pub fn local_address(&self) -> Option<&str> {
        non_empty(&self.address)
    }
}
