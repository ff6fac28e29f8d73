use crate::config::{non_empty, validation::custom};
use serde::{Deserialize, Serialize};
use validator::Validate;

// 抓包规则：URL 模式与客户端 IP 模式任一匹配即触发（逻辑或）
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
#[validate(schema(function = "custom::validate_log_rule"))]
pub struct LogRuleConfig {
    // 匹配请求绝对 URL 的正则
    #[serde(default)]
    pub url_pattern: Option<String>,
    // 匹配客户端地址的模式（整串匹配）
    #[serde(default)]
    pub client_ip: Option<String>,
}

impl LogRuleConfig {
    pub fn url_pattern(&self) -> Option<&str> {
        non_empty(&self.url_pattern)
    }

    pub fn client_ip(&self) -> Option<&str> {
        non_empty(&self.client_ip)
    }
}
