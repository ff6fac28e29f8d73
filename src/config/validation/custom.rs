// 自定义校验函数
use validator::ValidationError;

use crate::config::{
    ForwardRuleConfig, HttpProxyConfig, LogRuleConfig, TcpForwarderConfig, UdpForwarderConfig,
};
use crate::matcher::{compile_exact_pattern, compile_pattern};
use crate::r#const::relay_limits;
use std::net::IpAddr;

fn invalid(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

fn check_local_address(address: Option<&str>) -> Result<(), ValidationError> {
    if let Some(address) = address {
        if address.parse::<IpAddr>().is_err() {
            return Err(invalid(
                "local_address_invalid",
                format!("Local address {:?} is not a valid IP address", address),
            ));
        }
    }
    Ok(())
}

fn check_distant_address(address: &str) -> Result<(), ValidationError> {
    if address.trim().parse::<IpAddr>().is_err() {
        return Err(invalid(
            "distant_address_invalid",
            format!("Distant address {:?} is not a valid IP address", address),
        ));
    }
    Ok(())
}

pub fn validate_forward_rule(rule: &ForwardRuleConfig) -> Result<(), ValidationError> {
    // 规则模式必须能编译，拒绝整个配置而不是推迟到请求时失败
    if let Err(e) = compile_pattern(&rule.pattern) {
        return Err(invalid("pattern_invalid", e.to_string()));
    }

    if !rule.is_system_default() && rule.port == 0 {
        return Err(invalid(
            "rule_port_missing",
            format!("Rule {:?} targets {:?} without a port", rule.pattern, rule.host),
        ));
    }

    let has_username = rule.username.as_deref().is_some_and(|s| !s.trim().is_empty());
    let has_password = rule.password.as_deref().is_some_and(|s| !s.is_empty());
    if has_password && !has_username {
        return Err(invalid(
            "password_without_username",
            format!(
                "Rule {:?} sets a proxy password without a username",
                rule.pattern
            ),
        ));
    }

    Ok(())
}

pub fn validate_http_proxy(proxy: &HttpProxyConfig) -> Result<(), ValidationError> {
    check_local_address(proxy.local_address())
}

pub fn validate_tcp_forwarder(fwd: &TcpForwarderConfig) -> Result<(), ValidationError> {
    check_local_address(fwd.local_address())?;
    check_distant_address(&fwd.distant_address)?;

    if fwd.buffer_size < relay_limits::MIN_BUFFER_SIZE
        || fwd.buffer_size > relay_limits::MAX_BUFFER_SIZE
    {
        return Err(invalid(
            "buffer_size_out_of_range",
            format!(
                "Buffer size {} for TCP forwarder {:?} is out of valid range [{}-{}]",
                fwd.buffer_size,
                fwd.name,
                relay_limits::MIN_BUFFER_SIZE,
                relay_limits::MAX_BUFFER_SIZE
            ),
        ));
    }

    Ok(())
}

pub fn validate_udp_forwarder(fwd: &UdpForwarderConfig) -> Result<(), ValidationError> {
    check_local_address(fwd.local_address())?;
    check_distant_address(&fwd.distant_address)
}

pub fn validate_log_rule(rule: &LogRuleConfig) -> Result<(), ValidationError> {
    if let Some(pattern) = rule.url_pattern() {
        if let Err(e) = compile_pattern(pattern) {
            return Err(invalid("url_pattern_invalid", e.to_string()));
        }
    }
    if let Some(pattern) = rule.client_ip() {
        if let Err(e) = compile_exact_pattern(pattern) {
            return Err(invalid("client_ip_pattern_invalid", e.to_string()));
        }
    }
    Ok(())
}
