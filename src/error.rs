use std::io;
use thiserror::Error;

/// 应用错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// 配置错误（缺失或无法解析），只影响相关的转发器
    #[error("Configuration error: {0}")]
    Config(String),

    /// 规则模式无法求值
    #[error("Rule error: {0}")]
    Rule(String),

    /// 向外拨号失败
    #[error("Connect error: {0}")]
    Connect(String),

    /// 中继过程中的套接字错误
    #[error("Stream error: {0}")]
    Stream(String),

    /// 写访问日志或抓包失败
    #[error("Log error: {0}")]
    Log(String),

    /// 同一端点上已有监听器在运行
    #[error("Forwarder already running: {0}")]
    AlreadyRunning(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),

    /// 序列化/反序列化错误
    #[error("Serialization/deserialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// YAML 解析错误
    #[error("Configuration file parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}
