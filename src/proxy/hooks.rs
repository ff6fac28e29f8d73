use crate::{error::AppError, selector::Upstream};
use async_trait::async_trait;
use std::{net::SocketAddr, sync::Arc};
use tracing::warn;
use url::Url;

/// 代理引擎交给钩子的请求信息
#[derive(Debug, Clone)]
pub struct RequestInfo<'a> {
    pub client: SocketAddr,
    pub method: &'a str,
    // 请求的绝对 URL（CONNECT 时为 https://host:port/）
    pub url: &'a Url,
    // 客户端发来的原始头部块
    pub head: &'a [u8],
    // 消息体；请求刚到达时为空，抓包完成后为转发过的消息体
    pub body: &'a [u8],
}

/// 代理引擎交给钩子的响应信息
#[derive(Debug, Clone)]
pub struct ResponseInfo<'a> {
    pub client: SocketAddr,
    pub url: &'a Url,
    pub head: &'a [u8],
    pub body: &'a [u8],
}

/// 代理引擎在每个请求上回调的钩子
#[async_trait]
pub trait ProxyHooks: Send + Sync {
    /// 为请求选择上游，总是有结果
    async fn choose_upstream(&self, url: &Url, client: SocketAddr) -> Upstream;

    /// 请求即将发往上游
    async fn before_request(&self, request: &RequestInfo<'_>);

    /// 响应头即将发回客户端
    async fn before_response(&self, _response: &ResponseInfo<'_>) {}

    /// 是否需要累积该请求的完整消息
    fn wants_capture(&self, _url: &Url, _client: SocketAddr) -> bool {
        false
    }

    /// 请求已完整转发，`body` 为累积到的消息体
    async fn request_captured(&self, _request: &RequestInfo<'_>) {}

    /// 响应已完整转发，`body` 为累积到的消息体
    async fn response_captured(&self, _response: &ResponseInfo<'_>) {}

    /// 引擎捕获的失败
    fn on_error(&self, operation: &str, err: &AppError) {
        warn!("{} failed: {}", operation, err);
    }
}

/// HTTP 代理引擎
///
/// 负责协议解析和隧道，选择上游和记录日志都交给钩子。
#[async_trait]
pub trait ProxyEngine: Send + Sync {
    /// 在指定端点上开始监听，返回实际绑定的地址
    async fn start(
        &self,
        local: SocketAddr,
        hooks: Arc<dyn ProxyHooks>,
    ) -> Result<SocketAddr, AppError>;

    /// 停止监听；未运行时什么也不做
    async fn stop(&self) -> Result<(), AppError>;

    /// 引擎名称
    fn as_str(&self) -> &'static str;
}

/// 为每个 HTTP 代理绑定创建一个引擎实例
pub trait ProxyEngineFactory: Send + Sync {
    fn create(&self) -> Box<dyn ProxyEngine>;
}
