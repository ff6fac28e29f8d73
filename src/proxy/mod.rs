//! HTTP 代理绑定
//!
//! 协议处理由 [`ProxyEngine`] 完成，本模块只通过 [`ProxyHooks`] 提供上游选择和日志。

mod binding;
mod capture;
mod engine;
pub mod head;
mod hooks;

pub use binding::{BindingHooks, HttpProxyBinding};
pub use engine::{TunnelEngine, TunnelEngineFactory};
pub use hooks::{ProxyEngine, ProxyEngineFactory, ProxyHooks, RequestInfo, ResponseInfo};
