pub mod admin;
pub mod api;
pub mod args;
pub mod config;
pub mod r#const;
pub mod error;
pub mod logger;
pub mod matcher;
pub mod metrics;
pub mod proxy;
pub mod relay;
pub mod selector;
pub mod supervisor;

pub use crate::metrics::METRICS;
