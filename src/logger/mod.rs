//! 访问日志与抓包
//!
//! 所有写入都经过同一把非阻塞锁：拿不到锁的写入方直接放弃本次写入并计数，
//! 不排队，保证日志永远不会拖慢中继。文件操作使用 `tokio::fs`，不占用运行时线程。

mod access;
mod dump;
mod errors;

pub use access::{AccessEntry, EventKind};
pub use dump::{sanitize_file_name, Capture, CaptureKind};
pub use errors::ErrorChannel;

use crate::{config::LogRuleConfig, error::AppError, metrics::METRICS};
use access::AccessLog;
use chrono::Local;
use dump::DumpLog;
use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

/// 日志路由器
#[derive(Debug)]
pub struct LogRouter {
    // 日志根目录
    root: PathBuf,
    // 访问日志与抓包共用的写锁
    write_lock: Mutex<()>,
    // 访问日志
    access: AccessLog,
    // 抓包
    dump: DumpLog,
    // 错误通道
    errors: Arc<ErrorChannel>,
    // 是否启用抓包
    dump_enabled: AtomicBool,
}

impl LogRouter {
    /// 创建日志路由器，抓包规则在此预编译
    pub fn new(root: impl Into<PathBuf>, rules: &[LogRuleConfig]) -> Result<Self, AppError> {
        let root = root.into();
        Ok(Self {
            access: AccessLog::new(&root),
            dump: DumpLog::new(&root, rules)?,
            errors: Arc::new(ErrorChannel::new(&root)),
            write_lock: Mutex::new(()),
            dump_enabled: AtomicBool::new(false),
            root,
        })
    }

    /// 替换抓包规则（配置重载后调用）
    pub fn set_rules(&self, rules: &[LogRuleConfig]) -> Result<(), AppError> {
        self.dump.set_rules(rules)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn errors(&self) -> &Arc<ErrorChannel> {
        &self.errors
    }

    pub fn dump_enabled(&self) -> bool {
        self.dump_enabled.load(Ordering::Relaxed)
    }

    pub fn set_dump_enabled(&self, enabled: bool) {
        self.dump_enabled.store(enabled, Ordering::Relaxed);
    }

    /// 切换抓包开关，返回切换后的状态
    pub fn toggle_dump(&self) -> bool {
        !self.dump_enabled.fetch_xor(true, Ordering::Relaxed)
    }

    /// 抓包已启用且有规则命中该请求
    pub fn wants_dump(&self, url: &Url, client: IpAddr) -> bool {
        self.dump_enabled() && self.dump.matches(url, client)
    }

    /// 写一行访问日志
    ///
    /// 返回是否真正写入；锁被占用或写入失败时返回 false，失败会被报告到错误通道。
    pub async fn access(
        &self,
        kind: EventKind,
        client: Option<SocketAddr>,
        local: SocketAddr,
        description: &str,
    ) -> bool {
        let Ok(_guard) = self.write_lock.try_lock() else {
            METRICS.log_writes_skipped_total().with_label_values(&["access"]).inc();
            debug!("Access log busy, skipped entry: {}", description);
            return false;
        };

        let now = Local::now();
        let entry = AccessEntry {
            kind,
            client,
            local,
            description,
        };
        match self.access.write(&now, &entry.render(&now)).await {
            Ok(()) => true,
            Err(e) => {
                self.errors.report(
                    "LogRouter::access",
                    &AppError::Log(format!("Failed to write access log: {}", e)),
                );
                false
            }
        }
    }

    /// 抓包：启用且有规则命中时写入文件，返回写入的文件路径
    pub async fn dump(&self, capture: &Capture<'_>) -> Option<PathBuf> {
        if !self.wants_dump(capture.url, capture.client) {
            return None;
        }

        let Ok(_guard) = self.write_lock.try_lock() else {
            METRICS.log_writes_skipped_total().with_label_values(&["dump"]).inc();
            debug!("Dump log busy, skipped capture of {}", capture.url);
            return None;
        };

        match self.dump.write(&Local::now(), capture).await {
            Ok(path) => {
                debug!("Dumped {:?} capture to {:?}", capture.kind, path);
                Some(path)
            }
            Err(e) => {
                self.errors.report(
                    "LogRouter::dump",
                    &AppError::Log(format!("Failed to write dump for {}: {}", capture.url, e)),
                );
                None
            }
        }
    }

    /// 等待错误通道中尚未落盘的记录
    pub async fn flush(&self) {
        self.errors.flush().await;
    }

    /// 某一天的访问日志路径
    pub fn access_log_path(&self, day: &chrono::DateTime<Local>) -> PathBuf {
        self.access.path_for(day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn local() -> SocketAddr {
        "127.0.0.1:667".parse().unwrap()
    }

    #[tokio::test]
    async fn test_access_skips_when_lock_is_held() {
        let dir = tempdir().unwrap();
        let router = LogRouter::new(dir.path(), &[]).unwrap();

        // 模拟另一个任务正在写入
        let guard = router.write_lock.try_lock().unwrap();
        assert!(!router.access(EventKind::TcpForwarder, None, local(), "busy").await);
        drop(guard);

        assert!(router.access(EventKind::TcpForwarder, None, local(), "free").await);
        let content = std::fs::read_to_string(router.access_log_path(&Local::now())).unwrap();
        assert!(!content.contains("busy"));
        assert!(content.contains("free"));
    }

    #[tokio::test]
    async fn test_consecutive_writes_from_one_task_are_kept() {
        let dir = tempdir().unwrap();
        let router = LogRouter::new(
            dir.path(),
            &[LogRuleConfig {
                url_pattern: Some("seq".to_string()),
                client_ip: None,
            }],
        )
        .unwrap();
        router.set_dump_enabled(true);

        for i in 0..20 {
            assert!(router.access(EventKind::HttpProxy, None, local(), &format!("line-{}", i)).await);
        }
        let url = Url::parse("http://seq.example/page").unwrap();
        let path = router
            .dump(&Capture {
                kind: CaptureKind::Request,
                client: "10.0.0.1".parse().unwrap(),
                url: &url,
                head: b"GET /page HTTP/1.1\r\n\r\n",
                body: b"payload",
            })
            .await
            .unwrap();

        let content = std::fs::read_to_string(router.access_log_path(&Local::now())).unwrap();
        assert_eq!(content.lines().count(), 21);
        assert!(content.contains("line-19"));
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"GET /page HTTP/1.1\r\n\r\npayload"
        );
    }

    #[test]
    fn test_toggle_dump() {
        let dir = tempdir().unwrap();
        let router = LogRouter::new(dir.path(), &[]).unwrap();
        assert!(!router.dump_enabled());
        assert!(router.toggle_dump());
        assert!(router.dump_enabled());
        assert!(!router.toggle_dump());
        assert!(!router.dump_enabled());
    }
}
