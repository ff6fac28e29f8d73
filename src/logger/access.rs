use crate::r#const::log_layout;
use chrono::{DateTime, Local};
use std::{
    fmt, io,
    net::SocketAddr,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};

/// 访问日志事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    HttpProxy,
    TcpForwarder,
    UdpForwarder,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::HttpProxy => "HttpProxy",
            EventKind::TcpForwarder => "TcpForwarder",
            EventKind::UdpForwarder => "UdpForwarder",
        })
    }
}

/// 一条访问日志
#[derive(Debug, Clone)]
pub struct AccessEntry<'a> {
    pub kind: EventKind,
    pub client: Option<SocketAddr>,
    pub local: SocketAddr,
    pub description: &'a str,
}

impl AccessEntry<'_> {
    // 制表符分隔：时间、类型、客户端、本地端点、描述
    pub(super) fn render(&self, now: &DateTime<Local>) -> String {
        let client = self
            .client
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "[{}]\t{}\t{}\t{}\t{}\n",
            now.format(log_layout::TIME_FORMAT),
            self.kind,
            client,
            self.local,
            self.description.replace(['\r', '\n'], " ")
        )
    }
}

/// 按天分文件的访问日志，调用方负责加锁
#[derive(Debug)]
pub(super) struct AccessLog {
    root: PathBuf,
}

impl AccessLog {
    pub(super) fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// 某一天的访问日志路径
    pub(super) fn path_for(&self, now: &DateTime<Local>) -> PathBuf {
        self.root
            .join(now.format(log_layout::DAY_FORMAT).to_string())
            .join(log_layout::ACCESS_LOG)
    }

    /// 追加一行，文件不存在时先写表头
    pub(super) async fn write(&self, now: &DateTime<Local>, line: &str) -> io::Result<()> {
        let path = self.path_for(now);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut content = String::new();
        if fs::metadata(&path).await.is_err() {
            content.push_str(log_layout::ACCESS_HEADER);
            content.push('\n');
        }
        content.push_str(line);

        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await
    }
}
