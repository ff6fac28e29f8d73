use crate::{
    config::LogRuleConfig,
    error::AppError,
    matcher::{compile_exact_pattern, compile_pattern},
    r#const::log_layout,
};
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use regex::Regex;
use std::{
    io,
    net::IpAddr,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};
use url::Url;

/// 抓包类型，决定文件后缀
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Request,
    Response,
}

impl CaptureKind {
    fn suffix(self) -> &'static str {
        match self {
            CaptureKind::Request => log_layout::REQUEST_SUFFIX,
            CaptureKind::Response => log_layout::RESPONSE_SUFFIX,
        }
    }
}

/// 一次请求或响应的原始内容
#[derive(Debug, Clone)]
pub struct Capture<'a> {
    pub kind: CaptureKind,
    // 发起请求的客户端地址
    pub client: IpAddr,
    // 请求的绝对 URL
    pub url: &'a Url,
    // 头部块（含起始行）
    pub head: &'a [u8],
    // 已读取到的消息体
    pub body: &'a [u8],
}

// 预编译的抓包规则
#[derive(Debug)]
struct DumpRule {
    url: Option<Regex>,
    client_ip: Option<Regex>,
}

impl DumpRule {
    fn compile(rule: &LogRuleConfig) -> Result<Self, AppError> {
        Ok(Self {
            url: rule.url_pattern().map(compile_pattern).transpose()?,
            client_ip: rule.client_ip().map(compile_exact_pattern).transpose()?,
        })
    }

    // 两个字段任一命中即匹配，未设置的字段不参与
    fn matches(&self, url: &str, client: &str) -> bool {
        self.url.as_ref().is_some_and(|r| r.is_match(url))
            || self.client_ip.as_ref().is_some_and(|r| r.is_match(client))
    }
}

/// 把任意文本变成可用作文件名的片段，并限制长度
pub fn sanitize_file_name(text: &str, max_chars: usize) -> String {
    text.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => {
                log_layout::FILENAME_REPLACEMENT
            }
            c if c.is_control() => log_layout::FILENAME_REPLACEMENT,
            c => c,
        })
        .take(max_chars)
        .collect()
}

/// 抓包写入器，调用方负责加锁
#[derive(Debug)]
pub(super) struct DumpLog {
    root: PathBuf,
    rules: RwLock<Vec<DumpRule>>,
}

impl DumpLog {
    pub(super) fn new(root: &Path, rules: &[LogRuleConfig]) -> Result<Self, AppError> {
        Ok(Self {
            root: root.to_path_buf(),
            rules: RwLock::new(compile_rules(rules)?),
        })
    }

    pub(super) fn set_rules(&self, rules: &[LogRuleConfig]) -> Result<(), AppError> {
        let compiled = compile_rules(rules)?;
        *self.rules.write() = compiled;
        Ok(())
    }

    /// 是否有规则命中该请求
    pub(super) fn matches(&self, url: &Url, client: IpAddr) -> bool {
        let client = client.to_string();
        self.rules
            .read()
            .iter()
            .any(|rule| rule.matches(url.as_str(), &client))
    }

    /// 抓包文件路径：<root>/<day>/dump/<time>_<path>.<req|res>
    pub(super) fn path_for(&self, now: &DateTime<Local>, capture: &Capture<'_>) -> PathBuf {
        let mut request_path = capture.url.path().to_string();
        if let Some(query) = capture.url.query() {
            request_path.push('?');
            request_path.push_str(query);
        }
        let file_name = format!(
            "{}_{}.{}",
            now.format(log_layout::DUMP_TIME_FORMAT),
            sanitize_file_name(&request_path, log_layout::MAX_DUMP_NAME_LEN),
            capture.kind.suffix()
        );
        self.root
            .join(now.format(log_layout::DAY_FORMAT).to_string())
            .join(log_layout::DUMP_DIR)
            .join(file_name)
    }

    /// 写入头部块和消息体，目录按需创建
    pub(super) async fn write(
        &self,
        now: &DateTime<Local>,
        capture: &Capture<'_>,
    ) -> io::Result<PathBuf> {
        let path = self.path_for(now, capture);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(capture.head).await?;
        file.write_all(capture.body).await?;
        file.flush().await?;
        Ok(path)
    }
}

fn compile_rules(rules: &[LogRuleConfig]) -> Result<Vec<DumpRule>, AppError> {
    rules.iter().map(DumpRule::compile).collect()
}
