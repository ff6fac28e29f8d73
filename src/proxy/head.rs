use crate::{error::AppError, selector::Credentials};
use base64::{engine::general_purpose, Engine as _};
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

// 代理自身使用、不转发给源站的头
const HOP_BY_HOP: &[&str] = &["proxy-connection", "proxy-authorization", "connection", "keep-alive"];

/// 头部块结束位置（含终止空行）
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
        .map(|i| i + HEAD_TERMINATOR.len())
}

/// 读取到的头部块以及其后已经读入的字节
#[derive(Debug, Default)]
pub struct HeadRead {
    pub buf: Vec<u8>,
    // 头部块长度；连接在头部结束前关闭或超出上限时为 None
    pub head_len: Option<usize>,
}

impl HeadRead {
    pub fn head(&self) -> &[u8] {
        &self.buf[..self.head_len.unwrap_or(self.buf.len())]
    }

    pub fn rest(&self) -> &[u8] {
        self.head_len.map_or(&[][..], |len| &self.buf[len..])
    }
}

/// 读取直到头部块结束、对端关闭或达到上限
pub async fn read_head<R>(reader: &mut R, limit: usize) -> Result<HeadRead, AppError>
where
    R: AsyncRead + Unpin,
{
    let mut read = HeadRead::default();
    let mut chunk = [0u8; 4096];

    while read.buf.len() < limit {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| AppError::Stream(format!("read head failed: {}", e)))?;
        if n == 0 {
            break;
        }
        // 终止符可能跨两次读取
        let scan_from = read.buf.len().saturating_sub(HEAD_TERMINATOR.len() - 1);
        read.buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_head_end(&read.buf[scan_from..]) {
            read.head_len = Some(scan_from + end);
            break;
        }
    }

    Ok(read)
}

/// 解析后的请求头
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn parse(head: &[u8]) -> Result<Self, AppError> {
        let text = std::str::from_utf8(head)
            .map_err(|_| AppError::Stream("request head is not valid UTF-8".to_string()))?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AppError::Stream(format!(
                "malformed request line {:?}",
                request_line
            )));
        };

        let headers = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| {
                line.split_once(':')
                    .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 请求的绝对 URL
    ///
    /// CONNECT 的 authority 视为 https；源站形式的请求用 Host 头补全。
    pub fn url(&self) -> Result<Url, AppError> {
        let absolute = if self.is_connect() {
            format!("https://{}/", self.target)
        } else if self.target.starts_with('/') {
            let host = self.header("host").ok_or_else(|| {
                AppError::Stream(format!("origin-form target {:?} without Host", self.target))
            })?;
            format!("http://{}{}", host, self.target)
        } else {
            self.target.clone()
        };

        Url::parse(&absolute)
            .map_err(|e| AppError::Stream(format!("invalid request target {:?}: {}", self.target, e)))
    }

    /// 直连源站时使用的头：源站形式的请求目标，去掉代理相关的头，每个连接只承载一个请求
    pub fn to_origin_form(&self, url: &Url) -> Vec<u8> {
        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }

        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name))
            .cloned()
            .collect();
        headers.push(("Connection".to_string(), "close".to_string()));

        render(&self.method, &target, &self.version, &headers)
    }

    /// 发往上游代理时使用的头：保留请求目标，替换认证信息
    pub fn to_proxy_form(&self, credentials: Option<&Credentials>) -> Vec<u8> {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name))
            .cloned()
            .collect();
        if let Some(credentials) = credentials {
            headers.push(("Proxy-Authorization".to_string(), basic_auth(credentials)));
        }
        if !self.is_connect() {
            headers.push(("Connection".to_string(), "close".to_string()));
        }

        render(&self.method, &self.target, &self.version, &headers)
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn render(method: &str, target: &str, version: &str, headers: &[(String, String)]) -> Vec<u8> {
    let mut out = format!("{} {} {}\r\n", method, target, version);
    for (name, value) in headers {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out.into_bytes()
}

/// `Proxy-Authorization` 的 Basic 值
pub fn basic_auth(credentials: &Credentials) -> String {
    let raw = format!(
        "{}:{}",
        credentials.username,
        credentials.password.as_deref().unwrap_or_default()
    );
    format!("Basic {}", general_purpose::STANDARD.encode(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(18));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }

    #[tokio::test]
    async fn test_read_head_across_chunks() {
        let (mut client, mut server) = tokio::io::duplex(8);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client
                .write_all(b"GET http://a.example/ HTTP/1.1\r\nHost: a.example\r\n\r\nxyz")
                .await
                .unwrap();
        });

        let read = read_head(&mut server, 1024).await.unwrap();
        assert!(read.head().ends_with(b"\r\n\r\n"));
        assert!(read.head().starts_with(b"GET http://a.example/"));
    }

    #[test]
    fn test_origin_form_rewrite() {
        let head = RequestHead::parse(
            b"GET http://a.example/p?q=1 HTTP/1.1\r\nHost: a.example\r\nProxy-Connection: keep-alive\r\n\r\n",
        )
        .unwrap();
        let url = head.url().unwrap();
        let rewritten = String::from_utf8(head.to_origin_form(&url)).unwrap();
        assert!(rewritten.starts_with("GET /p?q=1 HTTP/1.1\r\n"));
        assert!(rewritten.contains("Host: a.example\r\n"));
        assert!(!rewritten.to_ascii_lowercase().contains("proxy-connection"));
        assert!(rewritten.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn test_connect_url() {
        let head = RequestHead::parse(b"CONNECT secure.example:8443 HTTP/1.1\r\n\r\n").unwrap();
        assert!(head.is_connect());
        assert_eq!(head.url().unwrap().as_str(), "https://secure.example:8443/");
    }

    #[test]
    fn test_proxy_form_adds_basic_auth() {
        let head = RequestHead::parse(
            b"GET http://a.example/ HTTP/1.1\r\nProxy-Authorization: Basic old\r\n\r\n",
        )
        .unwrap();
        let credentials = Credentials {
            username: "bob".to_string(),
            password: Some("secret".to_string()),
        };
        let rewritten = String::from_utf8(head.to_proxy_form(Some(&credentials))).unwrap();
        assert!(rewritten.starts_with("GET http://a.example/ HTTP/1.1\r\n"));
        assert!(rewritten.contains("Proxy-Authorization: Basic Ym9iOnNlY3JldA==\r\n"));
        assert!(!rewritten.contains("Basic old"));
    }
}
