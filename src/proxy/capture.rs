use super::head::RequestHead;

// 分块传输的结束标记：零长度块加空行
const CHUNKED_END: &[u8] = b"0\r\n\r\n";

/// 消息体在流上的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEnd {
    /// Content-Length 指定的长度，0 表示没有消息体
    Length(u64),
    /// 分块传输，以零长度块结束
    Chunked,
    /// 读到连接关闭为止
    Close,
}

impl BodyEnd {
    /// 请求既没有 Content-Length 也不是分块传输时没有消息体
    pub fn for_request(head: &RequestHead) -> Self {
        if is_chunked(head.header("transfer-encoding")) {
            BodyEnd::Chunked
        } else {
            BodyEnd::Length(parse_length(head.header("content-length")).unwrap_or(0))
        }
    }

    pub fn for_response(head: &[u8], request_method: &str) -> Self {
        let text = String::from_utf8_lossy(head);
        let mut lines = text.split("\r\n");
        let status = lines
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse::<u16>().ok())
            .unwrap_or(200);

        // HEAD 的响应、1xx/204/304 以及 CONNECT 成功都没有消息体
        if request_method.eq_ignore_ascii_case("HEAD")
            || (100..200).contains(&status)
            || status == 204
            || status == 304
            || (request_method.eq_ignore_ascii_case("CONNECT") && (200..300).contains(&status))
        {
            return BodyEnd::Length(0);
        }

        let mut length = None;
        let mut chunked = false;
        for line in lines.take_while(|line| !line.is_empty()) {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim();
            if name.eq_ignore_ascii_case("transfer-encoding") {
                chunked = is_chunked(Some(value));
            } else if name.eq_ignore_ascii_case("content-length") {
                length = parse_length(Some(value));
            }
        }

        if chunked {
            BodyEnd::Chunked
        } else {
            length.map_or(BodyEnd::Close, BodyEnd::Length)
        }
    }
}

fn is_chunked(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
}

fn parse_length(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse().ok())
}

/// 边转发边累积的一条 HTTP 消息
///
/// 只记录属于消息体的字节；超过上限的部分照常转发，但不再保留。
#[derive(Debug)]
pub struct BodyCapture {
    head: Vec<u8>,
    body: Vec<u8>,
    end: BodyEnd,
    // 已转发的消息体字节数
    seen: u64,
    // 最近转发的几个字节，用于识别分块结束
    tail: Vec<u8>,
    limit: usize,
    complete: bool,
}

impl BodyCapture {
    pub fn new(head: &[u8], end: BodyEnd, limit: usize) -> Self {
        Self {
            head: head.to_vec(),
            body: Vec::new(),
            end,
            seen: 0,
            tail: Vec::new(),
            limit,
            complete: end == BodyEnd::Length(0),
        }
    }

    /// 记录一段转发的字节，返回消息是否已经完整
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        if self.complete {
            return true;
        }

        let take = match self.end {
            BodyEnd::Length(total) => chunk.len().min((total - self.seen) as usize),
            BodyEnd::Chunked | BodyEnd::Close => chunk.len(),
        };
        let chunk = &chunk[..take];
        self.seen += take as u64;

        let room = self.limit.saturating_sub(self.body.len());
        self.body.extend_from_slice(&chunk[..chunk.len().min(room)]);

        self.complete = match self.end {
            BodyEnd::Length(total) => self.seen >= total,
            BodyEnd::Chunked => {
                self.tail.extend_from_slice(chunk);
                let excess = self.tail.len().saturating_sub(CHUNKED_END.len());
                self.tail.drain(..excess);
                self.tail == CHUNKED_END
            }
            BodyEnd::Close => false,
        };
        self.complete
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// 消息体超出上限，只保留了前一部分
    pub fn is_truncated(&self) -> bool {
        self.seen > self.body.len() as u64
    }

    pub fn head(&self) -> &[u8] {
        &self.head
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}
