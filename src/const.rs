// 应用常量定义

//
// 配置参数限制常量
//

// 应用关闭等待时间限制
pub mod shutdown_timeout {
    // 默认值
    pub const DEFAULT: u64 = 30;
    // 最小值
    pub const MIN: u64 = 1;
    // 最大值
    pub const MAX: u64 = 120;
}

// 中继（TCP/UDP 转发）限制
pub mod relay_limits {
    use std::time::Duration;

    // 默认读缓冲区大小（字节）
    pub const DEFAULT_BUFFER_SIZE: usize = 4096;
    // 最小读缓冲区大小（字节）
    pub const MIN_BUFFER_SIZE: usize = 512;
    // 最大读缓冲区大小（字节）
    pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;
    // 监听队列长度
    pub const LISTEN_BACKLOG: i32 = 1024;
    // 单个 UDP 数据报的最大长度
    pub const MAX_DATAGRAM_SIZE: usize = 65535;
    // 停止时等待在途任务完成的时间
    pub const STOP_GRACE: Duration = Duration::from_secs(2);
    // 探测本机出口地址时使用的外部地址（不会真的发送数据）
    pub const OUTBOUND_PROBE_ADDR: &str = "8.8.8.8:65530";
}

// 上游代理相关常量
pub mod upstream {
    // 表示"使用操作系统代理设置"的目标主机
    pub const SYSTEM_DEFAULT: &str = "system-default";
    // 旧配置文件中的同义写法
    pub const LEGACY_SYSTEM_DEFAULT: &str = "SystemWebProxy";
    // 直连时在访问日志中显示的名称
    pub const DIRECT: &str = "DIRECT";
}

// 内置 HTTP 代理引擎限制
pub mod proxy_engine {
    // 请求/响应头的最大长度
    pub const MAX_HEAD_SIZE: usize = 64 * 1024;
    // 引擎与客户端、上游之间的中继缓冲区大小
    pub const RELAY_BUFFER_SIZE: usize = 16 * 1024;
    // 抓包时每条消息保留的消息体上限，超出部分照常转发
    pub const MAX_CAPTURE_BODY: usize = 4 * 1024 * 1024;
}

// 日志目录布局
pub mod log_layout {
    // 默认日志根目录
    pub const ROOT: &str = "logs";
    // 抓包子目录
    pub const DUMP_DIR: &str = "dump";
    // 访问日志文件名
    pub const ACCESS_LOG: &str = "access.log";
    // 错误通道文件名
    pub const ERROR_LOG: &str = "exceptions.log";
    // 访问日志表头
    pub const ACCESS_HEADER: &str = "[time]\tType\tClient\tProxy\tRequest";
    // 按天分目录的日期格式
    pub const DAY_FORMAT: &str = "%d-%m-%y";
    // 访问日志时间格式
    pub const TIME_FORMAT: &str = "%H:%M:%S";
    // 抓包文件名的时间前缀格式（毫秒精度）
    pub const DUMP_TIME_FORMAT: &str = "%H.%M.%S%.3f";
    // 抓包文件名中路径部分的最大字符数
    pub const MAX_DUMP_NAME_LEN: usize = 200;
    // 请求抓包后缀
    pub const REQUEST_SUFFIX: &str = "req";
    // 响应抓包后缀
    pub const RESPONSE_SUFFIX: &str = "res";
    // 文件名非法字符的替换字符
    pub const FILENAME_REPLACEMENT: char = '~';
}

// 管理接口常量
pub mod api {
    // 响应状态
    pub mod response_status {
        pub const SUCCESS: &str = "success";
        pub const ERROR: &str = "error";
    }
}

//
// 指标标签常量
//

// 转发器类型标签
pub mod forwarder_labels {
    pub const HTTP_PROXY: &str = "http_proxy";
    pub const TCP: &str = "tcp";
    pub const UDP: &str = "udp";
}

// 传输方向标签
pub mod direction_labels {
    pub const CLIENT_TO_SERVER: &str = "client_to_server";
    pub const SERVER_TO_CLIENT: &str = "server_to_client";
}

// UDP 交换结果标签
pub mod exchange_labels {
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
    pub const CANCELLED: &str = "cancelled";
}

// 上游选择结果标签
pub mod selection_labels {
    pub const PROXY: &str = "proxy";
    pub const SYSTEM: &str = "system";
    pub const DIRECT: &str = "direct";
}
