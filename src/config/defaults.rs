use crate::r#const::relay_limits;

// 默认值函数
pub fn default_admin_address() -> String {
    "127.0.0.1".to_string()
}

pub fn default_admin_port() -> u16 {
    9000
}

pub fn default_admin_timeout() -> u64 {
    30
}

pub fn default_buffer_size() -> usize {
    relay_limits::DEFAULT_BUFFER_SIZE
}
