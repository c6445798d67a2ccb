//! 客户端配置

use player_protocol::MAX_MESSAGE_SIZE;
use std::time::Duration;

/// 客户端配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// 等待请求应答的超时
    pub request_timeout: Duration,
    /// 接收消息负载上限
    pub max_message_size: usize,
    /// TCP 连接超时（也用于等待标识串）
    pub connect_timeout: Duration,
    /// 是否关闭 Nagle 算法
    pub nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_message_size: MAX_MESSAGE_SIZE,
            connect_timeout: Duration::from_secs(5),
            nodelay: true,
        }
    }
}
