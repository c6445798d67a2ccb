//! 服务端配置

use crate::ServerError;
use player_protocol::{
    DEFAULT_BANNER, DataMode, HEADER_SIZE, IDENT_LEN, MAX_MESSAGE_SIZE, STRING_LEN,
};
use std::collections::BTreeMap;
use std::time::Duration;

/// 服务端配置
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServerConfig {
    /// 监听地址（不含端口）
    pub bind_address: String,
    /// 监听端口；为空时使用设备表中出现的全部端口
    pub ports: Vec<u16>,
    /// 新会话的投递模式
    pub default_data_mode: DataMode,
    /// 新会话的推送频率（Hz）
    pub default_frequency_hz: u16,
    /// 单条消息负载上限（字节），同时是一次写出的批量上限
    pub max_message_size: usize,
    /// 等待驱动应答配置请求的超时（毫秒）
    pub request_timeout_ms: u64,
    /// 认证密钥；设置后新会话必须先认证
    pub auth_key: Option<String>,
    /// 名字服务：机器人名 → 端口
    pub robot_names: BTreeMap<String, u16>,
    /// 连接建立后发送的标识串
    pub banner: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            ports: Vec::new(),
            default_data_mode: DataMode::PushAll,
            default_frequency_hz: 10,
            max_message_size: MAX_MESSAGE_SIZE,
            request_timeout_ms: 5000,
            auth_key: None,
            robot_names: BTreeMap::new(),
            banner: DEFAULT_BANNER.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// 检查取值范围
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.default_frequency_hz == 0 {
            return Err(ServerError::InvalidConfig(
                "default_frequency_hz must be positive".into(),
            ));
        }
        // 一批至少要能放下一个消息头
        if self.max_message_size < HEADER_SIZE {
            return Err(ServerError::InvalidConfig(format!(
                "max_message_size must be at least {} bytes",
                HEADER_SIZE
            )));
        }
        if self.banner.len() > IDENT_LEN {
            return Err(ServerError::InvalidConfig(format!(
                "banner longer than {} bytes",
                IDENT_LEN
            )));
        }
        if let Some(key) = &self.auth_key
            && key.len() > STRING_LEN
        {
            return Err(ServerError::InvalidConfig(format!(
                "auth_key longer than {} bytes",
                STRING_LEN
            )));
        }
        Ok(())
    }
}
