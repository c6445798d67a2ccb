//! 客户端错误类型定义

use player_protocol::{DeviceAddress, ProtocolError, WireError};
use std::io;
use thiserror::Error;

/// 客户端错误类型
#[derive(Error, Debug)]
pub enum ClientError {
    /// 尚未连接（或已断开）
    #[error("Not connected")]
    NotConnected,

    /// 建立连接或发送失败
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// 服务端数据格式错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// `read` 过程中传输失败
    #[error("Read failed: {0}")]
    Read(#[source] WireError),

    /// 等待应答时传输失败
    #[error("Request to {address} failed: {source}")]
    Request {
        address: DeviceAddress,
        #[source]
        source: WireError,
    },

    /// 超时未收到应答
    #[error("Request to {address} timed out")]
    RequestTimeout { address: DeviceAddress },

    /// 服务端回复 Nack
    #[error("Request to {address} was rejected")]
    Nack { address: DeviceAddress },

    /// 应答负载与请求不匹配
    #[error("Unexpected reply: {0}")]
    ConfigMismatch(String),

    /// 标识串缺失或非法
    #[error("Invalid server banner: {0}")]
    Banner(String),

    /// 同一地址已注册代理
    #[error("Proxy for {0} already registered")]
    DuplicateProxy(DeviceAddress),
}

impl ClientError {
    /// 是否由于连接断开
    pub fn is_disconnect(&self) -> bool {
        match self {
            ClientError::NotConnected => true,
            ClientError::Read(e) | ClientError::Request { source: e, .. } => e.is_disconnect(),
            _ => false,
        }
    }
}
