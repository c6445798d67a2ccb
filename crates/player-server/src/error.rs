//! 服务端错误类型定义

use player_protocol::{DeviceAddress, ProtocolError, WireError};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// 会话级错误（只终止当前会话）
#[derive(Error, Debug)]
pub enum SessionError {
    /// 消息头非法或负载超长
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 套接字读写失败
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// 设备订阅失败
    #[error("Subscription to {address} failed: {reason}")]
    Subscription {
        address: DeviceAddress,
        reason: String,
    },

    /// 驱动未在超时时间内应答
    #[error("Request to {address} timed out")]
    RequestTimeout { address: DeviceAddress },

    /// 认证失败
    #[error("Authentication failed")]
    AuthFailed,
}

impl From<WireError> for SessionError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Protocol(e) => SessionError::Protocol(e),
            WireError::Io(e) => SessionError::Connection(e),
        }
    }
}

/// 服务端启动/运行错误
#[derive(Error, Debug)]
pub enum ServerError {
    /// 监听端口绑定失败
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// 线程创建失败
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    /// 配置非法
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// 会话初始化失败（标识串写入等）
    #[error("Session setup for {peer} failed: {source}")]
    Session {
        peer: SocketAddr,
        #[source]
        source: SessionError,
    },
}
