//! 驱动层错误类型定义

use player_protocol::DeviceAddress;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 驱动 setup 失败（设备无法打开）
    #[error("Driver setup failed: {0}")]
    SetupFailed(String),

    /// 驱动 shutdown 失败
    #[error("Driver shutdown failed: {0}")]
    ShutdownFailed(String),

    /// 设备已达到订阅上限（独占设备）
    #[error("Subscriber limit reached ({limit})")]
    SubscriberLimit { limit: u32 },

    /// 驱动线程创建失败
    #[error("Failed to spawn driver thread: {0}")]
    ThreadSpawn(String),

    /// 驱动线程退出异常（panic 或 join 超时）
    #[error("Driver thread join failed: {0}")]
    ThreadJoin(String),

    /// 硬件 IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 设备表构建错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// 地址重复
    #[error("Duplicate device address {0}")]
    Duplicate(DeviceAddress),

    /// 地址占用了保留的控制设备接口码
    #[error("Device address {0} uses the reserved control interface code")]
    Reserved(DeviceAddress),
}
