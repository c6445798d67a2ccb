//! 设备地址

use std::fmt;

/// 线上的设备标识（接口码 + 索引）
///
/// 消息头只携带 `(code, index)`，端口由会话所在的 TCP 端口隐式确定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId {
    /// 接口码（如 laser、position）
    pub code: u16,
    /// 同一接口的实例索引
    pub index: u16,
}

impl DeviceId {
    pub const fn new(code: u16, index: u16) -> Self {
        Self { code, index }
    }

    /// 绑定到指定端口，得到完整地址
    pub const fn at(self, port: u16) -> DeviceAddress {
        DeviceAddress {
            port,
            code: self.code,
            index: self.index,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.code, self.index)
    }
}

/// 完整设备地址 `(port, code, index)`
///
/// 创建后不可变；按 `port → code → index` 排序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceAddress {
    pub port: u16,
    pub code: u16,
    pub index: u16,
}

impl DeviceAddress {
    pub const fn new(port: u16, code: u16, index: u16) -> Self {
        Self { port, code, index }
    }

    /// 去掉端口后的线上标识
    pub const fn id(&self) -> DeviceId {
        DeviceId::new(self.code, self.index)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.port, self.code, self.index)
    }
}
