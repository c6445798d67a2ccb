//! 访问级别

use crate::ProtocolError;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 会话对单个设备持有的访问级别
///
/// 线上以单个 ASCII 字符表示（'c' 'r' 'w' 'a' 'e'）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum AccessLevel {
    /// 未打开
    #[default]
    Closed = b'c',
    /// 只读（接收数据）
    Read = b'r',
    /// 只写（发送命令）
    Write = b'w',
    /// 读写
    All = b'a',
    /// 打开失败（驱动 setup 出错）
    Error = b'e',
}

impl AccessLevel {
    /// 从线上字符解析
    pub fn from_letter(letter: u8) -> Result<Self, ProtocolError> {
        Self::try_from(letter).map_err(|e| ProtocolError::InvalidAccess(e.number))
    }

    /// 线上字符
    pub fn letter(self) -> u8 {
        self.into()
    }

    /// 是否可接收数据
    pub fn can_read(self) -> bool {
        matches!(self, AccessLevel::Read | AccessLevel::All)
    }

    /// 是否可发送命令
    pub fn can_write(self) -> bool {
        matches!(self, AccessLevel::Write | AccessLevel::All)
    }

    /// 该级别在设备上占用的订阅次数（All 计两次）
    pub fn subscriptions(self) -> u32 {
        match self {
            AccessLevel::Read | AccessLevel::Write => 1,
            AccessLevel::All => 2,
            AccessLevel::Closed | AccessLevel::Error => 0,
        }
    }

    /// 是否持有订阅（Read/Write/All）
    pub fn is_open(self) -> bool {
        self.subscriptions() > 0
    }
}
