//! 协议层错误类型定义

use thiserror::Error;

/// 协议解析错误
///
/// 消息头相关的错误（魔数、类型、长度）意味着字节流已失步，
/// 调用方必须关闭连接，同一条流内无法恢复。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// 魔数不匹配
    #[error("Bad magic: expected 0x5878, found {found:#06x}")]
    BadMagic { found: u16 },

    /// 未知的消息类型
    #[error("Unknown message type: {0}")]
    UnknownType(u16),

    /// 负载长度超过上限
    #[error("Message too large: {size} bytes (max {max})")]
    Oversize { size: usize, max: usize },

    /// 缓冲区长度不足
    #[error("Buffer too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// 无效的访问级别字符
    #[error("Invalid access letter: {0:#04x}")]
    InvalidAccess(u8),

    /// 无效的数据投递模式
    #[error("Invalid data mode: {0}")]
    InvalidDataMode(u8),

    /// 未知的控制请求子类型
    #[error("Unknown control subtype: {0}")]
    UnknownSubtype(u16),

    /// 负载格式不符合预期
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl ProtocolError {
    /// 该错误是否破坏了字节流同步（需要断开连接）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::BadMagic { .. }
                | ProtocolError::UnknownType(_)
                | ProtocolError::Oversize { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let msg = format!("{}", ProtocolError::BadMagic { found: 0x1234 });
        assert!(msg.contains("0x1234"), "{}", msg);

        let msg = format!(
            "{}",
            ProtocolError::Oversize {
                size: 10,
                max: 5
            }
        );
        assert!(msg.contains("10") && msg.contains("max 5"), "{}", msg);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ProtocolError::BadMagic { found: 0 }.is_fatal());
        assert!(ProtocolError::UnknownType(42).is_fatal());
        assert!(ProtocolError::Oversize { size: 2, max: 1 }.is_fatal());
        assert!(!ProtocolError::InvalidAccess(b'x').is_fatal());
        assert!(!ProtocolError::Malformed("x".into()).is_fatal());
    }
}
