//! 消息头（28 字节，大端）
//!
//! ```text
//! offset  size  field
//! 0       2     magic (0x5878)
//! 2       2     type
//! 4       2     device code
//! 6       2     device index
//! 8       4     size (payload bytes)
//! 12      4     send time sec
//! 16      4     send time usec
//! 20      4     data time sec
//! 24      4     data time usec
//! ```

use crate::{DeviceId, HEADER_SIZE, MAGIC, ProtocolError, Timestamp};
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

// ============================================================================
// Message Types
// ============================================================================

/// 消息类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum MessageType {
    // 服务端 → 客户端
    Data = 1, // 传感器数据
    // 客户端 → 服务端
    Cmd = 2, // 设备命令
    Req = 3, // 配置请求
    // 服务端 → 客户端
    RespAck = 4,  // 请求成功
    Synch = 5,    // 一批数据结束
    RespNack = 6, // 请求失败
}

impl MessageType {
    /// 是否为请求响应
    pub fn is_reply(self) -> bool {
        matches!(self, MessageType::RespAck | MessageType::RespNack)
    }
}

// ============================================================================
// Message Header
// ============================================================================

/// 消息头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: MessageType,
    pub device: DeviceId,
    /// 负载长度（字节）
    pub size: u32,
    /// 发送时间
    pub send_time: Timestamp,
    /// 数据产生时间
    pub data_time: Timestamp,
}

impl Header {
    /// 编码消息头（追加 28 字节）
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16(MAGIC);
        buf.put_u16(self.msg_type.into());
        buf.put_u16(self.device.code);
        buf.put_u16(self.device.index);
        buf.put_u32(self.size);
        buf.put_u32(self.send_time.sec);
        buf.put_u32(self.send_time.usec);
        buf.put_u32(self.data_time.sec);
        buf.put_u32(self.data_time.usec);
    }

    /// 编码到定长数组
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        self.encode(&mut &mut out[..]);
        out
    }

    /// 从缓冲区解码消息头
    ///
    /// # 错误
    /// - `TooShort`: 不足 28 字节
    /// - `BadMagic`: 魔数不匹配
    /// - `UnknownType`: 类型未定义
    /// - `Oversize`: `size` 超过 `max_size`
    pub fn decode(mut buf: &[u8], max_size: usize) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::TooShort {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let magic = buf.get_u16();
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic { found: magic });
        }

        let raw_type = buf.get_u16();
        let msg_type =
            MessageType::try_from(raw_type).map_err(|_| ProtocolError::UnknownType(raw_type))?;
        let code = buf.get_u16();
        let index = buf.get_u16();
        let size = buf.get_u32();
        if size as usize > max_size {
            return Err(ProtocolError::Oversize {
                size: size as usize,
                max: max_size,
            });
        }

        let send_time = Timestamp {
            sec: buf.get_u32(),
            usec: buf.get_u32(),
        };
        let data_time = Timestamp {
            sec: buf.get_u32(),
            usec: buf.get_u32(),
        };

        Ok(Self {
            msg_type,
            device: DeviceId::new(code, index),
            size,
            send_time,
            data_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_MESSAGE_SIZE;

    fn sample() -> Header {
        Header {
            msg_type: MessageType::Data,
            device: DeviceId::new(7, 1),
            size: 16,
            send_time: Timestamp::new(100, 5),
            data_time: Timestamp::new(99, 999_000),
        }
    }

    #[test]
    fn test_message_type_values() {
        assert_eq!(u16::from(MessageType::Data), 1);
        assert_eq!(u16::from(MessageType::Cmd), 2);
        assert_eq!(u16::from(MessageType::Req), 3);
        assert_eq!(u16::from(MessageType::RespAck), 4);
        assert_eq!(u16::from(MessageType::Synch), 5);
        assert_eq!(u16::from(MessageType::RespNack), 6);
    }

    #[test]
    fn test_header_layout_is_big_endian() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[0..2], &[0x58, 0x78]);
        assert_eq!(&bytes[2..4], &[0x00, 0x01]);
        assert_eq!(&bytes[4..6], &[0x00, 0x07]);
        assert_eq!(&bytes[6..8], &[0x00, 0x01]);
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x00, 0x10]);
        assert_eq!(&bytes[12..16], &100u32.to_be_bytes());
    }

    #[test]
    fn test_header_roundtrip() {
        let header = sample();
        let decoded = Header::decode(&header.to_bytes(), MAX_MESSAGE_SIZE).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_decode_too_short() {
        let bytes = sample().to_bytes();
        assert_eq!(
            Header::decode(&bytes[..10], MAX_MESSAGE_SIZE),
            Err(ProtocolError::TooShort {
                expected: HEADER_SIZE,
                actual: 10
            })
        );
    }

    #[test]
    fn test_decode_bad_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0] = 0x12;
        bytes[1] = 0x34;
        assert_eq!(
            Header::decode(&bytes, MAX_MESSAGE_SIZE),
            Err(ProtocolError::BadMagic { found: 0x1234 })
        );
    }

    #[test]
    fn test_decode_unknown_type() {
        let mut bytes = sample().to_bytes();
        bytes[3] = 0x63;
        assert_eq!(
            Header::decode(&bytes, MAX_MESSAGE_SIZE),
            Err(ProtocolError::UnknownType(0x63))
        );
    }

    #[test]
    fn test_decode_oversize() {
        let header = Header {
            size: 1025,
            ..sample()
        };
        assert_eq!(
            Header::decode(&header.to_bytes(), 1024),
            Err(ProtocolError::Oversize {
                size: 1025,
                max: 1024
            })
        );
        // 恰好等于上限是合法的
        let header = Header {
            size: 1024,
            ..sample()
        };
        assert!(Header::decode(&header.to_bytes(), 1024).is_ok());
    }
}
