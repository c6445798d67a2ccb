//! 类型化消息

use crate::{DeviceId, HEADER_SIZE, Header, MessageType, Timestamp};
use bytes::{BufMut, Bytes, BytesMut};

/// 请求响应类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    Ack,
    Nack,
}

impl ReplyKind {
    /// 对应的消息类型
    pub fn message_type(self) -> MessageType {
        match self {
            ReplyKind::Ack => MessageType::RespAck,
            ReplyKind::Nack => MessageType::RespNack,
        }
    }

    /// 从消息类型得出（非响应类型返回 `None`）
    pub fn from_message_type(msg_type: MessageType) -> Option<Self> {
        match msg_type {
            MessageType::RespAck => Some(ReplyKind::Ack),
            MessageType::RespNack => Some(ReplyKind::Nack),
            _ => None,
        }
    }
}

/// 协议消息（消息头 + 负载）
///
/// `size` 字段不单独存储，始终由 `payload.len()` 得出。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    pub device: DeviceId,
    pub send_time: Timestamp,
    pub data_time: Timestamp,
    pub payload: Bytes,
}

impl Message {
    /// 创建消息，发送时间取当前时间
    pub fn new(
        msg_type: MessageType,
        device: DeviceId,
        data_time: Timestamp,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            msg_type,
            device,
            send_time: Timestamp::now(),
            data_time,
            payload: payload.into(),
        }
    }

    /// 数据消息（服务端 → 客户端）
    pub fn data(device: DeviceId, data_time: Timestamp, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageType::Data, device, data_time, payload)
    }

    /// 命令消息（客户端 → 服务端）
    pub fn cmd(device: DeviceId, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageType::Cmd, device, Timestamp::ZERO, payload)
    }

    /// 配置请求（客户端 → 服务端）
    pub fn req(device: DeviceId, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageType::Req, device, Timestamp::ZERO, payload)
    }

    /// 成功响应
    pub fn ack(device: DeviceId, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageType::RespAck, device, Timestamp::ZERO, payload)
    }

    /// 失败响应
    pub fn nack(device: DeviceId, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageType::RespNack, device, Timestamp::ZERO, payload)
    }

    /// 响应消息
    pub fn reply(kind: ReplyKind, device: DeviceId, payload: impl Into<Bytes>) -> Self {
        Self::new(kind.message_type(), device, Timestamp::ZERO, payload)
    }

    /// 批次结束标记（负载为空）
    pub fn synch() -> Self {
        Self::new(MessageType::Synch, DeviceId::new(0, 0), Timestamp::ZERO, Bytes::new())
    }

    /// 负载长度
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// 编码后的总长度（消息头 + 负载）
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// 对应的消息头
    pub fn header(&self) -> Header {
        Header {
            msg_type: self.msg_type,
            device: self.device,
            size: self.payload.len() as u32,
            send_time: self.send_time,
            data_time: self.data_time,
        }
    }

    /// 由消息头和负载组装
    pub fn from_parts(header: Header, payload: Bytes) -> Self {
        Self {
            msg_type: header.msg_type,
            device: header.device,
            send_time: header.send_time,
            data_time: header.data_time,
            payload,
        }
    }

    /// 追加编码到缓冲区
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        self.header().encode(buf);
        buf.put_slice(&self.payload);
    }

    /// 编码为独立的字节块
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }
}
