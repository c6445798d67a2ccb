//! 流式编解码
//!
//! 在任意 `Read`/`Write`（通常是 `TcpStream`）上读写完整消息。

use crate::{HEADER_SIZE, Header, IDENT_LEN, Message, ProtocolError};
use bytes::BytesMut;
use std::io::{self, Read, Write};
use thiserror::Error;

/// 流读写错误
#[derive(Error, Debug)]
pub enum WireError {
    /// 字节流内容非法（需要断开连接）
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 底层传输错误（含对端关闭）
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl WireError {
    /// 是否为读超时（`set_read_timeout` 到期）
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            WireError::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            )
        )
    }

    /// 是否为对端关闭
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            WireError::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            )
        )
    }
}

/// 读取一条完整消息
///
/// 阻塞直到读满消息头和 `size` 字节负载。
///
/// # 错误
/// - `WireError::Protocol`: 消息头非法或负载超过 `max_size`
/// - `WireError::Io`: 读取失败或连接关闭
pub fn read_message<R: Read + ?Sized>(
    reader: &mut R,
    max_size: usize,
) -> Result<Message, WireError> {
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf)?;
    let header = Header::decode(&header_buf, max_size)?;

    let mut payload = BytesMut::zeroed(header.size as usize);
    reader.read_exact(&mut payload[..])?;

    Ok(Message::from_parts(header, payload.freeze()))
}

/// 写入一条完整消息（单次 `write_all`）
pub fn write_message<W: Write + ?Sized>(writer: &mut W, msg: &Message) -> io::Result<()> {
    writer.write_all(&msg.to_bytes())?;
    writer.flush()
}

/// 写入定长标识串（NUL 填充，超长截断）
pub fn write_banner<W: Write + ?Sized>(writer: &mut W, banner: &str) -> io::Result<()> {
    let mut buf = [0u8; IDENT_LEN];
    let bytes = banner.as_bytes();
    let len = bytes.len().min(IDENT_LEN);
    buf[..len].copy_from_slice(&bytes[..len]);
    writer.write_all(&buf)?;
    writer.flush()
}

/// 读取定长标识串（去掉尾部 NUL）
pub fn read_banner<R: Read + ?Sized>(reader: &mut R) -> io::Result<String> {
    let mut buf = [0u8; IDENT_LEN];
    reader.read_exact(&mut buf)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(IDENT_LEN);
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceId, MAX_MESSAGE_SIZE, MessageType, Timestamp};
    use std::io::Cursor;

    #[test]
    fn test_read_write_sequence() {
        let mut wire = Vec::new();
        let data = Message::data(DeviceId::new(7, 0), Timestamp::new(1, 2), vec![0xAAu8; 10]);
        write_message(&mut wire, &data).unwrap();
        write_message(&mut wire, &Message::synch()).unwrap();

        let mut cursor = Cursor::new(wire);
        let first = read_message(&mut cursor, MAX_MESSAGE_SIZE).unwrap();
        assert_eq!(first.msg_type, MessageType::Data);
        assert_eq!(first.payload.len(), 10);
        assert_eq!(first.data_time, Timestamp::new(1, 2));

        let second = read_message(&mut cursor, MAX_MESSAGE_SIZE).unwrap();
        assert_eq!(second.msg_type, MessageType::Synch);

        // 流结束
        let err = read_message(&mut cursor, MAX_MESSAGE_SIZE).unwrap_err();
        assert!(err.is_disconnect(), "{:?}", err);
    }

    #[test]
    fn test_read_truncated_payload() {
        let msg = Message::cmd(DeviceId::new(4, 0), vec![1u8; 8]);
        let bytes = msg.to_bytes();
        let mut cursor = Cursor::new(bytes[..bytes.len() - 3].to_vec());
        let err = read_message(&mut cursor, MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, WireError::Io(_)));
    }

    #[test]
    fn test_read_oversize_rejected() {
        let msg = Message::cmd(DeviceId::new(4, 0), vec![1u8; 64]);
        let mut cursor = Cursor::new(msg.to_bytes().to_vec());
        let err = read_message(&mut cursor, 32).unwrap_err();
        assert!(matches!(
            err,
            WireError::Protocol(ProtocolError::Oversize { size: 64, max: 32 })
        ));
    }

    #[test]
    fn test_banner_roundtrip_and_truncation() {
        let mut wire = Vec::new();
        write_banner(&mut wire, "Player v.1.6.5").unwrap();
        assert_eq!(wire.len(), IDENT_LEN);
        assert_eq!(read_banner(&mut Cursor::new(wire)).unwrap(), "Player v.1.6.5");

        let long = "x".repeat(40);
        let mut wire = Vec::new();
        write_banner(&mut wire, &long).unwrap();
        assert_eq!(read_banner(&mut Cursor::new(wire)).unwrap(), "x".repeat(IDENT_LEN));
    }
}
