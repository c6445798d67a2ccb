//! # Player Protocol
//!
//! Player 设备服务器的线协议定义（无 IO 线程、无驱动依赖）
//!
//! ## 模块
//!
//! - `address`: 设备地址（port, code, index）
//! - `time`: 秒 + 微秒时间戳
//! - `access`: 访问级别（Closed/Read/Write/All/Error）
//! - `header`: 固定 28 字节消息头
//! - `message`: 类型化消息
//! - `control`: 控制设备（code = 1）请求/响应负载
//! - `codec`: 流式读写（`Read`/`Write`）
//!
//! ## 字节序
//!
//! 所有多字节整数均为网络字节序（大端）。
//! 除本 crate 外，其他组件不直接接触原始字节。

pub mod access;
pub mod address;
pub mod codec;
pub mod control;
mod error;
pub mod header;
pub mod message;
pub mod time;

pub use access::AccessLevel;
pub use address::{DeviceAddress, DeviceId};
pub use codec::{WireError, read_banner, read_message, write_banner, write_message};
pub use control::{
    ControlReply, ControlRequest, ControlSubtype, DataMode, DeviceGrant, DeviceRequest,
};
pub use error::ProtocolError;
pub use header::{Header, MessageType};
pub use message::{Message, ReplyKind};
pub use time::Timestamp;

/// 消息头魔数（"Px"）
pub const MAGIC: u16 = 0x5878;

/// 消息头长度（字节）
pub const HEADER_SIZE: usize = 28;

/// 默认最大负载长度（2 MiB）
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// 连接建立后服务端发送的标识串长度
pub const IDENT_LEN: usize = 32;

/// 控制负载中定长字符串（驱动名、机器人名、认证密钥）的长度
pub const STRING_LEN: usize = 32;

/// 控制设备接口码
pub const CONTROL_CODE: u16 = 1;

/// 控制设备（每个端口上固定为 index 0）
pub const CONTROL_DEVICE: DeviceId = DeviceId::new(CONTROL_CODE, 0);

/// 默认标识串
pub const DEFAULT_BANNER: &str = "Player v.1.6.5";
