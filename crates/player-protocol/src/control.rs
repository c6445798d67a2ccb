//! 控制设备负载
//!
//! 控制设备（code = 1, index = 0）上的请求都以一个 `u16` 子类型开头，
//! 响应首先回显相同的子类型。
//!
//! | 子类型 | 值 | 请求体 | 响应体 |
//! |---|---|---|---|
//! | DevList | 1 | — | `u16 count` + `count × (port, code, index)` |
//! | DriverInfo | 2 | `(port, code, index)` | `(port, code, index)` + 32 字节驱动名 |
//! | Dev | 3 | `n × (code, index, access)` | `n × (code, index, access, 32 字节驱动名)` |
//! | Data | 4 | — | — |
//! | DataMode | 5 | `u8 mode` | — |
//! | DataFreq | 6 | `u16 hz` | — |
//! | Auth | 7 | 32 字节密钥 | — |
//! | NameService | 8 | 32 字节名称 | 32 字节名称 + `u16 port` |

use crate::{AccessLevel, DeviceAddress, DeviceId, ProtocolError, STRING_LEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 控制请求子类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum ControlSubtype {
    DevList = 1,
    DriverInfo = 2,
    Dev = 3,
    Data = 4,
    DataMode = 5,
    DataFreq = 6,
    Auth = 7,
    NameService = 8,
}

/// 数据投递模式
///
/// - Push：服务端按频率推送
/// - Pull：客户端每发一次数据请求，服务端发一批
/// - New：只发送自上次投递后有更新的设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum DataMode {
    /// 连续推送全部订阅（服务端节拍）
    #[default]
    PushAll = 0,
    /// 请求-应答，全部订阅（客户端节拍）
    PullAll = 1,
    /// 连续推送，仅新数据
    PushNew = 2,
    /// 请求-应答，仅新数据
    PullNew = 3,
}

impl DataMode {
    /// 是否由客户端驱动节拍
    pub fn is_pull(self) -> bool {
        matches!(self, DataMode::PullAll | DataMode::PullNew)
    }

    /// 是否只投递新数据
    pub fn new_only(self) -> bool {
        matches!(self, DataMode::PushNew | DataMode::PullNew)
    }
}

/// 批量订阅中的一项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRequest {
    pub device: DeviceId,
    pub access: AccessLevel,
}

/// 批量订阅结果中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGrant {
    pub device: DeviceId,
    /// 实际获得的访问级别（失败时为 `Error`）
    pub access: AccessLevel,
    pub driver_name: String,
}

/// 控制设备请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// 列出本端口上的全部设备
    DevList,
    /// 查询设备的驱动名
    DriverInfo(DeviceAddress),
    /// 批量修改订阅
    Dev(Vec<DeviceRequest>),
    /// 请求一批数据（Pull 模式）
    Data,
    /// 设置投递模式
    DataMode(DataMode),
    /// 设置 Push 模式频率（Hz）
    DataFreq(u16),
    /// 认证
    Auth(String),
    /// 机器人名 → 端口
    NameService(String),
}

/// 控制设备响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    DevList(Vec<DeviceAddress>),
    DriverInfo {
        address: DeviceAddress,
        driver_name: String,
    },
    Dev(Vec<DeviceGrant>),
    NameService {
        name: String,
        port: u16,
    },
    /// 只回显子类型（Data/DataMode/DataFreq/Auth）
    Empty(ControlSubtype),
}

// ============================================================================
// Helpers
// ============================================================================

fn need(buf: &impl Buf, n: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < n {
        return Err(ProtocolError::TooShort {
            expected: n,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

fn get_subtype(buf: &mut impl Buf) -> Result<ControlSubtype, ProtocolError> {
    need(buf, 2)?;
    let raw = buf.get_u16();
    ControlSubtype::try_from(raw).map_err(|_| ProtocolError::UnknownSubtype(raw))
}

/// 写入定长字符串（NUL 填充，超长截断）
fn put_fixed_str(buf: &mut impl BufMut, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(STRING_LEN);
    buf.put_slice(&bytes[..len]);
    buf.put_bytes(0, STRING_LEN - len);
}

fn get_fixed_str(buf: &mut impl Buf) -> Result<String, ProtocolError> {
    need(buf, STRING_LEN)?;
    let mut raw = [0u8; STRING_LEN];
    buf.copy_to_slice(&mut raw);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(STRING_LEN);
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

fn put_address(buf: &mut impl BufMut, addr: &DeviceAddress) {
    buf.put_u16(addr.port);
    buf.put_u16(addr.code);
    buf.put_u16(addr.index);
}

fn get_address(buf: &mut impl Buf) -> Result<DeviceAddress, ProtocolError> {
    need(buf, 6)?;
    Ok(DeviceAddress::new(buf.get_u16(), buf.get_u16(), buf.get_u16()))
}

fn get_device_id(buf: &mut impl Buf) -> Result<DeviceId, ProtocolError> {
    need(buf, 4)?;
    Ok(DeviceId::new(buf.get_u16(), buf.get_u16()))
}

fn get_access(buf: &mut impl Buf) -> Result<AccessLevel, ProtocolError> {
    need(buf, 1)?;
    AccessLevel::from_letter(buf.get_u8())
}

fn reject_trailing(buf: &impl Buf) -> Result<(), ProtocolError> {
    if buf.has_remaining() {
        return Err(ProtocolError::Malformed(format!(
            "{} trailing bytes",
            buf.remaining()
        )));
    }
    Ok(())
}

// ============================================================================
// ControlRequest
// ============================================================================

impl ControlRequest {
    pub fn subtype(&self) -> ControlSubtype {
        match self {
            ControlRequest::DevList => ControlSubtype::DevList,
            ControlRequest::DriverInfo(_) => ControlSubtype::DriverInfo,
            ControlRequest::Dev(_) => ControlSubtype::Dev,
            ControlRequest::Data => ControlSubtype::Data,
            ControlRequest::DataMode(_) => ControlSubtype::DataMode,
            ControlRequest::DataFreq(_) => ControlSubtype::DataFreq,
            ControlRequest::Auth(_) => ControlSubtype::Auth,
            ControlRequest::NameService(_) => ControlSubtype::NameService,
        }
    }

    /// 编码请求负载
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u16(self.subtype().into());
        match self {
            ControlRequest::DevList | ControlRequest::Data => {},
            ControlRequest::DriverInfo(addr) => put_address(&mut buf, addr),
            ControlRequest::Dev(entries) => {
                for entry in entries {
                    buf.put_u16(entry.device.code);
                    buf.put_u16(entry.device.index);
                    buf.put_u8(entry.access.letter());
                }
            },
            ControlRequest::DataMode(mode) => buf.put_u8((*mode).into()),
            ControlRequest::DataFreq(hz) => buf.put_u16(*hz),
            ControlRequest::Auth(key) => put_fixed_str(&mut buf, key),
            ControlRequest::NameService(name) => put_fixed_str(&mut buf, name),
        }
        buf.freeze()
    }

    /// 解码请求负载
    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        let subtype = get_subtype(&mut buf)?;
        let request = match subtype {
            ControlSubtype::DevList => ControlRequest::DevList,
            ControlSubtype::Data => ControlRequest::Data,
            ControlSubtype::DriverInfo => ControlRequest::DriverInfo(get_address(&mut buf)?),
            ControlSubtype::Dev => {
                if buf.remaining() % 5 != 0 {
                    return Err(ProtocolError::Malformed(format!(
                        "device request body of {} bytes is not a multiple of 5",
                        buf.remaining()
                    )));
                }
                let mut entries = Vec::with_capacity(buf.remaining() / 5);
                while buf.has_remaining() {
                    let device = get_device_id(&mut buf)?;
                    let access = get_access(&mut buf)?;
                    entries.push(DeviceRequest { device, access });
                }
                ControlRequest::Dev(entries)
            },
            ControlSubtype::DataMode => {
                need(&buf, 1)?;
                let raw = buf.get_u8();
                let mode =
                    DataMode::try_from(raw).map_err(|_| ProtocolError::InvalidDataMode(raw))?;
                ControlRequest::DataMode(mode)
            },
            ControlSubtype::DataFreq => {
                need(&buf, 2)?;
                ControlRequest::DataFreq(buf.get_u16())
            },
            ControlSubtype::Auth => ControlRequest::Auth(get_fixed_str(&mut buf)?),
            ControlSubtype::NameService => ControlRequest::NameService(get_fixed_str(&mut buf)?),
        };
        reject_trailing(&buf)?;
        Ok(request)
    }
}

// ============================================================================
// ControlReply
// ============================================================================

impl ControlReply {
    pub fn subtype(&self) -> ControlSubtype {
        match self {
            ControlReply::DevList(_) => ControlSubtype::DevList,
            ControlReply::DriverInfo { .. } => ControlSubtype::DriverInfo,
            ControlReply::Dev(_) => ControlSubtype::Dev,
            ControlReply::NameService { .. } => ControlSubtype::NameService,
            ControlReply::Empty(subtype) => *subtype,
        }
    }

    /// 编码响应负载
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u16(self.subtype().into());
        match self {
            ControlReply::DevList(addrs) => {
                buf.put_u16(addrs.len().min(u16::MAX as usize) as u16);
                for addr in addrs.iter().take(u16::MAX as usize) {
                    put_address(&mut buf, addr);
                }
            },
            ControlReply::DriverInfo {
                address,
                driver_name,
            } => {
                put_address(&mut buf, address);
                put_fixed_str(&mut buf, driver_name);
            },
            ControlReply::Dev(grants) => {
                for grant in grants {
                    buf.put_u16(grant.device.code);
                    buf.put_u16(grant.device.index);
                    buf.put_u8(grant.access.letter());
                    put_fixed_str(&mut buf, &grant.driver_name);
                }
            },
            ControlReply::NameService { name, port } => {
                put_fixed_str(&mut buf, name);
                buf.put_u16(*port);
            },
            ControlReply::Empty(_) => {},
        }
        buf.freeze()
    }

    /// 解码响应负载
    ///
    /// 只有子类型、没有正文的负载（失败应答）解码为 `Empty`。
    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        let subtype = get_subtype(&mut buf)?;
        if !buf.has_remaining() && subtype != ControlSubtype::Dev {
            return Ok(ControlReply::Empty(subtype));
        }
        let reply = match subtype {
            ControlSubtype::DevList => {
                need(&buf, 2)?;
                let count = buf.get_u16() as usize;
                need(&buf, count * 6)?;
                let mut addrs = Vec::with_capacity(count);
                for _ in 0..count {
                    addrs.push(get_address(&mut buf)?);
                }
                ControlReply::DevList(addrs)
            },
            ControlSubtype::DriverInfo => {
                let address = get_address(&mut buf)?;
                let driver_name = get_fixed_str(&mut buf)?;
                ControlReply::DriverInfo {
                    address,
                    driver_name,
                }
            },
            ControlSubtype::Dev => {
                const ENTRY: usize = 5 + STRING_LEN;
                if buf.remaining() % ENTRY != 0 {
                    return Err(ProtocolError::Malformed(format!(
                        "device reply body of {} bytes is not a multiple of {}",
                        buf.remaining(),
                        ENTRY
                    )));
                }
                let mut grants = Vec::with_capacity(buf.remaining() / ENTRY);
                while buf.has_remaining() {
                    let device = get_device_id(&mut buf)?;
                    let access = get_access(&mut buf)?;
                    let driver_name = get_fixed_str(&mut buf)?;
                    grants.push(DeviceGrant {
                        device,
                        access,
                        driver_name,
                    });
                }
                ControlReply::Dev(grants)
            },
            ControlSubtype::NameService => {
                let name = get_fixed_str(&mut buf)?;
                need(&buf, 2)?;
                ControlReply::NameService {
                    name,
                    port: buf.get_u16(),
                }
            },
            other => ControlReply::Empty(other),
        };
        reject_trailing(&buf)?;
        Ok(reply)
    }
}
