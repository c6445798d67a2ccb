//! 设备代理
//!
//! 每个代理对应服务端的一个设备，保存最近一次收到的数据。
//! `PlayerClient::read` 收到数据后先存原始负载，再调用代理的 `decode`。

use bytes::Bytes;
use player_protocol::{AccessLevel, DeviceAddress, ProtocolError, Timestamp};
use std::any::Any;

/// 所有代理共有的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyInfo {
    pub address: DeviceAddress,
    /// 当前访问级别（由 `request_device_access` 更新）
    pub access: AccessLevel,
    pub driver_name: String,
    /// 最近一次数据的原始负载
    pub raw: Bytes,
    /// 数据产生时间（服务端驱动给出）
    pub data_time: Timestamp,
    /// 服务端发送时间
    pub send_time: Timestamp,
    /// 本地接收时间
    pub recv_time: Timestamp,
    /// 已收到过可解码的数据
    pub valid: bool,
    /// 自上次 `take_fresh` 以来有新数据
    pub fresh: bool,
}

impl ProxyInfo {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            access: AccessLevel::Closed,
            driver_name: String::new(),
            raw: Bytes::new(),
            data_time: Timestamp::ZERO,
            send_time: Timestamp::ZERO,
            recv_time: Timestamp::ZERO,
            valid: false,
            fresh: false,
        }
    }

    /// 读取并清除 `fresh` 标志
    pub fn take_fresh(&mut self) -> bool {
        std::mem::take(&mut self.fresh)
    }

    /// 断开连接后调用
    pub(crate) fn invalidate(&mut self) {
        self.access = AccessLevel::Closed;
        self.valid = false;
        self.fresh = false;
    }
}

/// 设备代理接口
pub trait Proxy: Any + Send {
    fn info(&self) -> &ProxyInfo;

    fn info_mut(&mut self) -> &mut ProxyInfo;

    /// 解码一帧数据负载
    ///
    /// 返回错误时代理不会被标记为 valid。
    fn decode(&mut self, payload: &[u8]) -> Result<(), ProtocolError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// 只保存原始负载的代理
#[derive(Debug, Clone)]
pub struct RawProxy {
    info: ProxyInfo,
}

impl RawProxy {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            info: ProxyInfo::new(address),
        }
    }

    /// 最近一次数据
    pub fn data(&self) -> &[u8] {
        &self.info.raw
    }
}

impl Proxy for RawProxy {
    fn info(&self) -> &ProxyInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ProxyInfo {
        &mut self.info
    }

    fn decode(&mut self, _payload: &[u8]) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// 计数设备代理（负载为大端 u32）
#[derive(Debug, Clone)]
pub struct CounterProxy {
    info: ProxyInfo,
    value: Option<u32>,
}

impl CounterProxy {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            info: ProxyInfo::new(address),
            value: None,
        }
    }

    pub fn value(&self) -> Option<u32> {
        self.value
    }
}

impl Proxy for CounterProxy {
    fn info(&self) -> &ProxyInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ProxyInfo {
        &mut self.info
    }

    fn decode(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let bytes: [u8; 4] = payload.try_into().map_err(|_| ProtocolError::TooShort {
            expected: 4,
            actual: payload.len(),
        })?;
        self.value = Some(u32::from_be_bytes(bytes));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
