//! 配置文件
//!
//! ```toml
//! log_level = "info"
//!
//! [server]
//! default_frequency_hz = 10
//! auth_key = "secret"
//!
//! [server.robot_names]
//! robot = 6665
//!
//! [[device]]
//! port = 6665
//! code = 4
//! driver = "counter"
//! period_ms = 100
//!
//! [[device]]
//! code = 30
//! driver = "echo"
//! exclusive = true
//! ```

use anyhow::{Context, Result};
use player_driver::sim::{CounterDriver, EchoDriver, FailingDriver};
use player_driver::{DeviceRegistry, DeviceRegistryBuilder, RegistryError};
use player_protocol::DeviceAddress;
use player_server::ServerConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// 默认端口
pub const DEFAULT_PORT: u16 = 6665;

const DEFAULT_PERIOD_MS: u64 = 100;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_period_ms() -> u64 {
    DEFAULT_PERIOD_MS
}

/// 内置驱动
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Counter,
    Echo,
    Failing,
}

/// `[[device]]` 表中的一项
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceEntry {
    #[serde(default = "default_port")]
    pub port: u16,
    pub code: u16,
    #[serde(default)]
    pub index: u16,
    pub driver: DriverKind,
    /// 计数驱动的发布周期
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// 最多一个订阅
    #[serde(default)]
    pub exclusive: bool,
}

impl DeviceEntry {
    pub fn address(&self) -> DeviceAddress {
        DeviceAddress::new(self.port, self.code, self.index)
    }

    fn register(
        &self,
        builder: DeviceRegistryBuilder,
    ) -> Result<DeviceRegistryBuilder, RegistryError> {
        let address = self.address();
        match self.driver {
            DriverKind::Counter => {
                let driver = CounterDriver::new(Duration::from_millis(self.period_ms));
                if self.exclusive {
                    builder.add(address, driver.exclusive())
                } else {
                    builder.add(address, driver)
                }
            },
            DriverKind::Echo => {
                let driver = EchoDriver::new();
                if self.exclusive {
                    builder.add(address, driver.exclusive())
                } else {
                    builder.add(address, driver)
                }
            },
            DriverKind::Failing => builder.add(address, FailingDriver),
        }
    }
}

/// playerd 配置文件
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// `RUST_LOG` 未设置时的日志级别
    pub log_level: Option<String>,
    pub server: ServerConfig,
    #[serde(rename = "device")]
    pub devices: Vec<DeviceEntry>,
}

impl FileConfig {
    /// 从文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 没有配置设备时使用的默认设备（一个计数设备和一个回显设备）
    pub fn default_devices() -> Vec<DeviceEntry> {
        vec![
            DeviceEntry {
                port: DEFAULT_PORT,
                code: 4,
                index: 0,
                driver: DriverKind::Counter,
                period_ms: DEFAULT_PERIOD_MS,
                exclusive: false,
            },
            DeviceEntry {
                port: DEFAULT_PORT,
                code: 30,
                index: 0,
                driver: DriverKind::Echo,
                period_ms: DEFAULT_PERIOD_MS,
                exclusive: false,
            },
        ]
    }

    /// 把所有设备和监听端口移到 `port`
    pub fn override_port(&mut self, port: u16) {
        for device in &mut self.devices {
            device.port = port;
        }
        self.server.ports = vec![port];
    }

    /// 按设备表创建驱动并注册
    pub fn build_registry(&self) -> Result<Arc<DeviceRegistry>, RegistryError> {
        let builder = self
            .devices
            .iter()
            .try_fold(DeviceRegistry::builder(), |builder, entry| entry.register(builder))?;
        Ok(builder.build())
    }
}
