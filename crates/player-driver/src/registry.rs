//! 设备表
//!
//! 启动时用 `DeviceRegistryBuilder` 构建，之后只读、在所有会话间共享。

use crate::{Device, Driver, RegistryError};
use player_protocol::{CONTROL_CODE, DeviceAddress};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// 只读设备表
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<DeviceAddress, Arc<Device>>,
}

impl DeviceRegistry {
    pub fn builder() -> DeviceRegistryBuilder {
        DeviceRegistryBuilder::default()
    }

    /// 按地址查找
    pub fn get(&self, address: &DeviceAddress) -> Option<&Arc<Device>> {
        self.devices.get(address)
    }

    /// 按地址顺序遍历所有设备
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    /// 某端口上的设备（按 code、index 排序）
    pub fn on_port(&self, port: u16) -> impl Iterator<Item = &Arc<Device>> {
        self.devices
            .range(DeviceAddress::new(port, 0, 0)..=DeviceAddress::new(port, u16::MAX, u16::MAX))
            .map(|(_, dev)| dev)
    }

    /// 所有出现过的端口（去重、升序）
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.devices.keys().map(|a| a.port).collect();
        ports.dedup();
        ports
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// 设备表构建器
#[derive(Debug, Default)]
pub struct DeviceRegistryBuilder {
    devices: BTreeMap<DeviceAddress, Arc<Device>>,
}

impl DeviceRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册驱动
    pub fn add<D: Driver>(self, address: DeviceAddress, driver: D) -> Result<Self, RegistryError> {
        self.add_boxed(address, Box::new(driver))
    }

    /// 注册已装箱的驱动
    pub fn add_boxed(
        mut self,
        address: DeviceAddress,
        driver: Box<dyn Driver>,
    ) -> Result<Self, RegistryError> {
        if address.code == CONTROL_CODE {
            return Err(RegistryError::Reserved(address));
        }
        if self.devices.contains_key(&address) {
            return Err(RegistryError::Duplicate(address));
        }
        info!("registered device {} ({})", address, driver.name());
        self.devices
            .insert(address, Arc::new(Device::new(address, driver)));
        Ok(self)
    }

    pub fn build(self) -> Arc<DeviceRegistry> {
        Arc::new(DeviceRegistry {
            devices: self.devices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceIo, DriverError};

    struct Named(&'static str);

    impl Driver for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn setup(&mut self, _io: DeviceIo) -> Result<(), DriverError> {
            Ok(())
        }

        fn shutdown(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    fn sample() -> Arc<DeviceRegistry> {
        DeviceRegistry::builder()
            .add(DeviceAddress::new(6666, 4, 0), Named("sonar"))
            .unwrap()
            .add(DeviceAddress::new(6665, 7, 1), Named("laser-b"))
            .unwrap()
            .add(DeviceAddress::new(6665, 7, 0), Named("laser-a"))
            .unwrap()
            .add(DeviceAddress::new(6665, 4, 0), Named("position"))
            .unwrap()
            .build()
    }

    #[test]
    fn test_lookup() {
        let registry = sample();
        assert_eq!(registry.len(), 4);
        assert!(!registry.is_empty());

        let dev = registry.get(&DeviceAddress::new(6665, 7, 1)).unwrap();
        assert_eq!(dev.driver_name(), "laser-b");
        assert!(registry.get(&DeviceAddress::new(6665, 7, 9)).is_none());
    }

    #[test]
    fn test_on_port_is_ordered() {
        let registry = sample();
        let names: Vec<_> = registry.on_port(6665).map(|d| d.driver_name()).collect();
        assert_eq!(names, vec!["position", "laser-a", "laser-b"]);
        assert_eq!(registry.on_port(7000).count(), 0);
        assert_eq!(registry.ports(), vec![6665, 6666]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = DeviceRegistry::builder()
            .add(DeviceAddress::new(6665, 7, 0), Named("a"))
            .unwrap()
            .add(DeviceAddress::new(6665, 7, 0), Named("b"))
            .unwrap_err();
        assert_eq!(err, RegistryError::Duplicate(DeviceAddress::new(6665, 7, 0)));
    }

    #[test]
    fn test_control_code_reserved() {
        let err = DeviceRegistry::builder()
            .add(DeviceAddress::new(6665, CONTROL_CODE, 0), Named("x"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Reserved(_)));
    }

    #[test]
    fn test_empty_registry() {
        let registry = DeviceRegistry::builder().build();
        assert!(registry.is_empty());
        assert!(registry.ports().is_empty());
    }
}
