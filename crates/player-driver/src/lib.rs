//! 驱动层模块
//!
//! 本模块提供 Player 设备服务器的设备同步层，包括：
//! - `Driver` 能力接口（setup/shutdown 钩子）
//! - `Device`：单设备同步单元（最新值数据/命令缓冲、FIFO 配置队列、订阅计数）
//! - `DeviceIo`：驱动侧句柄（写数据、读命令、取配置请求）
//! - `DriverThread`：每驱动一个后台线程
//! - `DeviceRegistry`：启动时构建、之后只读的设备表
//!
//! # 锁策略
//!
//! 每个 `Device` 只有一把锁，仅在修改缓冲区/计数时持有，
//! 从不跨越驱动调用持有，因此一个慢驱动不会阻塞其他设备。

mod device;
mod driver;
mod error;
pub mod registry;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod thread;

pub use device::{
    CommandSnapshot, ConfigReply, ConfigTicket, DataSnapshot, Device, DeviceIo, PendingRequest,
};
pub use driver::Driver;
pub use error::{DriverError, RegistryError};
pub use registry::{DeviceRegistry, DeviceRegistryBuilder};
pub use thread::{DriverThread, StopFlag};
