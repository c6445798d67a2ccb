//! 驱动能力接口

use crate::{DeviceIo, DriverError};

/// 驱动能力接口
///
/// 具体硬件驱动（激光、相机、底盘……）实现该 trait 后注册到 `DeviceRegistry`。
/// `Device` 在订阅计数 0→1 时调用 `setup`，1→0 时调用 `shutdown`；
/// 两者都在不持有设备锁的情况下调用，可以执行阻塞的硬件初始化。
///
/// 需要持续产生数据的驱动通常在 `setup` 中用 [`DriverThread`](crate::DriverThread)
/// 启动自己的线程，并在 `shutdown` 中停止它。
///
/// # 示例
///
/// ```rust
/// use player_driver::{DeviceIo, Driver, DriverError};
/// use player_protocol::Timestamp;
///
/// struct Constant {
///     io: Option<DeviceIo>,
/// }
///
/// impl Driver for Constant {
///     fn name(&self) -> &str {
///         "constant"
///     }
///
///     fn setup(&mut self, io: DeviceIo) -> Result<(), DriverError> {
///         io.put_data(vec![42u8], Timestamp::now());
///         self.io = Some(io);
///         Ok(())
///     }
///
///     fn shutdown(&mut self) -> Result<(), DriverError> {
///         self.io = None;
///         Ok(())
///     }
/// }
/// ```
pub trait Driver: Send + 'static {
    /// 驱动名（用于设备列表和驱动信息查询）
    fn name(&self) -> &str;

    /// 第一个订阅者到来时调用
    ///
    /// 返回错误时订阅计数保持不变。
    fn setup(&mut self, io: DeviceIo) -> Result<(), DriverError>;

    /// 最后一个订阅者离开时调用
    fn shutdown(&mut self) -> Result<(), DriverError>;

    /// 同时允许的最大订阅次数（`None` 表示不限）
    ///
    /// 独占设备返回 `Some(1)`，此时 All 访问（计两次）无法获得。
    fn max_subscribers(&self) -> Option<u32> {
        None
    }
}
