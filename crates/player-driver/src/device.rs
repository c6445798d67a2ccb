//! 设备同步单元
//!
//! `Device` 包装一个驱动，维护：
//! - 数据缓冲（最新一帧 + 时间戳，覆盖写，无历史）
//! - 命令缓冲（最新一条命令，覆盖写）
//! - 配置队列（FIFO，每项带一个应答通道）
//! - 订阅计数（0→1 调用 `setup`，1→0 调用 `shutdown`）
//!
//! 所有缓冲和计数都由同一把锁保护，且该锁从不跨越驱动调用持有。
//! setup/shutdown 进行期间，其他订阅者在条件变量上等待（等待时释放锁），
//! 不会看到初始化到一半的驱动。

use crate::{Driver, DriverError};
use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use player_protocol::{DeviceAddress, ReplyKind, Timestamp};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 数据缓冲快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSnapshot {
    pub payload: Bytes,
    /// 数据产生时间
    pub timestamp: Timestamp,
    /// 单调递增的写入序号（从 1 开始），用于判断是否为新数据
    pub seq: u64,
}

/// 命令缓冲快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSnapshot {
    pub payload: Bytes,
    pub timestamp: Timestamp,
    /// 自上次 `get_command` 以来是否被重新写入
    pub fresh: bool,
}

/// 驱动对配置请求的应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigReply {
    pub kind: ReplyKind,
    pub payload: Bytes,
}

impl ConfigReply {
    fn nack() -> Self {
        Self {
            kind: ReplyKind::Nack,
            payload: Bytes::new(),
        }
    }
}

/// 驱动从配置队列取出的一项请求
///
/// 驱动必须通过 `ack`/`nack` 应答；未应答就被丢弃时自动回复 Nack，
/// 等待中的会话不会永远收不到结果。
pub struct PendingRequest {
    payload: Bytes,
    reply_tx: Option<Sender<ConfigReply>>,
}

impl PendingRequest {
    /// 请求负载
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// 成功应答
    pub fn ack(self, payload: impl Into<Bytes>) {
        self.respond(ReplyKind::Ack, payload.into());
    }

    /// 失败应答
    pub fn nack(self, payload: impl Into<Bytes>) {
        self.respond(ReplyKind::Nack, payload.into());
    }

    fn respond(mut self, kind: ReplyKind, payload: Bytes) {
        if let Some(tx) = self.reply_tx.take() {
            // 会话可能已超时离开，忽略发送失败
            let _ = tx.send(ConfigReply { kind, payload });
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if let Some(tx) = self.reply_tx.take() {
            let _ = tx.send(ConfigReply::nack());
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("payload_len", &self.payload.len())
            .field("answered", &self.reply_tx.is_none())
            .finish()
    }
}

/// 配置请求的应答凭据（会话侧）
#[derive(Debug)]
pub struct ConfigTicket {
    rx: Receiver<ConfigReply>,
}

impl ConfigTicket {
    /// 等待驱动应答
    ///
    /// 超时返回 `None`。
    pub fn wait(&self, timeout: Duration) -> Option<ConfigReply> {
        match self.rx.recv_timeout(timeout) {
            Ok(reply) => Some(reply),
            Err(RecvTimeoutError::Timeout) => None,
            // 发送端只会在回复后消失，这里按失败处理
            Err(RecvTimeoutError::Disconnected) => Some(ConfigReply::nack()),
        }
    }
}

/// 设备生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Starting,
    Running,
    Stopping,
}

struct DeviceState {
    data: Option<DataSnapshot>,
    next_seq: u64,
    command: Option<CommandSnapshot>,
    config_queue: VecDeque<PendingRequest>,
    subscribers: u32,
    lifecycle: Lifecycle,
    /// setup/shutdown 期间被取出，调用结束后放回
    driver: Option<Box<dyn Driver>>,
}

struct DeviceShared {
    state: Mutex<DeviceState>,
    /// 生命周期切换完成
    lifecycle_changed: Condvar,
    /// 有新命令或新配置请求
    work_ready: Condvar,
}

/// 单个设备
pub struct Device {
    address: DeviceAddress,
    driver_name: String,
    max_subscribers: Option<u32>,
    shared: Arc<DeviceShared>,
}

impl Device {
    /// 用驱动创建设备
    pub fn new(address: DeviceAddress, driver: Box<dyn Driver>) -> Self {
        let driver_name = driver.name().to_string();
        let max_subscribers = driver.max_subscribers();
        Self {
            address,
            driver_name,
            max_subscribers,
            shared: Arc::new(DeviceShared {
                state: Mutex::new(DeviceState {
                    data: None,
                    next_seq: 1,
                    command: None,
                    config_queue: VecDeque::new(),
                    subscribers: 0,
                    lifecycle: Lifecycle::Idle,
                    driver: Some(driver),
                }),
                lifecycle_changed: Condvar::new(),
                work_ready: Condvar::new(),
            }),
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// 当前订阅计数
    pub fn subscriber_count(&self) -> u32 {
        self.shared.state.lock().subscribers
    }

    /// 配置队列中尚未被驱动取走的请求数
    pub fn pending_configs(&self) -> usize {
        self.shared.state.lock().config_queue.len()
    }

    /// 驱动侧句柄
    pub fn io(&self) -> DeviceIo {
        DeviceIo {
            address: self.address,
            shared: Arc::clone(&self.shared),
        }
    }

    // ------------------------------------------------------------------
    // 订阅
    // ------------------------------------------------------------------

    /// 增加一次订阅
    ///
    /// 计数 0→1 时调用驱动 `setup`；失败时计数不变并返回错误。
    pub fn subscribe(&self) -> Result<(), DriverError> {
        let mut state = self.shared.state.lock();
        loop {
            match state.lifecycle {
                Lifecycle::Starting | Lifecycle::Stopping => {
                    self.shared.lifecycle_changed.wait(&mut state);
                },
                Lifecycle::Running => {
                    if let Some(limit) = self.max_subscribers
                        && state.subscribers >= limit
                    {
                        return Err(DriverError::SubscriberLimit { limit });
                    }
                    state.subscribers += 1;
                    debug!(
                        "[{}] subscribed, count = {}",
                        self.address, state.subscribers
                    );
                    return Ok(());
                },
                Lifecycle::Idle => break,
            }
        }

        if self.max_subscribers == Some(0) {
            return Err(DriverError::SubscriberLimit { limit: 0 });
        }

        state.lifecycle = Lifecycle::Starting;
        let mut driver = state.driver.take();
        drop(state);

        let result = match driver.as_mut() {
            Some(driver) => driver.setup(self.io()),
            None => Err(DriverError::SetupFailed("driver unavailable".into())),
        };

        let mut state = self.shared.state.lock();
        state.driver = driver;
        match &result {
            Ok(()) => {
                state.lifecycle = Lifecycle::Running;
                state.subscribers = 1;
                info!("[{}] driver '{}' started", self.address, self.driver_name);
            },
            Err(e) => {
                state.lifecycle = Lifecycle::Idle;
                warn!(
                    "[{}] driver '{}' setup failed: {}",
                    self.address, self.driver_name, e
                );
            },
        }
        drop(state);
        self.shared.lifecycle_changed.notify_all();
        result
    }

    /// 减少一次订阅
    ///
    /// 计数 1→0 时调用驱动 `shutdown`，并对队列中未被取走的配置请求回复 Nack。
    /// 计数已为 0 时为空操作。
    pub fn unsubscribe(&self) -> Result<(), DriverError> {
        let mut state = self.shared.state.lock();
        while matches!(state.lifecycle, Lifecycle::Starting | Lifecycle::Stopping) {
            self.shared.lifecycle_changed.wait(&mut state);
        }

        if state.subscribers == 0 {
            warn!("[{}] unsubscribe on idle device ignored", self.address);
            return Ok(());
        }

        state.subscribers -= 1;
        if state.subscribers > 0 {
            debug!(
                "[{}] unsubscribed, count = {}",
                self.address, state.subscribers
            );
            return Ok(());
        }

        state.lifecycle = Lifecycle::Stopping;
        let mut driver = state.driver.take();
        let orphaned: Vec<PendingRequest> = state.config_queue.drain(..).collect();
        state.command = None;
        drop(state);

        if !orphaned.is_empty() {
            debug!(
                "[{}] rejecting {} queued requests",
                self.address,
                orphaned.len()
            );
        }
        drop(orphaned);

        let result = match driver.as_mut() {
            Some(driver) => driver.shutdown(),
            None => Ok(()),
        };

        let mut state = self.shared.state.lock();
        state.driver = driver;
        state.lifecycle = Lifecycle::Idle;
        drop(state);
        self.shared.lifecycle_changed.notify_all();

        match &result {
            Ok(()) => info!("[{}] driver '{}' stopped", self.address, self.driver_name),
            Err(e) => warn!(
                "[{}] driver '{}' shutdown failed: {}",
                self.address, self.driver_name, e
            ),
        }
        result
    }

    // ------------------------------------------------------------------
    // 会话侧缓冲访问
    // ------------------------------------------------------------------

    /// 复制最新数据（尚未产生数据时为 `None`）
    pub fn get_data(&self) -> Option<DataSnapshot> {
        self.shared.state.lock().data.clone()
    }

    /// 覆盖写命令缓冲
    pub fn put_command(&self, payload: impl Into<Bytes>, timestamp: Timestamp) {
        let mut state = self.shared.state.lock();
        state.command = Some(CommandSnapshot {
            payload: payload.into(),
            timestamp,
            fresh: true,
        });
        drop(state);
        self.shared.work_ready.notify_all();
    }

    /// 追加配置请求，返回等待应答的凭据
    pub fn put_config(&self, payload: impl Into<Bytes>) -> ConfigTicket {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let request = PendingRequest {
            payload: payload.into(),
            reply_tx: Some(tx),
        };
        self.shared.state.lock().config_queue.push_back(request);
        self.shared.work_ready.notify_all();
        ConfigTicket { rx }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("address", &self.address)
            .field("driver", &self.driver_name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// 驱动侧句柄
///
/// 在 `setup` 时交给驱动，可克隆后移动到驱动线程。
#[derive(Clone)]
pub struct DeviceIo {
    address: DeviceAddress,
    shared: Arc<DeviceShared>,
}

impl DeviceIo {
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// 覆盖写数据缓冲
    pub fn put_data(&self, payload: impl Into<Bytes>, timestamp: Timestamp) {
        let mut state = self.shared.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.data = Some(DataSnapshot {
            payload: payload.into(),
            timestamp,
            seq,
        });
    }

    /// 读取最新命令，并清除其 `fresh` 标志
    pub fn get_command(&self) -> Option<CommandSnapshot> {
        let mut state = self.shared.state.lock();
        let command = state.command.as_mut()?;
        let snapshot = command.clone();
        command.fresh = false;
        Some(snapshot)
    }

    /// 取出最早的配置请求
    pub fn get_config(&self) -> Option<PendingRequest> {
        self.shared.state.lock().config_queue.pop_front()
    }

    /// 等待新命令或配置请求
    ///
    /// 返回 `true` 表示有待处理的工作。
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        if has_work(&state) {
            return true;
        }
        self.shared.work_ready.wait_for(&mut state, timeout);
        has_work(&state)
    }
}

fn has_work(state: &DeviceState) -> bool {
    !state.config_queue.is_empty() || state.command.as_ref().is_some_and(|c| c.fresh)
}

impl fmt::Debug for DeviceIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIo").field("address", &self.address).finish()
    }
}
