//! 仿真驱动（无硬件的测试与演示）
//!
//! - `CounterDriver`：按固定周期发布递增计数（大端 u32），确认所有配置请求
//! - `EchoDriver`：把收到的最新命令作为数据发布，配置请求原样回显
//! - `FailingDriver`：setup 总是失败

use crate::{DeviceIo, Driver, DriverError, DriverThread};
use bytes::Bytes;
use player_protocol::Timestamp;
use std::time::Duration;

const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// 回显驱动等待工作的最长时间（也是检查停止信号的周期）
const ECHO_POLL: Duration = Duration::from_millis(20);

/// 把队列中所有配置请求原样确认
fn echo_configs(io: &DeviceIo) {
    while let Some(request) = io.get_config() {
        let payload = request.payload().clone();
        request.ack(payload);
    }
}

fn stop_thread(thread: &mut Option<DriverThread>) -> Result<(), DriverError> {
    match thread.take() {
        Some(mut thread) => thread.stop(JOIN_TIMEOUT),
        None => Ok(()),
    }
}

// ============================================================================
// CounterDriver
// ============================================================================

/// 周期计数驱动
#[derive(Debug)]
pub struct CounterDriver {
    period: Duration,
    exclusive: bool,
    thread: Option<DriverThread>,
}

impl CounterDriver {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            exclusive: false,
            thread: None,
        }
    }

    /// 独占设备（最多一个订阅）
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

impl Driver for CounterDriver {
    fn name(&self) -> &str {
        "counter"
    }

    fn setup(&mut self, io: DeviceIo) -> Result<(), DriverError> {
        let period = self.period;
        let name = format!("counter-{}", io.address());
        let thread = DriverThread::spawn(&name, move |stop| {
            let mut counter: u32 = 0;
            while !stop.is_stopped() {
                counter = counter.wrapping_add(1);
                io.put_data(Bytes::copy_from_slice(&counter.to_be_bytes()), Timestamp::now());
                echo_configs(&io);
                spin_sleep::sleep(period);
            }
        })?;
        self.thread = Some(thread);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), DriverError> {
        stop_thread(&mut self.thread)
    }

    fn max_subscribers(&self) -> Option<u32> {
        self.exclusive.then_some(1)
    }
}

// ============================================================================
// EchoDriver
// ============================================================================

/// 命令回显驱动
///
/// 收到命令前不产生数据。
#[derive(Debug, Default)]
pub struct EchoDriver {
    exclusive: bool,
    thread: Option<DriverThread>,
}

impl EchoDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 独占设备（最多一个订阅）
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

impl Driver for EchoDriver {
    fn name(&self) -> &str {
        "echo"
    }

    fn setup(&mut self, io: DeviceIo) -> Result<(), DriverError> {
        let name = format!("echo-{}", io.address());
        let thread = DriverThread::spawn(&name, move |stop| {
            while !stop.is_stopped() {
                if !io.wait_for_work(ECHO_POLL) {
                    continue;
                }
                if let Some(command) = io.get_command()
                    && command.fresh
                {
                    io.put_data(command.payload, command.timestamp);
                }
                echo_configs(&io);
            }
        })?;
        self.thread = Some(thread);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), DriverError> {
        stop_thread(&mut self.thread)
    }

    fn max_subscribers(&self) -> Option<u32> {
        self.exclusive.then_some(1)
    }
}

// ============================================================================
// FailingDriver
// ============================================================================

/// setup 总是失败的驱动
#[derive(Debug, Default)]
pub struct FailingDriver;

impl Driver for FailingDriver {
    fn name(&self) -> &str {
        "failing"
    }

    fn setup(&mut self, _io: DeviceIo) -> Result<(), DriverError> {
        Err(DriverError::SetupFailed("simulated hardware fault".into()))
    }

    fn shutdown(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}
