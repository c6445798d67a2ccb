//! 驱动后台线程
//!
//! 多数驱动需要一个持续运行的线程（轮询硬件、发布数据、处理命令与配置）。
//! `DriverThread` 负责命名线程的创建、停止信号和带超时的 join。

use crate::DriverError;
use crossbeam_channel::RecvTimeoutError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Drop 时等待线程退出的超时
const DROP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 停止信号（驱动线程循环检查）
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否已请求停止
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// 请求停止
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> Result<(), DriverError>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> Result<(), DriverError> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        // watchdog 线程代为 join，超时后继续在后台等待
        thread::spawn(move || {
            let _ = tx.send(self.join().is_ok());
        });

        match rx.recv_timeout(timeout) {
            Ok(true) => Ok(()),
            Ok(false) => Err(DriverError::ThreadJoin("driver thread panicked".into())),
            Err(RecvTimeoutError::Timeout) => Err(DriverError::ThreadJoin(format!(
                "driver thread did not exit within {:?}",
                timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(DriverError::ThreadJoin("watchdog disconnected".into()))
            },
        }
    }
}

/// 驱动后台线程句柄
///
/// # 示例
///
/// ```rust
/// use player_driver::DriverThread;
/// use std::time::Duration;
///
/// let mut worker = DriverThread::spawn("demo", |stop| {
///     while !stop.is_stopped() {
///         std::thread::sleep(Duration::from_millis(1));
///     }
/// })
/// .unwrap();
/// worker.stop(Duration::from_secs(1)).unwrap();
/// ```
#[derive(Debug)]
pub struct DriverThread {
    name: String,
    stop: StopFlag,
    handle: Option<JoinHandle<()>>,
}

impl DriverThread {
    /// 启动命名线程
    ///
    /// 线程名为 `driver-<name>`；启用 `realtime` feature 时尝试提升线程优先级。
    pub fn spawn<F>(name: &str, body: F) -> Result<Self, DriverError>
    where
        F: FnOnce(StopFlag) + Send + 'static,
    {
        let stop = StopFlag::new();
        let thread_stop = stop.clone();
        let thread_name = format!("driver-{}", name);

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                #[cfg(feature = "realtime")]
                {
                    use thread_priority::*;

                    match set_current_thread_priority(ThreadPriority::Max) {
                        Ok(_) => tracing::info!("driver thread priority set to MAX (realtime)"),
                        Err(e) => tracing::warn!(
                            "Failed to set driver thread priority: {}. \
                            On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                            e
                        ),
                    }
                }

                body(thread_stop);
            })
            .map_err(|e| DriverError::ThreadSpawn(e.to_string()))?;

        debug!("spawned thread '{}'", thread_name);
        Ok(Self {
            name: thread_name,
            stop,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 线程是否仍在运行
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 发出停止信号并等待线程退出
    ///
    /// 重复调用为空操作。
    pub fn stop(&mut self, timeout: Duration) -> Result<(), DriverError> {
        self.stop.stop();
        match self.handle.take() {
            Some(handle) => handle.join_timeout(timeout),
            None => Ok(()),
        }
    }
}

impl Drop for DriverThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop(DROP_JOIN_TIMEOUT) {
            error!("[{}] {}", self.name, e);
        }
    }
}
