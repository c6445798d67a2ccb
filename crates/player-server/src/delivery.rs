//! 数据投递节拍
//!
//! 写线程在 `DeliveryGate` 上等待下一次投递：
//! - Push 模式按频率触发
//! - Pull 模式每收到一次数据请求触发一次；写线程醒来前的多次请求合并为一次

use parking_lot::{Condvar, Mutex, MutexGuard};
use player_protocol::DataMode;
use std::time::{Duration, Instant};

/// 小于该值的剩余等待改用 spin_sleep，减少节拍抖动
const SPIN_THRESHOLD: Duration = Duration::from_millis(2);

#[derive(Debug)]
struct GateState {
    mode: DataMode,
    frequency_hz: u16,
    data_requested: bool,
    shutdown: bool,
}

/// 数据就绪门（mutex + condvar）
#[derive(Debug)]
pub struct DeliveryGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl DeliveryGate {
    /// `frequency_hz` 为 0 时按 1 Hz 处理
    pub fn new(mode: DataMode, frequency_hz: u16) -> Self {
        Self {
            state: Mutex::new(GateState {
                mode,
                frequency_hz: frequency_hz.max(1),
                data_requested: false,
                shutdown: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn mode(&self) -> DataMode {
        self.state.lock().mode
    }

    pub fn frequency_hz(&self) -> u16 {
        self.state.lock().frequency_hz
    }

    /// 切换投递模式（丢弃尚未处理的数据请求）
    pub fn set_mode(&self, mode: DataMode) {
        self.update(|s| {
            s.mode = mode;
            s.data_requested = false;
        });
    }

    /// 设置推送频率；0 被拒绝并返回 `false`
    pub fn set_frequency(&self, hz: u16) -> bool {
        if hz == 0 {
            return false;
        }
        self.update(|s| s.frequency_hz = hz);
        true
    }

    /// 数据请求（仅 Pull 模式生效）
    pub fn request_data(&self) {
        self.update(|s| {
            if s.mode.is_pull() {
                s.data_requested = true;
            }
        });
    }

    /// 唤醒并停止写线程
    pub fn shutdown(&self) {
        self.update(|s| s.shutdown = true);
    }

    fn update(&self, f: impl FnOnce(&mut GateState)) {
        f(&mut self.state.lock());
        self.changed.notify_all();
    }

    /// 等待下一次投递
    ///
    /// 返回本次投递使用的模式；门已关闭时返回 `None`。
    /// `next_due` 是写线程维护的下一个推送时刻。
    pub fn wait_next(&self, next_due: &mut Instant) -> Option<DataMode> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }

            if state.mode.is_pull() {
                if state.data_requested {
                    state.data_requested = false;
                    return Some(state.mode);
                }
                self.changed.wait(&mut state);
                continue;
            }

            let now = Instant::now();
            if now >= *next_due {
                let period = Duration::from_secs_f64(1.0 / f64::from(state.frequency_hz));
                // 落后超过一个周期时不补发
                *next_due = (*next_due + period).max(now);
                return Some(state.mode);
            }

            let remaining = *next_due - now;
            if remaining <= SPIN_THRESHOLD {
                MutexGuard::unlocked(&mut state, || spin_sleep::sleep(remaining));
            } else {
                self.changed.wait_for(&mut state, remaining - SPIN_THRESHOLD);
            }
        }
    }
}
