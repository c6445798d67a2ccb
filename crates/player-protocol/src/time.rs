//! 时间戳（秒 + 微秒）

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 线协议时间戳
///
/// 按 `(sec, usec)` 字典序比较，`usec` 始终小于 1_000_000。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timestamp {
    pub sec: u32,
    pub usec: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { sec: 0, usec: 0 };

    /// 构造时间戳，`usec` 溢出部分进位到秒
    pub fn new(sec: u32, usec: u32) -> Self {
        Self {
            sec: sec.saturating_add(usec / 1_000_000),
            usec: usec % 1_000_000,
        }
    }

    /// 当前系统时间
    pub fn now() -> Self {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Self::from_duration(since_epoch)
    }

    /// 从 UNIX 纪元起经过的时长构造
    pub fn from_duration(d: Duration) -> Self {
        Self {
            sec: d.as_secs().min(u32::MAX as u64) as u32,
            usec: d.subsec_micros(),
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.sec as u64) + Duration::from_micros(self.usec as u64)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.usec as f64 / 1e6
    }

    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.usec == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.sec, self.usec)
    }
}
