//! 访问级别状态机
//!
//! `plan_transition` 是纯函数，只根据（当前级别，请求级别）计算需要的
//! 订阅/退订次数；`apply_transition` 在具体设备上执行计划。
//!
//! All 计两次订阅，Closed→All 作为一个整体：第二次订阅失败时回滚第一次，
//! 设备计数恢复原值。

use player_driver::{Device, DriverError};
use player_protocol::AccessLevel;
use tracing::warn;

/// 一次访问级别切换的计划
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// 需要追加的订阅次数
    pub subscribe: u32,
    /// 需要释放的订阅次数
    pub unsubscribe: u32,
    /// 成功后的访问级别
    pub target: AccessLevel,
}

/// 计算切换计划
///
/// 请求 `Error` 不是合法请求，返回 `None`。
pub fn plan_transition(current: AccessLevel, requested: AccessLevel) -> Option<Transition> {
    if requested == AccessLevel::Error {
        return None;
    }

    let held = current.subscriptions();
    let wanted = requested.subscriptions();
    Some(Transition {
        subscribe: wanted.saturating_sub(held),
        unsubscribe: held.saturating_sub(wanted),
        target: requested,
    })
}

/// 可订阅的目标（`Device` 实现；测试中可替换为计数桩）
pub trait SubscriptionTarget {
    fn subscribe(&self) -> Result<(), DriverError>;
    fn unsubscribe(&self) -> Result<(), DriverError>;
}

impl SubscriptionTarget for Device {
    fn subscribe(&self) -> Result<(), DriverError> {
        Device::subscribe(self)
    }

    fn unsubscribe(&self) -> Result<(), DriverError> {
        Device::unsubscribe(self)
    }
}

/// 执行结果
#[derive(Debug)]
pub struct Outcome {
    /// 会话此后对设备持有的级别
    pub state: AccessLevel,
    /// 回复给客户端的级别
    pub granted: AccessLevel,
    /// 订阅或退订过程中的驱动错误
    pub error: Option<DriverError>,
}

impl Outcome {
    /// 请求是否失败（需要回复 Nack）
    pub fn failed(&self) -> bool {
        self.granted == AccessLevel::Error
    }
}

/// 在目标上执行切换
///
/// - 订阅失败：回滚本次已成功的订阅；原先未打开时级别变为 `Error`，
///   原先已打开（Read/Write→All）时级别不变
/// - 退订失败：只记录错误，设备计数已释放，级别照常更新
pub fn apply_transition<T: SubscriptionTarget + ?Sized>(
    target: &T,
    current: AccessLevel,
    requested: AccessLevel,
) -> Outcome {
    let Some(plan) = plan_transition(current, requested) else {
        return Outcome {
            state: current,
            granted: AccessLevel::Error,
            error: None,
        };
    };

    for done in 0..plan.subscribe {
        if let Err(e) = target.subscribe() {
            for _ in 0..done {
                if let Err(rollback) = target.unsubscribe() {
                    warn!("rollback unsubscribe failed: {}", rollback);
                }
            }
            let state = if current.is_open() {
                current
            } else {
                AccessLevel::Error
            };
            return Outcome {
                state,
                granted: AccessLevel::Error,
                error: Some(e),
            };
        }
    }

    let mut error = None;
    for _ in 0..plan.unsubscribe {
        if let Err(e) = target.unsubscribe() {
            error = Some(e);
        }
    }

    Outcome {
        state: plan.target,
        granted: plan.target,
        error,
    }
}
