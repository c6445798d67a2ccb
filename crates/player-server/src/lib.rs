//! # Player Server
//!
//! 设备服务端：把 `DeviceRegistry` 中的设备通过 TCP 暴露给客户端。
//!
//! ## 模块
//!
//! - `access`: 访问级别切换（纯函数计划 + 全有或全无执行）
//! - `delivery`: Push/Pull 投递节拍
//! - `session`: 每连接的会话（读线程 + 写线程）
//! - `server`: 监听与 accept
//! - `config`: 服务端配置
//!
//! ## 线程模型
//!
//! 每个驱动一个线程，每个会话一个读线程和一个写线程，每个监听端口一个
//! accept 线程。会话之间只通过 `Device` 的锁协调。

pub mod access;
pub mod config;
pub mod delivery;
mod error;
pub mod server;
pub mod session;

pub use access::{Outcome, SubscriptionTarget, Transition, apply_transition, plan_transition};
pub use config::ServerConfig;
pub use delivery::DeliveryGate;
pub use error::{ServerError, SessionError};
pub use server::Server;
pub use session::{ClientSession, SessionHandle};
