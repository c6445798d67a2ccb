//! # Player Client
//!
//! Player 设备服务器的同步客户端
//!
//! ## 模块
//!
//! - `client`: 连接、读写、请求应答和控制设备调用
//! - `proxy`: 设备代理（每个设备最近一次的数据）
//! - `config`: 超时与消息长度上限
//!
//! ## 使用方式
//!
//! 客户端不启动后台线程。调用者循环调用 [`PlayerClient::read`]，
//! 每次读入一批数据（以 Synch 结束），再从代理中取值。

pub mod client;
pub mod config;
mod error;
pub mod proxy;

pub use client::{DeviceInfo, PlayerClient, Reply};
pub use config::ClientConfig;
pub use error::ClientError;
pub use proxy::{CounterProxy, Proxy, ProxyInfo, RawProxy};
