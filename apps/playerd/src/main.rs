//! # playerd
//!
//! Player 设备服务器守护进程：按配置文件注册仿真设备，在各端口上接受客户端连接。
//!
//! ```bash
//! # 默认设备（6665 端口上的计数设备和回显设备）
//! playerd
//!
//! # 使用配置文件，覆盖端口和频率
//! playerd --config playerd.toml --port 7000 --frequency 20
//! ```

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::FileConfig;
use player_server::Server;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Player 设备服务器
#[derive(Parser, Debug)]
#[command(name = "playerd")]
#[command(about = "Player device server with simulated drivers", long_about = None)]
#[command(version)]
struct Args {
    /// TOML 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 监听端口（所有设备移到该端口）
    #[arg(short, long)]
    port: Option<u16>,

    /// 新会话的推送频率（Hz）
    #[arg(short, long)]
    frequency: Option<u16>,

    /// 认证密钥
    #[arg(long)]
    auth_key: Option<String>,

    /// 日志级别（`RUST_LOG` 优先）
    #[arg(long)]
    log_level: Option<String>,
}

/// 初始化日志
///
/// `RUST_LOG` 未设置时使用给定级别；`log` crate 的记录也转发到 tracing。
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_log::LogTracer::init().context("failed to install log bridge")?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to install subscriber")
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut file_config = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let level = args
        .log_level
        .clone()
        .or_else(|| file_config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level)?;

    if file_config.devices.is_empty() {
        warn!("no devices configured, using the default counter and echo devices");
        file_config.devices = FileConfig::default_devices();
    }

    // 命令行覆盖配置文件
    if let Some(port) = args.port {
        file_config.override_port(port);
    }
    if let Some(hz) = args.frequency {
        file_config.server.default_frequency_hz = hz;
    }
    if let Some(key) = args.auth_key {
        file_config.server.auth_key = Some(key);
    }

    let registry = file_config.build_registry().context("invalid device table")?;
    for device in registry.iter() {
        info!("device {} ({})", device.address(), device.driver_name());
    }

    let server = Server::bind(file_config.server, registry).context("failed to start server")?;
    info!("playerd started on ports {:?}, press Ctrl+C to stop", server.ports());

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("failed to set signal handler")?;

    // 发送端随信号处理器常驻，recv 只会因为 Ctrl+C 返回
    let _ = stop_rx.recv();
    info!("received interrupt signal, shutting down");
    server.shutdown();
    Ok(())
}
