//! TCP 服务端
//!
//! 每个监听端口一个 accept 线程；每个连接交给一个 `ClientSession`。

use crate::{ClientSession, ServerConfig, ServerError, SessionHandle};
use parking_lot::Mutex;
use player_driver::DeviceRegistry;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// accept 轮询间隔（监听 socket 为非阻塞模式，以便响应停止信号）
const ACCEPT_POLL: Duration = Duration::from_millis(20);

struct Listener {
    port: u16,
    local_addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
}

/// accept 线程共享的上下文
#[derive(Clone)]
struct AcceptContext {
    registry: Arc<DeviceRegistry>,
    config: Arc<ServerConfig>,
    sessions: Arc<Mutex<Vec<SessionHandle>>>,
    stop: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

/// 设备服务端
///
/// # 示例
///
/// ```rust,no_run
/// use player_driver::DeviceRegistry;
/// use player_server::{Server, ServerConfig};
///
/// let registry = DeviceRegistry::builder().build();
/// let config = ServerConfig {
///     ports: vec![6665],
///     ..ServerConfig::default()
/// };
/// let server = Server::bind(config, registry).unwrap();
/// server.shutdown();
/// ```
pub struct Server {
    context: AcceptContext,
    listeners: Vec<Listener>,
}

impl Server {
    /// 按配置绑定所有端口并开始接受连接
    ///
    /// `config.ports` 为空时监听设备表中出现的全部端口。
    pub fn bind(config: ServerConfig, registry: Arc<DeviceRegistry>) -> Result<Self, ServerError> {
        let ports = if config.ports.is_empty() {
            registry.ports()
        } else {
            config.ports.clone()
        };

        let mut listeners = Vec::with_capacity(ports.len());
        for port in ports {
            let addr = format!("{}:{}", config.bind_address, port);
            let listener =
                TcpListener::bind(&addr).map_err(|source| ServerError::Bind { addr, source })?;
            listeners.push((port, listener));
        }
        Self::with_listeners(config, registry, listeners)
    }

    /// 使用已绑定的监听 socket 启动
    ///
    /// 每项为 `(逻辑端口, listener)`：逻辑端口决定设备寻址，
    /// 与 listener 实际绑定的端口可以不同（测试中绑定临时端口）。
    pub fn with_listeners(
        config: ServerConfig,
        registry: Arc<DeviceRegistry>,
        listeners: Vec<(u16, TcpListener)>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        if listeners.is_empty() {
            return Err(ServerError::InvalidConfig("no ports to listen on".into()));
        }

        let context = AcceptContext {
            registry,
            config: Arc::new(config),
            sessions: Arc::new(Mutex::new(Vec::new())),
            stop: Arc::new(AtomicBool::new(false)),
            next_id: Arc::new(AtomicU64::new(1)),
        };

        let mut server = Server {
            context,
            listeners: Vec::with_capacity(listeners.len()),
        };

        for (port, listener) in listeners {
            let local_addr = listener.local_addr()?;
            listener.set_nonblocking(true)?;

            let ctx = server.context.clone();
            let thread = thread::Builder::new()
                .name(format!("accept-{}", port))
                .spawn(move || accept_loop(port, listener, ctx))
                .map_err(|e| ServerError::ThreadSpawn(e.to_string()))?;

            info!("listening on {} (port {})", local_addr, port);
            server.listeners.push(Listener {
                port,
                local_addr,
                thread: Some(thread),
            });
        }

        Ok(server)
    }

    /// 逻辑端口对应的实际监听地址
    pub fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.port == port)
            .map(|l| l.local_addr)
    }

    pub fn ports(&self) -> Vec<u16> {
        self.listeners.iter().map(|l| l.port).collect()
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.context.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// 仍在运行的会话数
    pub fn session_count(&self) -> usize {
        let mut sessions = self.context.sessions.lock();
        prune_finished(&mut sessions);
        sessions.iter().filter(|h| !h.session().is_closed()).count()
    }

    /// 停止接受连接并关闭所有会话
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.context.stop.swap(true, Ordering::AcqRel) {
            return;
        }

        for listener in &mut self.listeners {
            if let Some(handle) = listener.thread.take()
                && handle.join().is_err()
            {
                error!("accept thread for port {} panicked", listener.port);
            }
        }

        let sessions = std::mem::take(&mut *self.context.sessions.lock());
        let count = sessions.len();
        for handle in sessions {
            handle.close();
        }
        info!("server stopped, closed {} sessions", count);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 移除读写线程都已退出的会话
fn prune_finished(sessions: &mut Vec<SessionHandle>) {
    sessions.retain(|h| !h.is_finished());
}

fn accept_loop(port: u16, listener: TcpListener, ctx: AcceptContext) {
    while !ctx.stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!("failed to configure connection from {}: {}", peer, e);
                    continue;
                }

                let id = ctx.next_id.fetch_add(1, Ordering::Relaxed);
                match ClientSession::start(
                    stream,
                    port,
                    id,
                    Arc::clone(&ctx.registry),
                    Arc::clone(&ctx.config),
                ) {
                    Ok(handle) => {
                        let mut sessions = ctx.sessions.lock();
                        prune_finished(&mut sessions);
                        sessions.push(handle);
                    },
                    Err(source) => {
                        let err = ServerError::Session { peer, source };
                        warn!("{}", err);
                    },
                }
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                // 空闲时也回收已结束的会话
                prune_finished(&mut ctx.sessions.lock());
                spin_sleep::sleep(ACCEPT_POLL);
            },
            Err(e) => {
                warn!("accept on port {} failed: {}", port, e);
                spin_sleep::sleep(ACCEPT_POLL);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;
    use std::time::Instant;

    #[test]
    fn test_empty_listener_set_rejected() {
        let registry = DeviceRegistry::builder().build();
        let result = Server::with_listeners(ServerConfig::default(), registry, Vec::new());
        assert!(matches!(result, Err(ServerError::InvalidConfig(_))));
    }

    #[test]
    fn test_logical_port_mapping() {
        let registry = DeviceRegistry::builder().build();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let actual = listener.local_addr().unwrap();

        let server =
            Server::with_listeners(ServerConfig::default(), registry, vec![(6665, listener)])
                .unwrap();
        assert_eq!(server.ports(), vec![6665]);
        assert_eq!(server.local_addr(6665), Some(actual));
        assert_eq!(server.local_addr(7000), None);
        assert_eq!(server.session_count(), 0);
        server.shutdown();
    }

    #[test]
    fn test_finished_sessions_pruned_while_idle() {
        let registry = DeviceRegistry::builder().build();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server =
            Server::with_listeners(ServerConfig::default(), registry, vec![(6665, listener)])
                .unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        player_protocol::read_banner(&mut client).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while server.context.sessions.lock().is_empty() {
            assert!(Instant::now() < deadline, "session never registered");
            thread::sleep(Duration::from_millis(5));
        }

        drop(client);
        // 之后没有新连接，只能靠空闲轮询回收
        while !server.context.sessions.lock().is_empty() {
            assert!(Instant::now() < deadline, "finished session was never pruned");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(server.session_count(), 0);
        server.shutdown();
    }

    #[test]
    fn test_bind_conflict_reports_address() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = ServerConfig {
            bind_address: "127.0.0.1".into(),
            ports: vec![port],
            ..ServerConfig::default()
        };
        let registry = DeviceRegistry::builder().build();
        match Server::bind(config, registry) {
            Err(ServerError::Bind { addr, .. }) => assert!(addr.ends_with(&port.to_string())),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("bind should fail"),
        }
    }
}
