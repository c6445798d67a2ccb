//! 客户端会话
//!
//! 每个 TCP 连接一个会话，两个线程：
//! - 读线程：解析客户端消息，处理控制请求和订阅切换，转发命令和配置请求
//! - 写线程：在 `DeliveryGate` 上等待，然后把订阅设备的最新数据打包成一批发出
//!
//! 两个线程共享一把写锁（串行化 socket 写入）。任一线程出错都会触发
//! teardown，且 teardown 只执行一次：停止写线程、关闭 socket、释放全部订阅。

use crate::access::apply_transition;
use crate::delivery::DeliveryGate;
use crate::{ServerConfig, SessionError};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use player_driver::{Device, DeviceRegistry};
use player_protocol::{
    AccessLevel, CONTROL_DEVICE, ControlReply, ControlRequest, ControlSubtype, DataMode,
    DeviceGrant, DeviceId, DeviceRequest, Message, MessageType, ReplyKind, Timestamp, read_message,
    write_banner, write_message,
};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// 会话对单个设备的订阅
struct Subscription {
    device: Arc<Device>,
    access: AccessLevel,
    /// 最近一次投递的数据序号（PushNew/PullNew 用）
    last_seq: u64,
}

struct SessionState {
    subscriptions: BTreeMap<DeviceId, Subscription>,
    /// teardown 已释放订阅；之后完成的订阅切换需要自行撤销
    closed: bool,
}

/// 服务端会话
pub struct ClientSession {
    id: u64,
    port: u16,
    peer: SocketAddr,
    registry: Arc<DeviceRegistry>,
    config: Arc<ServerConfig>,
    /// 写锁
    writer: Mutex<TcpStream>,
    /// 仅用于 teardown 时 shutdown
    socket: TcpStream,
    state: Mutex<SessionState>,
    gate: DeliveryGate,
    authenticated: AtomicBool,
    torn_down: AtomicBool,
}

impl ClientSession {
    /// 接管已接受的连接：发送标识串并启动读写线程
    ///
    /// `port` 是会话所属的逻辑端口，决定设备寻址。
    pub fn start(
        stream: TcpStream,
        port: u16,
        id: u64,
        registry: Arc<DeviceRegistry>,
        config: Arc<ServerConfig>,
    ) -> Result<SessionHandle, SessionError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let reader_stream = stream.try_clone()?;
        let mut writer_stream = stream.try_clone()?;
        write_banner(&mut writer_stream, &config.banner)?;

        let session = Arc::new(ClientSession {
            id,
            port,
            peer,
            gate: DeliveryGate::new(config.default_data_mode, config.default_frequency_hz),
            authenticated: AtomicBool::new(config.auth_key.is_none()),
            registry,
            config,
            writer: Mutex::new(writer_stream),
            socket: stream,
            state: Mutex::new(SessionState {
                subscriptions: BTreeMap::new(),
                closed: false,
            }),
            torn_down: AtomicBool::new(false),
        });
        info!("[session {}] {} connected on port {}", id, peer, port);

        let reader = {
            let session = Arc::clone(&session);
            thread::Builder::new()
                .name(format!("session-{}-rx", id))
                .spawn(move || session.reader_loop(reader_stream))
        };
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                session.teardown("reader thread spawn failed");
                return Err(e.into());
            },
        };

        let writer = {
            let session = Arc::clone(&session);
            thread::Builder::new()
                .name(format!("session-{}-tx", id))
                .spawn(move || session.writer_loop())
        };
        let writer = match writer {
            Ok(handle) => handle,
            Err(e) => {
                session.teardown("writer thread spawn failed");
                let _ = reader.join();
                return Err(e.into());
            },
        };

        Ok(SessionHandle {
            session,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// 当前对设备持有的访问级别
    pub fn access(&self, device: DeviceId) -> AccessLevel {
        self.state
            .lock()
            .subscriptions
            .get(&device)
            .map(|s| s.access)
            .unwrap_or_default()
    }

    pub fn data_mode(&self) -> DataMode {
        self.gate.mode()
    }

    /// 主动关闭会话
    pub fn close(&self) {
        self.teardown("closed by server");
    }

    // ========================================================================
    // 读线程
    // ========================================================================

    fn reader_loop(&self, stream: TcpStream) {
        let mut reader = BufReader::new(stream);
        match self.read_messages(&mut reader) {
            Ok(()) => self.teardown("client disconnected"),
            Err(e) => {
                if !self.is_closed() {
                    warn!("[session {}] {}", self.id, e);
                }
                self.teardown("session error");
            },
        }
    }

    fn read_messages(&self, reader: &mut BufReader<TcpStream>) -> Result<(), SessionError> {
        loop {
            let msg = match read_message(reader, self.config.max_message_size) {
                Ok(msg) => msg,
                Err(e) if e.is_disconnect() => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            if self.is_closed() {
                return Ok(());
            }
            self.dispatch(msg)?;
        }
    }

    fn dispatch(&self, msg: Message) -> Result<(), SessionError> {
        if !self.is_authenticated() && !is_auth_request(&msg) {
            debug!(
                "[session {}] dropping {:?} from unauthenticated client",
                self.id, msg.msg_type
            );
            return Ok(());
        }

        match msg.msg_type {
            MessageType::Req if msg.device == CONTROL_DEVICE => self.handle_control(msg),
            MessageType::Req => self.handle_device_request(msg),
            MessageType::Cmd => {
                self.handle_command(msg);
                Ok(())
            },
            MessageType::Data
            | MessageType::Synch
            | MessageType::RespAck
            | MessageType::RespNack => {
                warn!(
                    "[session {}] client sent {:?} for {}, dropped",
                    self.id, msg.msg_type, msg.device
                );
                Ok(())
            },
        }
    }

    fn handle_command(&self, msg: Message) {
        let address = msg.device.at(self.port);
        let target = {
            let state = self.state.lock();
            state
                .subscriptions
                .get(&msg.device)
                .filter(|s| s.access.can_write())
                .map(|s| Arc::clone(&s.device))
        };
        match target {
            Some(device) => {
                trace!(
                    "[session {}] cmd {} payload {}",
                    self.id,
                    address,
                    hex::encode(&msg.payload)
                );
                device.put_command(msg.payload, Timestamp::now());
            },
            None => warn!(
                "[session {}] command for {} without write access, dropped",
                self.id, address
            ),
        }
    }

    fn handle_device_request(&self, msg: Message) -> Result<(), SessionError> {
        let address = msg.device.at(self.port);
        let device = match self.registry.get(&address) {
            Some(device) if self.access(msg.device).is_open() => Arc::clone(device),
            Some(_) => {
                warn!(
                    "[session {}] request for {} which is not open",
                    self.id, address
                );
                return self.send(&Message::nack(msg.device, Bytes::new()));
            },
            None => {
                warn!("[session {}] request for unknown device {}", self.id, address);
                return self.send(&Message::nack(msg.device, Bytes::new()));
            },
        };

        let ticket = device.put_config(msg.payload);
        match ticket.wait(self.config.request_timeout()) {
            Some(reply) => self.send(&Message::reply(reply.kind, msg.device, reply.payload)),
            None => {
                let err = SessionError::RequestTimeout { address };
                warn!("[session {}] {}", self.id, err);
                self.send(&Message::nack(msg.device, Bytes::new()))
            },
        }
    }

    fn handle_control(&self, msg: Message) -> Result<(), SessionError> {
        let request = match ControlRequest::decode(&msg.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("[session {}] bad control request: {}", self.id, e);
                return self.send(&Message::nack(CONTROL_DEVICE, Bytes::new()));
            },
        };
        debug!("[session {}] control {:?}", self.id, request.subtype());

        match request {
            ControlRequest::DevList => {
                let devices = self.registry.on_port(self.port).map(|d| d.address()).collect();
                self.reply_control(ReplyKind::Ack, &ControlReply::DevList(devices))
            },
            ControlRequest::DriverInfo(address) => match self.registry.get(&address) {
                Some(device) => self.reply_control(
                    ReplyKind::Ack,
                    &ControlReply::DriverInfo {
                        address,
                        driver_name: device.driver_name().to_string(),
                    },
                ),
                None => self.reply_control(
                    ReplyKind::Nack,
                    &ControlReply::Empty(ControlSubtype::DriverInfo),
                ),
            },
            ControlRequest::Dev(entries) => {
                let grants: Vec<DeviceGrant> =
                    entries.into_iter().map(|e| self.change_access(e)).collect();
                let kind = if grants.iter().any(|g| g.access == AccessLevel::Error) {
                    ReplyKind::Nack
                } else {
                    ReplyKind::Ack
                };
                self.reply_control(kind, &ControlReply::Dev(grants))
            },
            ControlRequest::Data => {
                // 先应答，批量数据随后由写线程发出
                self.reply_control(ReplyKind::Ack, &ControlReply::Empty(ControlSubtype::Data))?;
                self.gate.request_data();
                Ok(())
            },
            ControlRequest::DataMode(mode) => {
                self.gate.set_mode(mode);
                info!("[session {}] data mode set to {:?}", self.id, mode);
                self.reply_control(ReplyKind::Ack, &ControlReply::Empty(ControlSubtype::DataMode))
            },
            ControlRequest::DataFreq(hz) => {
                let kind = if self.gate.set_frequency(hz) {
                    debug!("[session {}] frequency set to {} Hz", self.id, hz);
                    ReplyKind::Ack
                } else {
                    warn!("[session {}] rejected frequency {}", self.id, hz);
                    ReplyKind::Nack
                };
                self.reply_control(kind, &ControlReply::Empty(ControlSubtype::DataFreq))
            },
            ControlRequest::Auth(key) => self.authenticate(&key),
            ControlRequest::NameService(name) => match self.config.robot_names.get(&name) {
                Some(&port) => {
                    self.reply_control(ReplyKind::Ack, &ControlReply::NameService { name, port })
                },
                None => self.reply_control(
                    ReplyKind::Nack,
                    &ControlReply::Empty(ControlSubtype::NameService),
                ),
            },
        }
    }

    fn authenticate(&self, key: &str) -> Result<(), SessionError> {
        let reply = ControlReply::Empty(ControlSubtype::Auth);
        match &self.config.auth_key {
            Some(expected) if expected != key => {
                self.reply_control(ReplyKind::Nack, &reply)?;
                Err(SessionError::AuthFailed)
            },
            _ => {
                self.authenticated.store(true, Ordering::Release);
                info!("[session {}] authenticated", self.id);
                self.reply_control(ReplyKind::Ack, &reply)
            },
        }
    }

    /// 处理批量订阅中的一项
    ///
    /// 订阅切换期间不持有会话锁。切换中的条目先从表中取出，teardown 不会释放它；
    /// 切换完成时 teardown 已发生，则由这里释放切换后的全部订阅。
    fn change_access(&self, request: DeviceRequest) -> DeviceGrant {
        let address = request.device.at(self.port);
        let Some(device) = self.registry.get(&address).cloned() else {
            warn!("[session {}] access request for unknown device {}", self.id, address);
            return DeviceGrant {
                device: request.device,
                access: AccessLevel::Error,
                driver_name: String::new(),
            };
        };

        let (current, last_seq) = {
            let mut state = self.state.lock();
            if state.closed {
                return DeviceGrant {
                    device: request.device,
                    access: AccessLevel::Error,
                    driver_name: device.driver_name().to_string(),
                };
            }
            state
                .subscriptions
                .remove(&request.device)
                .map_or((AccessLevel::Closed, 0), |s| (s.access, s.last_seq))
        };
        let outcome = apply_transition(device.as_ref(), current, request.access);
        if let Some(e) = &outcome.error {
            let err = SessionError::Subscription {
                address,
                reason: e.to_string(),
            };
            warn!("[session {}] {}", self.id, err);
        }

        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            let released = apply_transition(device.as_ref(), outcome.state, AccessLevel::Closed);
            if let Some(e) = released.error {
                warn!("[session {}] releasing {} failed: {}", self.id, address, e);
            }
        } else if outcome.state != AccessLevel::Closed {
            state.subscriptions.insert(
                request.device,
                Subscription {
                    device: Arc::clone(&device),
                    access: outcome.state,
                    last_seq,
                },
            );
        }

        info!(
            "[session {}] {} access {} -> {}",
            self.id,
            address,
            current.letter() as char,
            outcome.state.letter() as char
        );
        DeviceGrant {
            device: request.device,
            access: outcome.granted,
            driver_name: device.driver_name().to_string(),
        }
    }

    fn send(&self, msg: &Message) -> Result<(), SessionError> {
        let mut writer = self.writer.lock();
        write_message(&mut *writer, msg)?;
        Ok(())
    }

    fn reply_control(&self, kind: ReplyKind, reply: &ControlReply) -> Result<(), SessionError> {
        self.send(&Message::reply(kind, CONTROL_DEVICE, reply.encode()))
    }

    // ========================================================================
    // 写线程
    // ========================================================================

    fn writer_loop(&self) {
        let mut next_due = Instant::now();
        while let Some(mode) = self.gate.wait_next(&mut next_due) {
            if let Err(e) = self.deliver_batch(mode) {
                if !self.is_closed() {
                    warn!("[session {}] delivery failed: {}", self.id, e);
                }
                break;
            }
        }
        self.teardown("delivery stopped");
    }

    /// 收集可读订阅的最新数据
    fn collect_batch(&self, new_only: bool) -> SmallVec<[Message; 8]> {
        let max = self.config.max_message_size;
        let mut batch = SmallVec::new();
        let mut state = self.state.lock();
        for (id, sub) in state.subscriptions.iter_mut() {
            if !sub.access.can_read() {
                continue;
            }
            let Some(data) = sub.device.get_data() else {
                continue;
            };
            if new_only && data.seq <= sub.last_seq {
                continue;
            }
            sub.last_seq = data.seq;
            if data.payload.len() > max {
                warn!(
                    "[session {}] data from {} exceeds {} bytes, skipped",
                    self.id,
                    id.at(self.port),
                    max
                );
                continue;
            }
            batch.push(Message::data(*id, data.timestamp, data.payload));
        }
        batch
    }

    /// 发出一批数据，以一条 Synch 结尾
    ///
    /// 整批在写锁内写出；累计超过 `max_message_size` 时分段写出。
    fn deliver_batch(&self, mode: DataMode) -> Result<(), SessionError> {
        if !self.is_authenticated() {
            return Ok(());
        }

        let batch = self.collect_batch(mode.new_only());
        let max = self.config.max_message_size;
        let mut buf = BytesMut::new();

        let mut writer = self.writer.lock();
        for msg in &batch {
            if !buf.is_empty() && buf.len() + msg.encoded_len() > max {
                writer.write_all(&buf)?;
                buf.clear();
            }
            msg.encode_into(&mut buf);
        }
        Message::synch().encode_into(&mut buf);
        writer.write_all(&buf)?;
        writer.flush()?;
        drop(writer);

        trace!("[session {}] delivered {} data messages", self.id, batch.len());
        Ok(())
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    fn teardown(&self, reason: &str) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.gate.shutdown();
        let _ = self.socket.shutdown(Shutdown::Both);

        let released = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.subscriptions)
        };
        let count = released.len();
        for (id, sub) in released {
            let outcome = apply_transition(sub.device.as_ref(), sub.access, AccessLevel::Closed);
            if let Some(e) = outcome.error {
                warn!(
                    "[session {}] releasing {} failed: {}",
                    self.id,
                    id.at(self.port),
                    e
                );
            }
        }

        info!(
            "[session {}] {} closed ({}), released {} devices",
            self.id, self.peer, reason, count
        );
    }
}

/// 判断是否为认证请求（未认证会话只处理这一种消息）
fn is_auth_request(msg: &Message) -> bool {
    msg.msg_type == MessageType::Req
        && msg.device == CONTROL_DEVICE
        && msg.payload.len() >= 2
        && u16::from_be_bytes([msg.payload[0], msg.payload[1]]) == u16::from(ControlSubtype::Auth)
}

/// 会话线程句柄
pub struct SessionHandle {
    session: Arc<ClientSession>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn session(&self) -> &Arc<ClientSession> {
        &self.session
    }

    /// 读写线程是否都已退出
    pub fn is_finished(&self) -> bool {
        let done = |h: &Option<JoinHandle<()>>| h.as_ref().is_none_or(|h| h.is_finished());
        done(&self.reader) && done(&self.writer)
    }

    /// 关闭会话并等待读写线程退出
    pub fn close(mut self) {
        self.session.close();
        self.join();
    }

    fn join(&mut self) {
        for handle in [self.reader.take(), self.writer.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!("[session {}] thread panicked", self.session.id);
            }
        }
    }
}
