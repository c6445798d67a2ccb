//! 同步客户端
//!
//! 没有后台线程：调用者显式调用 `read`/`write`/`request` 驱动通信。

use crate::{ClientConfig, ClientError, Proxy};
use bytes::Bytes;
use player_protocol::{
    AccessLevel, CONTROL_DEVICE, ControlReply, ControlRequest, DataMode, DeviceAddress,
    DeviceRequest, Message, MessageType, ReplyKind, Timestamp, WireError, read_banner,
    read_message, write_message,
};
use semver::Version;
use std::io::{self, BufRead, BufReader};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// 请求应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub payload: Bytes,
}

impl Reply {
    pub fn is_ack(&self) -> bool {
        self.kind == ReplyKind::Ack
    }
}

/// 设备列表中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub address: DeviceAddress,
    pub driver_name: String,
}

/// 已建立的连接
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    banner: String,
    version: Option<Version>,
}

impl Connection {
    fn send(&mut self, msg: &Message) -> Result<(), ClientError> {
        write_message(&mut self.writer, msg)?;
        Ok(())
    }

    fn recv(&mut self, max_size: usize) -> Result<Message, WireError> {
        read_message(&mut self.reader, max_size)
    }

    /// 等待指定设备的 Ack/Nack，丢弃其间的其他消息
    ///
    /// 只有在下一条消息的第一个字节到达之前超时才返回 `RequestTimeout`，
    /// 此时字节流仍然同步；其他错误都返回 `Request`。
    fn await_reply(
        &mut self,
        address: DeviceAddress,
        deadline: Instant,
        max_size: usize,
    ) -> Result<Reply, ClientError> {
        let device = address.id();
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(ClientError::RequestTimeout { address });
            }
            self.reader.get_ref().set_read_timeout(Some(deadline - now))?;

            match self.reader.fill_buf() {
                Ok([]) => {
                    let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed");
                    return Err(ClientError::Request {
                        address,
                        source: WireError::Io(eof),
                    });
                },
                Ok(_) => {},
                Err(e) => {
                    let source = WireError::Io(e);
                    if source.is_timeout() {
                        return Err(ClientError::RequestTimeout { address });
                    }
                    return Err(ClientError::Request { address, source });
                },
            }

            match self.recv(max_size) {
                Ok(msg) => {
                    if msg.device == device
                        && let Some(kind) = ReplyKind::from_message_type(msg.msg_type)
                    {
                        return Ok(Reply {
                            kind,
                            payload: msg.payload,
                        });
                    }
                    trace!("discarding {:?} from {} while waiting", msg.msg_type, msg.device);
                },
                Err(source) => return Err(ClientError::Request { address, source }),
            }
        }
    }
}

/// 从标识串中解析版本号（"Player v.1.6.5" → 1.6.5）
fn parse_banner_version(banner: &str) -> Option<Version> {
    let token = banner.split_whitespace().last()?;
    let digits = token.trim_start_matches(|c: char| !c.is_ascii_digit());
    Version::parse(digits).ok()
}

/// Player 客户端
///
/// # 示例
///
/// ```rust,no_run
/// use player_client::{CounterProxy, PlayerClient};
/// use player_protocol::{AccessLevel, DeviceAddress};
///
/// let mut client = PlayerClient::connect("localhost", 6665)?;
/// let addr = DeviceAddress::new(6665, 4, 0);
/// client.add_proxy(CounterProxy::new(addr))?;
/// client.request_device_access(addr, AccessLevel::Read)?;
/// client.read()?;
/// let value = client.proxy::<CounterProxy>(addr).and_then(|p| p.value());
/// # Ok::<(), player_client::ClientError>(())
/// ```
pub struct PlayerClient {
    config: ClientConfig,
    host: String,
    port: u16,
    connection: Option<Connection>,
    proxies: Vec<Box<dyn Proxy>>,
    /// 收到的最新数据时间（单调不减）
    timestamp: Timestamp,
}

impl PlayerClient {
    /// 使用默认配置连接
    pub fn connect(host: &str, port: u16) -> Result<Self, ClientError> {
        Self::connect_with(host, port, ClientConfig::default())
    }

    pub fn connect_with(host: &str, port: u16, config: ClientConfig) -> Result<Self, ClientError> {
        let mut client = Self {
            config,
            host: host.to_string(),
            port,
            connection: None,
            proxies: Vec::new(),
            timestamp: Timestamp::ZERO,
        };
        client.reconnect()?;
        Ok(client)
    }

    /// 重新建立连接（先断开已有连接）
    pub fn reconnect(&mut self) -> Result<(), ClientError> {
        self.disconnect();

        let mut last_err = None;
        let mut stream = None;
        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                },
                Err(e) => last_err = Some(e),
            }
        }
        let stream = match (stream, last_err) {
            (Some(stream), _) => stream,
            (None, Some(e)) => return Err(e.into()),
            (None, None) => {
                return Err(ClientError::Connection(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address for {}", self.host),
                )));
            },
        };

        stream.set_nodelay(self.config.nodelay)?;
        stream.set_read_timeout(Some(self.config.connect_timeout))?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let banner = read_banner(&mut reader).map_err(|e| ClientError::Banner(e.to_string()))?;
        if banner.is_empty() {
            return Err(ClientError::Banner("empty banner".into()));
        }
        stream.set_read_timeout(None)?;

        let version = parse_banner_version(&banner);
        if version.is_none() {
            debug!("banner '{}' carries no version", banner);
        }
        info!("connected to {}:{} ({})", self.host, self.port, banner);

        self.connection = Some(Connection {
            reader,
            writer: stream,
            banner,
            version,
        });
        self.timestamp = Timestamp::ZERO;
        for proxy in &mut self.proxies {
            proxy.info_mut().invalidate();
        }
        Ok(())
    }

    /// 断开连接并使所有代理失效
    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            let _ = conn.writer.shutdown(Shutdown::Both);
            info!("disconnected from {}:{}", self.host, self.port);
        }
        for proxy in &mut self.proxies {
            proxy.info_mut().invalidate();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 服务端标识串
    pub fn banner(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.banner.as_str())
    }

    /// 标识串中的版本号
    pub fn server_version(&self) -> Option<&Version> {
        self.connection.as_ref().and_then(|c| c.version.as_ref())
    }

    /// 已收到的最新数据时间
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn conn_mut(&mut self) -> Result<&mut Connection, ClientError> {
        self.connection.as_mut().ok_or(ClientError::NotConnected)
    }

    fn control_address(&self) -> DeviceAddress {
        CONTROL_DEVICE.at(self.port)
    }

    // ========================================================================
    // 代理
    // ========================================================================

    /// 注册代理（同一地址只能有一个）
    pub fn add_proxy<P: Proxy>(&mut self, proxy: P) -> Result<(), ClientError> {
        let address = proxy.info().address;
        if self.find(address).is_some() {
            return Err(ClientError::DuplicateProxy(address));
        }
        self.proxies.push(Box::new(proxy));
        Ok(())
    }

    /// 移除代理
    pub fn remove_proxy(&mut self, address: DeviceAddress) -> Option<Box<dyn Proxy>> {
        let pos = self.proxies.iter().position(|p| p.info().address == address)?;
        Some(self.proxies.remove(pos))
    }

    /// 按地址和类型取代理
    pub fn proxy<P: Proxy>(&self, address: DeviceAddress) -> Option<&P> {
        self.find(address)?.as_any().downcast_ref()
    }

    pub fn proxy_mut<P: Proxy>(&mut self, address: DeviceAddress) -> Option<&mut P> {
        self.find_mut(address)?.as_any_mut().downcast_mut()
    }

    /// 遍历所有代理（注册顺序）
    pub fn proxies(&self) -> impl Iterator<Item = &dyn Proxy> {
        self.proxies.iter().map(|p| p.as_ref())
    }

    fn find(&self, address: DeviceAddress) -> Option<&dyn Proxy> {
        self.proxies
            .iter()
            .find(|p| p.info().address == address)
            .map(|p| p.as_ref())
    }

    fn find_mut(&mut self, address: DeviceAddress) -> Option<&mut Box<dyn Proxy>> {
        self.proxies.iter_mut().find(|p| p.info().address == address)
    }

    // ========================================================================
    // 读写
    // ========================================================================

    /// 读取一批数据（直到 Synch）
    ///
    /// 传输或解码失败后字节流已失步，连接随即断开。
    pub fn read(&mut self) -> Result<(), ClientError> {
        let max = self.config.max_message_size;
        loop {
            let msg = match self.conn_mut()?.recv(max) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("read from {}:{} failed: {}", self.host, self.port, e);
                    self.disconnect();
                    return Err(ClientError::Read(e));
                },
            };
            match msg.msg_type {
                MessageType::Data => self.store(msg),
                MessageType::Synch => return Ok(()),
                other => debug!("ignoring {:?} from {} while reading", other, msg.device),
            }
        }
    }

    fn store(&mut self, msg: Message) {
        let address = msg.device.at(self.port);
        let recv_time = Timestamp::now();

        let Some(proxy) = self.find_mut(address) else {
            warn!("data for {} has no proxy, skipped", address);
            return;
        };

        let decoded = proxy.decode(&msg.payload);
        let info = proxy.info_mut();
        info.raw = msg.payload;
        info.data_time = msg.data_time;
        info.send_time = msg.send_time;
        info.recv_time = recv_time;
        match decoded {
            Ok(()) => {
                info.valid = true;
                info.fresh = true;
            },
            Err(e) => warn!("failed to decode data from {}: {}", address, e),
        }

        if msg.data_time > self.timestamp {
            self.timestamp = msg.data_time;
        }
    }

    /// 发送命令（不等待应答）
    pub fn write(
        &mut self,
        address: DeviceAddress,
        payload: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        let result = self.conn_mut()?.send(&Message::cmd(address.id(), payload));
        if result.is_err() {
            self.disconnect();
        }
        result
    }

    /// 发送请求并等待应答
    pub fn request(
        &mut self,
        address: DeviceAddress,
        payload: impl Into<Bytes>,
    ) -> Result<Reply, ClientError> {
        let deadline = Instant::now() + self.config.request_timeout;
        let max = self.config.max_message_size;
        let msg = Message::req(address.id(), payload);
        let result = {
            let conn = self.conn_mut()?;
            conn.send(&msg).and_then(|()| conn.await_reply(address, deadline, max))
        };

        match &result {
            Ok(_) | Err(ClientError::RequestTimeout { .. }) => {
                if let Some(conn) = &self.connection {
                    conn.reader.get_ref().set_read_timeout(None)?;
                }
            },
            Err(e) => {
                warn!("request to {} failed, disconnecting: {}", address, e);
                self.disconnect();
            },
        }
        result
    }

    /// 发送请求，要求 Ack，返回应答负载
    pub fn request_ack(
        &mut self,
        address: DeviceAddress,
        payload: impl Into<Bytes>,
    ) -> Result<Bytes, ClientError> {
        let reply = self.request(address, payload)?;
        match reply.kind {
            ReplyKind::Ack => Ok(reply.payload),
            ReplyKind::Nack => Err(ClientError::Nack { address }),
        }
    }

    // ========================================================================
    // 控制设备
    // ========================================================================

    fn control(
        &mut self,
        request: ControlRequest,
    ) -> Result<(ReplyKind, ControlReply), ClientError> {
        let address = self.control_address();
        let reply = self.request(address, request.encode())?;
        if reply.kind == ReplyKind::Nack && reply.payload.is_empty() {
            return Err(ClientError::Nack { address });
        }
        let decoded = ControlReply::decode(&reply.payload)
            .map_err(|e| ClientError::ConfigMismatch(e.to_string()))?;
        if decoded.subtype() != request.subtype() {
            return Err(ClientError::ConfigMismatch(format!(
                "reply subtype {:?} does not match request {:?}",
                decoded.subtype(),
                request.subtype()
            )));
        }
        Ok((reply.kind, decoded))
    }

    fn control_ack(&mut self, request: ControlRequest) -> Result<ControlReply, ClientError> {
        match self.control(request)? {
            (ReplyKind::Ack, reply) => Ok(reply),
            (ReplyKind::Nack, _) => Err(ClientError::Nack {
                address: self.control_address(),
            }),
        }
    }

    /// 修改对设备的访问级别，返回服务端授予的级别
    ///
    /// 已注册的代理同步更新访问级别和驱动名。
    pub fn request_device_access(
        &mut self,
        address: DeviceAddress,
        access: AccessLevel,
    ) -> Result<AccessLevel, ClientError> {
        let device = address.id();
        let request = ControlRequest::Dev(vec![DeviceRequest { device, access }]);
        let (kind, reply) = self.control(request)?;
        let grant = match reply {
            ControlReply::Dev(mut grants) if grants.len() == 1 && grants[0].device == device => {
                grants.remove(0)
            },
            other => {
                return Err(ClientError::ConfigMismatch(format!(
                    "unexpected device reply {:?}",
                    other
                )));
            },
        };

        if let Some(proxy) = self.find_mut(address) {
            let info = proxy.info_mut();
            if kind == ReplyKind::Ack || !info.access.is_open() {
                info.access = grant.access;
            }
            if !grant.driver_name.is_empty() {
                info.driver_name = grant.driver_name.clone();
            }
        }

        match kind {
            ReplyKind::Ack => Ok(grant.access),
            ReplyKind::Nack => Err(ClientError::Nack { address }),
        }
    }

    /// 设置投递模式
    pub fn set_data_mode(&mut self, mode: DataMode) -> Result<(), ClientError> {
        self.control_ack(ControlRequest::DataMode(mode)).map(|_| ())
    }

    /// 设置 Push 模式频率
    pub fn set_frequency(&mut self, hz: u16) -> Result<(), ClientError> {
        self.control_ack(ControlRequest::DataFreq(hz)).map(|_| ())
    }

    /// Pull 模式下请求一批数据（随后用 `read` 接收）
    pub fn request_data(&mut self) -> Result<(), ClientError> {
        self.control_ack(ControlRequest::Data).map(|_| ())
    }

    /// 认证
    pub fn authenticate(&mut self, key: &str) -> Result<(), ClientError> {
        self.control_ack(ControlRequest::Auth(key.to_string())).map(|_| ())
    }

    /// 列出服务端本端口上的设备及其驱动名
    pub fn get_device_list(&mut self) -> Result<Vec<DeviceInfo>, ClientError> {
        let addresses = match self.control_ack(ControlRequest::DevList)? {
            ControlReply::DevList(addresses) => addresses,
            other => {
                return Err(ClientError::ConfigMismatch(format!(
                    "unexpected device list reply {:?}",
                    other
                )));
            },
        };

        let mut devices = Vec::with_capacity(addresses.len());
        for address in addresses {
            match self.control_ack(ControlRequest::DriverInfo(address))? {
                ControlReply::DriverInfo { driver_name, .. } => {
                    devices.push(DeviceInfo {
                        address,
                        driver_name,
                    });
                },
                other => {
                    return Err(ClientError::ConfigMismatch(format!(
                        "unexpected driver info reply {:?}",
                        other
                    )));
                },
            }
        }
        Ok(devices)
    }

    /// 名字服务：机器人名 → 端口
    pub fn lookup_port(&mut self, name: &str) -> Result<u16, ClientError> {
        match self.control_ack(ControlRequest::NameService(name.to_string()))? {
            ControlReply::NameService { port, .. } => Ok(port),
            other => Err(ClientError::ConfigMismatch(format!(
                "unexpected name service reply {:?}",
                other
            ))),
        }
    }
}

impl Drop for PlayerClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CounterProxy, RawProxy};
    use bytes::BytesMut;
    use player_protocol::{DeviceId, write_banner};
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    /// 脚本化的假服务端：发送标识串后执行 `script`
    fn fake_server<F>(script: F) -> (u16, thread::JoinHandle<()>)
    where
        F: FnOnce(&mut TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            write_banner(&mut stream, "Player v.1.6.5").unwrap();
            script(&mut stream);
        });
        (port, handle)
    }

    fn data(code: u16, ts: Timestamp, payload: &[u8]) -> Message {
        Message::data(DeviceId::new(code, 0), ts, payload.to_vec())
    }

    fn send_all(stream: &mut TcpStream, msgs: &[Message]) {
        let mut buf = BytesMut::new();
        for msg in msgs {
            msg.encode_into(&mut buf);
        }
        stream.write_all(&buf).unwrap();
    }

    #[test]
    fn test_banner_version() {
        assert_eq!(
            parse_banner_version("Player v.1.6.5"),
            Some(Version::new(1, 6, 5))
        );
        assert_eq!(parse_banner_version("Player v2.0.1"), Some(Version::new(2, 0, 1)));
        assert_eq!(parse_banner_version("sim"), None);
        assert_eq!(parse_banner_version(""), None);
    }

    #[test]
    fn test_read_consumes_batch_once() {
        let (port, server) = fake_server(|stream| {
            send_all(
                stream,
                &[
                    data(4, Timestamp::new(1, 0), &[0, 0, 0, 1]),
                    data(5, Timestamp::new(1, 0), &[9]),
                    // 没有代理的设备
                    data(6, Timestamp::new(1, 0), &[1]),
                    Message::synch(),
                    data(4, Timestamp::new(2, 0), &[0, 0, 0, 2]),
                    Message::synch(),
                ],
            );
        });

        let mut client = PlayerClient::connect("127.0.0.1", port).unwrap();
        assert_eq!(client.banner(), Some("Player v.1.6.5"));
        assert_eq!(client.server_version(), Some(&Version::new(1, 6, 5)));

        let counter = DeviceAddress::new(port, 4, 0);
        let raw = DeviceAddress::new(port, 5, 0);
        client.add_proxy(CounterProxy::new(counter)).unwrap();
        client.add_proxy(RawProxy::new(raw)).unwrap();

        client.read().unwrap();
        let proxy = client.proxy::<CounterProxy>(counter).unwrap();
        assert_eq!(proxy.value(), Some(1));
        assert!(proxy.info().valid && proxy.info().fresh);
        assert_eq!(client.proxy::<RawProxy>(raw).unwrap().data(), &[9]);

        // 第二批
        client.proxy_mut::<CounterProxy>(counter).unwrap().info_mut().take_fresh();
        client.read().unwrap();
        let proxy = client.proxy::<CounterProxy>(counter).unwrap();
        assert_eq!(proxy.value(), Some(2));
        assert!(proxy.info().fresh);
        assert_eq!(client.timestamp(), Timestamp::new(2, 0));

        server.join().unwrap();
    }

    #[test]
    fn test_timestamp_is_monotonic() {
        let t0 = Timestamp::new(10, 0);
        let t1 = Timestamp::new(10, 500);
        let (port, server) = fake_server(move |stream| {
            send_all(
                stream,
                &[data(4, t1, &[0, 0, 0, 1]), data(5, t0, &[1]), Message::synch()],
            );
            send_all(
                stream,
                &[data(5, t0, &[1]), data(4, t1, &[0, 0, 0, 1]), Message::synch()],
            );
        });

        let mut client = PlayerClient::connect("127.0.0.1", port).unwrap();
        client.add_proxy(RawProxy::new(DeviceAddress::new(port, 4, 0))).unwrap();
        client.add_proxy(RawProxy::new(DeviceAddress::new(port, 5, 0))).unwrap();

        client.read().unwrap();
        assert_eq!(client.timestamp(), t1);
        client.read().unwrap();
        assert_eq!(client.timestamp(), t1);

        server.join().unwrap();
    }

    #[test]
    fn test_decode_failure_keeps_proxy_invalid() {
        let (port, server) = fake_server(|stream| {
            send_all(stream, &[data(4, Timestamp::new(1, 0), &[1, 2]), Message::synch()]);
        });

        let mut client = PlayerClient::connect("127.0.0.1", port).unwrap();
        let addr = DeviceAddress::new(port, 4, 0);
        client.add_proxy(CounterProxy::new(addr)).unwrap();
        client.read().unwrap();

        let proxy = client.proxy::<CounterProxy>(addr).unwrap();
        assert!(!proxy.info().valid);
        assert_eq!(&proxy.info().raw[..], &[1, 2]);
        server.join().unwrap();
    }

    #[test]
    fn test_request_skips_unrelated_traffic() {
        let (port, server) = fake_server(|stream| {
            let req = read_message(stream, 1024).unwrap();
            assert_eq!(req.msg_type, MessageType::Req);
            assert_eq!(&req.payload[..], &[1, 2]);
            send_all(
                stream,
                &[
                    data(4, Timestamp::new(1, 0), &[0, 0, 0, 1]),
                    Message::synch(),
                    // 其他设备的应答
                    Message::ack(DeviceId::new(5, 0), vec![0u8]),
                    Message::ack(req.device, vec![3u8]),
                ],
            );
        });

        let mut client = PlayerClient::connect("127.0.0.1", port).unwrap();
        let reply = client
            .request(DeviceAddress::new(port, 4, 0), vec![1u8, 2])
            .unwrap();
        assert!(reply.is_ack());
        assert_eq!(&reply.payload[..], &[3]);
        server.join().unwrap();
    }

    #[test]
    fn test_request_timeout() {
        let (port, server) = fake_server(|stream| {
            let _ = read_message(stream, 1024).unwrap();
            thread::sleep(Duration::from_millis(300));
        });

        let config = ClientConfig {
            request_timeout: Duration::from_millis(100),
            ..ClientConfig::default()
        };
        let mut client = PlayerClient::connect_with("127.0.0.1", port, config).unwrap();
        let result = client.request(DeviceAddress::new(port, 4, 0), vec![1u8]);
        assert!(matches!(result, Err(ClientError::RequestTimeout { .. })));
        // 没有收到任何字节，连接仍然同步
        assert!(client.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn test_partial_reply_timeout_disconnects() {
        let (port, server) = fake_server(|stream| {
            let req = read_message(stream, 1024).unwrap();
            let reply = Message::ack(req.device, vec![1u8]).to_bytes();
            stream.write_all(&reply[..10]).unwrap();
            thread::sleep(Duration::from_millis(300));
        });

        let config = ClientConfig {
            request_timeout: Duration::from_millis(100),
            ..ClientConfig::default()
        };
        let mut client = PlayerClient::connect_with("127.0.0.1", port, config).unwrap();
        let result = client.request(DeviceAddress::new(port, 4, 0), vec![1u8]);
        assert!(matches!(result, Err(ClientError::Request { .. })));
        assert!(!client.is_connected());
        assert!(matches!(
            client.request(DeviceAddress::new(port, 4, 0), vec![1u8]),
            Err(ClientError::NotConnected)
        ));
        server.join().unwrap();
    }

    #[test]
    fn test_corrupt_header_disconnects() {
        let (port, server) = fake_server(|stream| {
            let mut bad = BytesMut::new();
            Message::synch().encode_into(&mut bad);
            bad[0] ^= 0xff;
            bad[1] ^= 0xff;
            stream.write_all(&bad).unwrap();
            send_all(stream, &[Message::synch()]);
        });

        let mut client = PlayerClient::connect("127.0.0.1", port).unwrap();
        let addr = DeviceAddress::new(port, 4, 0);
        client.add_proxy(CounterProxy::new(addr)).unwrap();

        assert!(matches!(
            client.read(),
            Err(ClientError::Read(WireError::Protocol(_)))
        ));
        assert!(!client.is_connected());
        assert!(!client.proxy::<CounterProxy>(addr).unwrap().info().valid);
        // 后面的 Synch 不会被当成新的一批
        assert!(matches!(client.read(), Err(ClientError::NotConnected)));
        server.join().unwrap();
    }

    #[test]
    fn test_request_ack_rejects_nack() {
        let (port, server) = fake_server(|stream| {
            let req = read_message(stream, 1024).unwrap();
            write_message(stream, &Message::nack(req.device, Bytes::new())).unwrap();
        });

        let mut client = PlayerClient::connect("127.0.0.1", port).unwrap();
        let result = client.request_ack(DeviceAddress::new(port, 4, 0), vec![1u8]);
        assert!(matches!(result, Err(ClientError::Nack { .. })));
        server.join().unwrap();
    }

    #[test]
    fn test_request_disconnect() {
        let (port, server) = fake_server(|stream| {
            let _ = read_message(stream, 1024).unwrap();
            let _ = stream.shutdown(Shutdown::Both);
        });

        let mut client = PlayerClient::connect("127.0.0.1", port).unwrap();
        let err = client
            .request(DeviceAddress::new(port, 4, 0), vec![1u8])
            .unwrap_err();
        assert!(matches!(err, ClientError::Request { .. }));
        assert!(err.is_disconnect());
        assert!(!client.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn test_disconnect_invalidates_proxies() {
        let (port, server) = fake_server(|stream| {
            send_all(stream, &[data(4, Timestamp::new(1, 0), &[0, 0, 0, 7]), Message::synch()]);
        });

        let mut client = PlayerClient::connect("127.0.0.1", port).unwrap();
        let addr = DeviceAddress::new(port, 4, 0);
        client.add_proxy(CounterProxy::new(addr)).unwrap();
        client.read().unwrap();
        assert!(client.proxy::<CounterProxy>(addr).unwrap().info().valid);

        client.disconnect();
        assert!(!client.is_connected());
        assert!(!client.proxy::<CounterProxy>(addr).unwrap().info().valid);
        assert!(matches!(
            client.write(addr, vec![1u8]),
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(client.read(), Err(ClientError::NotConnected)));
        server.join().unwrap();
    }

    #[test]
    fn test_proxy_registry() {
        let (port, server) = fake_server(|_| {});
        let mut client = PlayerClient::connect("127.0.0.1", port).unwrap();

        let addr = DeviceAddress::new(port, 4, 0);
        client.add_proxy(RawProxy::new(addr)).unwrap();
        assert!(matches!(
            client.add_proxy(CounterProxy::new(addr)),
            Err(ClientError::DuplicateProxy(_))
        ));
        assert!(client.proxy::<CounterProxy>(addr).is_none());
        assert!(client.proxy::<RawProxy>(addr).is_some());
        assert_eq!(client.proxies().count(), 1);

        assert!(client.remove_proxy(addr).is_some());
        assert!(client.remove_proxy(addr).is_none());
        server.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        // 绑定后立即释放，得到一个无人监听的端口
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let result = PlayerClient::connect("127.0.0.1", port);
        assert!(matches!(result, Err(ClientError::Connection(_))));
    }
}
