//! 客户端与真实服务端的端到端测试

use player_client::{ClientConfig, ClientError, CounterProxy, DeviceInfo, PlayerClient, Proxy, RawProxy};
use player_driver::DeviceRegistry;
use player_driver::sim::{CounterDriver, EchoDriver};
use player_protocol::{AccessLevel, DataMode, DeviceAddress};
use player_server::{Server, ServerConfig};
use std::collections::BTreeMap;
use std::net::TcpListener;
use std::time::{Duration, Instant};

const COUNTER: (u16, u16) = (4, 0);
const ECHO: (u16, u16) = (30, 0);
const EXCLUSIVE: (u16, u16) = (4, 1);

// ============================================================================
// Helpers
// ============================================================================

struct Fixture {
    server: Server,
    port: u16,
}

impl Fixture {
    /// 在临时端口上启动服务端，设备按实际端口寻址
    fn start(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let registry = DeviceRegistry::builder()
            .add(
                DeviceAddress::new(port, COUNTER.0, COUNTER.1),
                CounterDriver::new(Duration::from_millis(5)),
            )
            .unwrap()
            .add(DeviceAddress::new(port, ECHO.0, ECHO.1), EchoDriver::new())
            .unwrap()
            .add(
                DeviceAddress::new(port, EXCLUSIVE.0, EXCLUSIVE.1),
                CounterDriver::new(Duration::from_millis(5)).exclusive(),
            )
            .unwrap()
            .build();

        let server = Server::with_listeners(config, registry, vec![(port, listener)]).unwrap();
        Self { server, port }
    }

    fn addr(&self, (code, index): (u16, u16)) -> DeviceAddress {
        DeviceAddress::new(self.port, code, index)
    }

    fn connect(&self) -> PlayerClient {
        let config = ClientConfig {
            request_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        };
        PlayerClient::connect_with("127.0.0.1", self.port, config).unwrap()
    }
}

fn pull_config() -> ServerConfig {
    ServerConfig {
        default_data_mode: DataMode::PullAll,
        ..ServerConfig::default()
    }
}

/// 反复读取直到条件成立
fn read_until(client: &mut PlayerClient, mut cond: impl FnMut(&PlayerClient) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        client.read().unwrap();
        if cond(&*client) {
            return true;
        }
    }
    false
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn pull_mode_delivers_counter_values() {
    let fixture = Fixture::start(pull_config());
    let mut client = fixture.connect();
    assert_eq!(client.banner(), Some("Player v.1.6.5"));

    let counter = fixture.addr(COUNTER);
    client.add_proxy(CounterProxy::new(counter)).unwrap();
    let granted = client.request_device_access(counter, AccessLevel::Read).unwrap();
    assert_eq!(granted, AccessLevel::Read);

    let proxy = client.proxy::<CounterProxy>(counter).unwrap();
    assert_eq!(proxy.info().access, AccessLevel::Read);
    assert_eq!(proxy.info().driver_name, "counter");

    let mut first = None;
    let deadline = Instant::now() + Duration::from_secs(3);
    while first.is_none() && Instant::now() < deadline {
        client.request_data().unwrap();
        client.read().unwrap();
        first = client.proxy::<CounterProxy>(counter).unwrap().value();
    }
    let first = first.expect("no counter data");
    assert!(client.timestamp() > player_protocol::Timestamp::ZERO);

    std::thread::sleep(Duration::from_millis(30));
    client.request_data().unwrap();
    client.read().unwrap();
    let second = client.proxy::<CounterProxy>(counter).unwrap().value().unwrap();
    assert!(second > first, "{} should follow {}", second, first);

    drop(client);
    fixture.server.shutdown();
}

#[test]
fn command_is_echoed_as_data() {
    let fixture = Fixture::start(ServerConfig {
        default_frequency_hz: 50,
        ..ServerConfig::default()
    });
    let mut client = fixture.connect();

    let echo = fixture.addr(ECHO);
    client.add_proxy(RawProxy::new(echo)).unwrap();
    assert_eq!(
        client.request_device_access(echo, AccessLevel::All).unwrap(),
        AccessLevel::All
    );

    client.write(echo, vec![7u8, 8, 9]).unwrap();
    let seen = read_until(&mut client, |c| {
        c.proxy::<RawProxy>(echo).is_some_and(|p| p.data() == [7, 8, 9])
    });
    assert!(seen, "echoed command never arrived");
    assert!(client.proxy::<RawProxy>(echo).unwrap().info().valid);
}

#[test]
fn write_without_write_access_is_ignored() {
    let fixture = Fixture::start(ServerConfig {
        default_frequency_hz: 50,
        ..ServerConfig::default()
    });
    let mut client = fixture.connect();

    let echo = fixture.addr(ECHO);
    client.add_proxy(RawProxy::new(echo)).unwrap();
    client.request_device_access(echo, AccessLevel::Read).unwrap();
    client.write(echo, vec![1u8]).unwrap();

    let deadline = Instant::now() + Duration::from_millis(200);
    while Instant::now() < deadline {
        client.read().unwrap();
    }
    assert!(!client.proxy::<RawProxy>(echo).unwrap().info().valid);
}

#[test]
fn config_request_round_trip() {
    let fixture = Fixture::start(ServerConfig::default());
    let mut client = fixture.connect();
    let echo = fixture.addr(ECHO);

    // 未打开的设备
    assert!(matches!(
        client.request_ack(echo, vec![1u8, 2, 3]),
        Err(ClientError::Nack { .. })
    ));

    client.request_device_access(echo, AccessLevel::Read).unwrap();
    let reply = client.request_ack(echo, vec![1u8, 2, 3]).unwrap();
    assert_eq!(&reply[..], &[1, 2, 3]);
}

#[test]
fn device_list_and_name_service() {
    let mut robot_names = BTreeMap::new();
    robot_names.insert("robot".to_string(), 6666);
    let fixture = Fixture::start(ServerConfig {
        robot_names,
        ..ServerConfig::default()
    });
    let mut client = fixture.connect();

    let devices = client.get_device_list().unwrap();
    assert_eq!(
        devices,
        vec![
            DeviceInfo {
                address: fixture.addr(COUNTER),
                driver_name: "counter".into(),
            },
            DeviceInfo {
                address: fixture.addr(EXCLUSIVE),
                driver_name: "counter".into(),
            },
            DeviceInfo {
                address: fixture.addr(ECHO),
                driver_name: "echo".into(),
            },
        ]
    );

    assert_eq!(client.lookup_port("robot").unwrap(), 6666);
    assert!(matches!(client.lookup_port("nobody"), Err(ClientError::Nack { .. })));
}

#[test]
fn exclusive_device_rejects_second_subscriber() {
    let fixture = Fixture::start(ServerConfig::default());
    let exclusive = fixture.addr(EXCLUSIVE);

    let mut first = fixture.connect();
    // All 需要两个订阅，超过独占设备的上限
    assert!(matches!(
        first.request_device_access(exclusive, AccessLevel::All),
        Err(ClientError::Nack { .. })
    ));
    assert_eq!(
        first.request_device_access(exclusive, AccessLevel::Read).unwrap(),
        AccessLevel::Read
    );

    let mut second = fixture.connect();
    second.add_proxy(CounterProxy::new(exclusive)).unwrap();
    assert!(matches!(
        second.request_device_access(exclusive, AccessLevel::Read),
        Err(ClientError::Nack { .. })
    ));
    assert_eq!(
        second.proxy::<CounterProxy>(exclusive).unwrap().info().access,
        AccessLevel::Error
    );

    // 第一个客户端断开后设备可再次打开
    drop(first);
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut granted = None;
    while granted.is_none() && Instant::now() < deadline {
        granted = second.request_device_access(exclusive, AccessLevel::Read).ok();
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(granted, Some(AccessLevel::Read));
}

#[test]
fn data_mode_and_frequency_controls() {
    let fixture = Fixture::start(ServerConfig::default());
    let mut client = fixture.connect();

    client.set_data_mode(DataMode::PushNew).unwrap();
    client.set_frequency(20).unwrap();
    assert!(matches!(client.set_frequency(0), Err(ClientError::Nack { .. })));

    let counter = fixture.addr(COUNTER);
    client.add_proxy(CounterProxy::new(counter)).unwrap();
    client.request_device_access(counter, AccessLevel::Read).unwrap();
    assert!(read_until(&mut client, |c| {
        c.proxy::<CounterProxy>(counter).is_some_and(|p| p.value().is_some())
    }));
}

#[test]
fn authentication() {
    let config = ServerConfig {
        auth_key: Some("secret".into()),
        ..ServerConfig::default()
    };
    let fixture = Fixture::start(config);

    let mut rejected = fixture.connect();
    assert!(matches!(
        rejected.authenticate("wrong"),
        Err(ClientError::Nack { .. })
    ));

    let mut client = fixture.connect();
    client.authenticate("secret").unwrap();
    assert_eq!(client.get_device_list().unwrap().len(), 3);
}

#[test]
fn server_shutdown_surfaces_as_disconnect() {
    let fixture = Fixture::start(ServerConfig::default());
    let mut client = fixture.connect();
    let counter = fixture.addr(COUNTER);
    client.request_device_access(counter, AccessLevel::Read).unwrap();

    fixture.server.shutdown();
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        match client.read() {
            Ok(()) => assert!(Instant::now() < deadline, "server never closed the connection"),
            Err(e) => {
                assert!(e.is_disconnect(), "unexpected error {}", e);
                break;
            },
        }
    }
}
