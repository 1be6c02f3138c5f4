use super::*;
use anyhow::anyhow;
use crate::recovery::ChannelTunables;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Serve,
    /// Connects are refused and calls on open connections fail.
    Down,
    Hang,
}

#[derive(Default)]
struct MockNetwork {
    modes: StdMutex<HashMap<String, Mode>>,
    connects: StdMutex<Vec<(Duration, String)>>,
    started: StdMutex<Option<Instant>>,
}

impl MockNetwork {
    fn new() -> Arc<Self> {
        let network = Arc::new(Self::default());
        *network.started.lock().unwrap() = Some(Instant::now());
        network
    }

    fn set(&self, address: &str, mode: Mode) {
        self.modes.lock().unwrap().insert(address.to_string(), mode);
    }

    fn mode(&self, address: &str) -> Mode {
        self.modes
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(Mode::Down)
    }

    fn connects(&self) -> Vec<(Duration, String)> {
        self.connects.lock().unwrap().clone()
    }

    fn connected_addresses(&self) -> Vec<String> {
        self.connects().into_iter().map(|(_, address)| address).collect()
    }
}

struct MockEndpoint {
    network: Arc<MockNetwork>,
    address: String,
}

#[async_trait]
impl ControlEndpoint for MockEndpoint {
    async fn call(&self, request: ControlRequest) -> Result<ControlResponse, CallError> {
        match self.network.mode(&self.address) {
            Mode::Serve => Ok(match request {
                ControlRequest::Register(_) => {
                    ControlResponse::Registered(RegistrationAck { incarnation: 1 })
                }
                ControlRequest::Heartbeat(_) => ControlResponse::Heartbeat(HeartbeatAck {
                    incarnation: 1,
                    committed_window: None,
                }),
                _ => ControlResponse::Ack,
            }),
            Mode::Down => Err(CallError::connect(format!("{} reset", self.address))),
            Mode::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Connector for Arc<MockNetwork> {
    type Endpoint = MockEndpoint;

    async fn connect(&self, uri: &ConnectUri) -> Result<MockEndpoint, CallError> {
        let address = uri.address();
        let started = self.started.lock().unwrap().unwrap_or_else(Instant::now);
        self.connects
            .lock()
            .unwrap()
            .push((started.elapsed(), address.clone()));
        match self.mode(&address) {
            Mode::Serve => Ok(MockEndpoint {
                network: Arc::clone(self),
                address,
            }),
            Mode::Down => Err(CallError::connect(format!("{address} refused"))),
            Mode::Hang => std::future::pending().await,
        }
    }
}

#[derive(Default)]
struct StaticPointer {
    uri: StdMutex<Option<ConnectUri>>,
}

impl StaticPointer {
    fn pointing_at(port: u16) -> Arc<Self> {
        let pointer = Arc::new(Self::default());
        pointer.point_at(port);
        pointer
    }

    fn point_at(&self, port: u16) {
        *self.uri.lock().unwrap() = Some(ConnectUri::new("10.1.1.1", port, tunables()));
    }
}

impl PointerSource for StaticPointer {
    fn read_pointer(&self) -> Result<ConnectUri> {
        self.uri
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("no pointer written"))
    }
}

fn tunables() -> ChannelTunables {
    ChannelTunables {
        call_timeout: Duration::from_secs(5),
        retry_delay: Duration::from_secs(10),
        retry_timeout: Duration::from_secs(30),
    }
}

fn address(port: u16) -> String {
    format!("10.1.1.1:{port}")
}

fn heartbeat() -> ContainerHeartbeat {
    ContainerHeartbeat {
        container_id: "c-1".to_string(),
        sent_millis: 0,
    }
}

#[tokio::test(start_paused = true)]
async fn test_calls_reuse_connection() {
    let network = MockNetwork::new();
    network.set(&address(1), Mode::Serve);
    let channel = ResilientChannel::new(Arc::clone(&network), StaticPointer::pointing_at(1));

    let ack = channel
        .register(ContainerRegistration {
            container_id: "c-1".to_string(),
            host: "worker-1".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(ack.incarnation, 1);
    channel.heartbeat(heartbeat()).await.unwrap();

    assert_eq!(network.connected_addresses(), vec![address(1)]);
    assert!(channel.is_connected().await);
    assert_eq!(channel.address().await, Some(address(1)));
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_retry_timeout() {
    let network = MockNetwork::new();
    let channel = ResilientChannel::new(Arc::clone(&network), StaticPointer::pointing_at(1));
    let started = Instant::now();

    let err = channel.heartbeat(heartbeat()).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Connect);
    let attempts: Vec<_> = network.connects().into_iter().map(|(at, _)| at).collect();
    assert_eq!(
        attempts,
        vec![
            Duration::from_secs(0),
            Duration::from_secs(10),
            Duration::from_secs(20),
            Duration::from_secs(30)
        ]
    );
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert!(!channel.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_is_retried_then_surfaced() {
    let network = MockNetwork::new();
    network.set(&address(1), Mode::Hang);
    let channel = ResilientChannel::new(Arc::clone(&network), StaticPointer::pointing_at(1));
    let started = Instant::now();

    let err = channel.heartbeat(heartbeat()).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Timeout);
    assert_eq!(network.connects().len(), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(35));
}

#[tokio::test(start_paused = true)]
async fn test_hung_call_times_out() {
    let network = MockNetwork::new();
    network.set(&address(1), Mode::Serve);
    let channel = ResilientChannel::new(Arc::clone(&network), StaticPointer::pointing_at(1));
    channel.heartbeat(heartbeat()).await.unwrap();

    network.set(&address(1), Mode::Hang);
    let err = channel.heartbeat(heartbeat()).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Timeout);
    assert!(err.to_string().contains("timed out"), "{err}");
}

#[tokio::test(start_paused = true)]
async fn test_follows_pointer_to_new_address() {
    let network = MockNetwork::new();
    network.set(&address(1), Mode::Serve);
    network.set(&address(2), Mode::Serve);
    let pointer = StaticPointer::pointing_at(1);
    let channel = ResilientChannel::new(Arc::clone(&network), Arc::clone(&pointer));
    channel.heartbeat(heartbeat()).await.unwrap();

    network.set(&address(1), Mode::Down);
    pointer.point_at(2);
    let started = Instant::now();
    channel.heartbeat(heartbeat()).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert_eq!(network.connected_addresses(), vec![address(1), address(2)]);
    assert_eq!(channel.address().await, Some(address(2)));
}

#[tokio::test(start_paused = true)]
async fn test_new_address_resets_retry_budget() {
    let network = MockNetwork::new();
    network.set(&address(1), Mode::Serve);
    network.set(&address(4), Mode::Serve);
    let pointer = StaticPointer::pointing_at(1);
    let channel = ResilientChannel::new(Arc::clone(&network), Arc::clone(&pointer));
    channel.heartbeat(heartbeat()).await.unwrap();
    network.set(&address(1), Mode::Down);

    let mover = {
        let pointer = Arc::clone(&pointer);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            pointer.point_at(3);
            tokio::time::sleep(Duration::from_secs(20)).await;
            pointer.point_at(4);
        })
    };

    let started = Instant::now();
    channel.heartbeat(heartbeat()).await.unwrap();
    mover.await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(50));
    assert_eq!(
        network.connected_addresses(),
        vec![
            address(1),
            address(1),
            address(1),
            address(3),
            address(3),
            address(4)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_pointer_failure_is_not_retried() {
    let network = MockNetwork::new();
    let channel = ResilientChannel::new(Arc::clone(&network), Arc::new(StaticPointer::default()));
    let started = Instant::now();

    let err = channel.heartbeat(heartbeat()).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Other);
    assert!(network.connects().is_empty());
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_close_forces_reconnect() {
    let network = MockNetwork::new();
    network.set(&address(1), Mode::Serve);
    let channel = ResilientChannel::new(Arc::clone(&network), StaticPointer::pointing_at(1));
    channel.heartbeat(heartbeat()).await.unwrap();
    channel.close().await;
    assert!(!channel.is_connected().await);
    channel.heartbeat(heartbeat()).await.unwrap();
    assert_eq!(network.connects().len(), 2);
}

#[tokio::test]
async fn test_unexpected_response_is_other_failure() {
    struct AckEverything;

    #[async_trait]
    impl ControlEndpoint for AckEverything {
        async fn call(&self, _request: ControlRequest) -> Result<ControlResponse, CallError> {
            Ok(ControlResponse::Ack)
        }
    }

    let err = AckEverything.heartbeat(heartbeat()).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Other);
    assert!(err.to_string().contains("unexpected response to heartbeat"));
    AckEverything
        .log(LogMessage {
            container_id: "c-1".to_string(),
            level: LogLevel::Info,
            message: "hello".to_string(),
        })
        .await
        .unwrap();
}

#[test]
fn test_io_errors_are_classified() {
    let kind = |kind| CallError::from_io("x", io::Error::from(kind)).kind();
    assert_eq!(kind(io::ErrorKind::ConnectionRefused), FailureKind::Connect);
    assert_eq!(kind(io::ErrorKind::NotConnected), FailureKind::Connect);
    assert_eq!(kind(io::ErrorKind::AddrNotAvailable), FailureKind::Connect);
    assert_eq!(kind(io::ErrorKind::TimedOut), FailureKind::Timeout);
    assert_eq!(kind(io::ErrorKind::WouldBlock), FailureKind::Timeout);
    assert_eq!(kind(io::ErrorKind::PermissionDenied), FailureKind::Other);

    let wrapped = anyhow::Error::from(io::Error::from(io::ErrorKind::UnexpectedEof));
    assert_eq!(
        CallError::from_transport("read", wrapped).kind(),
        FailureKind::Connect
    );
    assert_eq!(
        CallError::from_transport("read", anyhow!("garbage")).kind(),
        FailureKind::Other
    );
}

#[test]
fn test_envelope_is_length_prefixed_and_keeps_call_id() {
    let envelope = Envelope::Failure {
        call_id: 7,
        message: "nope".to_string(),
    };
    let encoded = envelope.encode().unwrap();
    let body_len = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
    assert_eq!(body_len as usize, encoded.len() - 4);

    let decoded = Envelope::decode(&encoded[4..]).unwrap();
    assert_eq!(decoded.call_id(), 7);
    assert_eq!(decoded, envelope);
}

#[test]
fn test_envelope_decode_rejects_garbage() {
    let err = Envelope::decode(&[99, 0, 0, 0, 1]).unwrap_err();
    assert!(err.to_string().contains("malformed envelope"), "{err}");
    assert!(Envelope::decode(&[]).is_err());
}

#[tokio::test]
async fn test_read_envelope_rejects_oversized_body() {
    let bytes = ((MAX_ENVELOPE_LEN + 1) as u32).to_be_bytes();
    let err = Envelope::read_from(&mut &bytes[..]).await.unwrap_err();
    assert!(err.to_string().contains("exceeds"), "{err}");
}

#[tokio::test]
async fn test_server_answers_non_call_by_closing() {
    let (addr, shutdown, handle) = start_server(Echo { reject: false }).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    Envelope::Reply {
        call_id: 1,
        response: ControlResponse::Ack,
    }
    .write_to(&mut stream)
    .await
    .unwrap();

    let err = Envelope::read_from(&mut stream).await.unwrap_err();
    assert_eq!(
        CallError::from_transport("read", err).kind(),
        FailureKind::Connect
    );

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

struct Echo {
    reject: bool,
}

#[async_trait]
impl ControlEndpoint for Echo {
    async fn call(&self, request: ControlRequest) -> Result<ControlResponse, CallError> {
        if self.reject {
            return Err(CallError::other(format!("{} refused", request.name())));
        }
        Ok(match request {
            ControlRequest::Register(_) => {
                ControlResponse::Registered(RegistrationAck { incarnation: 9 })
            }
            _ => ControlResponse::Ack,
        })
    }
}

async fn start_server(
    endpoint: Echo,
) -> (
    std::net::SocketAddr,
    watch::Sender<bool>,
    tokio::task::JoinHandle<Result<()>>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(ControlServer::serve(
        listener,
        Arc::new(endpoint),
        shutdown_rx,
    ));
    (addr, shutdown_tx, handle)
}

#[tokio::test]
async fn test_tcp_call_roundtrip() {
    let (addr, shutdown, handle) = start_server(Echo { reject: false }).await;
    let endpoint = TcpControlEndpoint::connect(&addr.to_string()).await.unwrap();

    let ack = endpoint
        .register(ContainerRegistration {
            container_id: "c-7".to_string(),
            host: "h".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(ack.incarnation, 9);
    endpoint
        .report_checkpoint(CheckpointReport {
            container_id: "c-7".to_string(),
            operator_id: 1,
            window_id: WindowId::new(1, 2),
        })
        .await
        .unwrap();

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_tcp_failure_reply_becomes_call_error() {
    let (addr, shutdown, handle) = start_server(Echo { reject: true }).await;
    let endpoint = TcpControlEndpoint::connect(&addr.to_string()).await.unwrap();

    let err = endpoint
        .report_error(ErrorReport {
            container_id: "c-7".to_string(),
            operator_id: None,
            message: "bad".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Other);
    assert!(err.to_string().contains("report_error refused"), "{err}");

    drop(shutdown);
    handle.await.unwrap().unwrap();
}

/// Fails its first accepts the way an exhausted descriptor table does.
struct FlakyListener {
    inner: TcpListener,
    failures: Vec<io::Error>,
}

#[async_trait]
impl ControlListener for FlakyListener {
    async fn accept(&mut self) -> io::Result<(TcpStream, std::net::SocketAddr)> {
        match self.failures.pop() {
            Some(err) => Err(err),
            None => self.inner.accept().await,
        }
    }

    fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.inner.local_addr()
    }
}

#[tokio::test]
async fn test_server_survives_accept_errors() {
    let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = inner.local_addr().unwrap();
    let listener = FlakyListener {
        inner,
        failures: vec![
            io::Error::other("too many open files"),
            io::Error::from(io::ErrorKind::ConnectionAborted),
            io::Error::other("too many open files"),
        ],
    };
    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(ControlServer::serve(
        listener,
        Arc::new(Echo { reject: false }),
        shutdown_rx,
    ));

    let endpoint = TcpControlEndpoint::connect(&addr.to_string()).await.unwrap();
    let ack = tokio::time::timeout(
        Duration::from_secs(5),
        endpoint.register(ContainerRegistration {
            container_id: "c-7".to_string(),
            host: "h".to_string(),
        }),
    )
    .await
    .expect("server stopped accepting")
    .unwrap();
    assert_eq!(ack.incarnation, 9);
    assert!(!handle.is_finished());

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_tcp_connect_refused_is_connect_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = match TcpControlEndpoint::connect(&addr.to_string()).await {
        Ok(_) => panic!("connect to closed port succeeded"),
        Err(err) => err,
    };
    assert_eq!(err.kind(), FailureKind::Connect);
}

#[tokio::test]
async fn test_channel_survives_server_move() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FsRecoveryStore::new(dir.path()).unwrap());
    let tunables = ChannelTunables {
        call_timeout: Duration::from_secs(1),
        retry_delay: Duration::from_millis(50),
        retry_timeout: Duration::from_secs(10),
    };

    let (first_addr, first_shutdown, first_handle) = start_server(Echo { reject: false }).await;
    store
        .write_pointer(&ConnectUri::from_socket_addr(first_addr, tunables))
        .unwrap();
    let channel = ResilientChannel::new(TcpConnector, Arc::clone(&store));
    ping(&channel).await;
    assert_eq!(channel.address().await, Some(first_addr.to_string()));

    first_shutdown.send(true).unwrap();
    first_handle.await.unwrap().unwrap();

    let (second_addr, second_shutdown, second_handle) = start_server(Echo { reject: false }).await;
    store
        .write_pointer(&ConnectUri::from_socket_addr(second_addr, tunables))
        .unwrap();
    ping(&channel).await;
    assert_eq!(channel.address().await, Some(second_addr.to_string()));

    second_shutdown.send(true).unwrap();
    second_handle.await.unwrap().unwrap();
}

async fn ping<E: ControlEndpoint + ?Sized>(endpoint: &E) {
    endpoint
        .log(LogMessage {
            container_id: "c-9".to_string(),
            level: LogLevel::Debug,
            message: "ping".to_string(),
        })
        .await
        .unwrap();
}
