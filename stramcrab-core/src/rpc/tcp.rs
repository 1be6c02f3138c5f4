use super::*;
use tokio::task::JoinSet;

/// Opens [`TcpControlEndpoint`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Endpoint = TcpControlEndpoint;

    async fn connect(&self, uri: &ConnectUri) -> Result<Self::Endpoint, CallError> {
        TcpControlEndpoint::connect(&uri.address()).await
    }
}

struct TcpClient {
    stream: TcpStream,
    next_call_id: u32,
}

/// One TCP connection to a [`ControlServer`], one call in flight at a time.
pub struct TcpControlEndpoint {
    peer: String,
    client: Mutex<TcpClient>,
}

impl TcpControlEndpoint {
    pub async fn connect(address: &str) -> Result<Self, CallError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|err| CallError::from_io(format!("connect to {address} failed"), err))?;
        let _ = stream.set_nodelay(true);
        tracing::debug!("connected to control server {}", address);
        Ok(Self {
            peer: address.to_string(),
            client: Mutex::new(TcpClient {
                stream,
                next_call_id: 0,
            }),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

#[async_trait]
impl ControlEndpoint for TcpControlEndpoint {
    async fn call(&self, request: ControlRequest) -> Result<ControlResponse, CallError> {
        let mut client = self.client.lock().await;
        let call_id = client.next_call_id;
        client.next_call_id = call_id.wrapping_add(1);

        let name = request.name();
        Envelope::Call { call_id, request }
            .write_to(&mut client.stream)
            .await
            .map_err(|err| CallError::from_transport(format!("send {name} to {}", self.peer), err))?;

        let reply = Envelope::read_from(&mut client.stream)
            .await
            .map_err(|err| {
                CallError::from_transport(format!("receive {name} reply from {}", self.peer), err)
            })?;
        if reply.call_id() != call_id {
            return Err(CallError::other(format!(
                "reply for call {} while waiting for {}",
                reply.call_id(),
                call_id
            )));
        }
        match reply {
            Envelope::Reply { response, .. } => Ok(response),
            Envelope::Failure { message, .. } => Err(CallError::other(format!(
                "{name} rejected by {}: {message}",
                self.peer
            ))),
            Envelope::Call { .. } => Err(CallError::other("unexpected call from server")),
        }
    }
}

/// Pause after an accept error that is not tied to a single connection,
/// such as descriptor exhaustion.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Source of inbound control connections.
#[async_trait]
pub trait ControlListener: Send {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl ControlListener for TcpListener {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Serves control calls from TCP connections.
pub struct ControlServer;

impl ControlServer {
    /// Accept connections until `shutdown` turns true or its sender is
    /// dropped. Open connections are closed on return.
    ///
    /// Accept errors never end the loop: a failed handshake is skipped and
    /// any other error is retried after [`ACCEPT_ERROR_BACKOFF`].
    pub async fn serve<L, E>(
        mut listener: L,
        endpoint: Arc<E>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()>
    where
        L: ControlListener,
        E: ControlEndpoint + 'static,
    {
        let local_addr = listener.local_addr()?;
        tracing::info!("control server listening on {}", local_addr);
        let mut connections = JoinSet::new();
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let endpoint = Arc::clone(&endpoint);
                        connections.spawn(async move {
                            if let Err(err) = serve_connection(stream, endpoint).await {
                                tracing::debug!("control connection {} closed: {:#}", peer, err);
                            }
                        });
                    }
                    Err(err) if is_connection_error(&err) => {
                        tracing::debug!("dropped connection before accept: {}", err);
                    }
                    Err(err) => {
                        tracing::warn!(
                            "accept on {} failed, retrying in {:?}: {}",
                            local_addr,
                            ACCEPT_ERROR_BACKOFF,
                            err
                        );
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        connections.shutdown().await;
        tracing::info!("control server on {} stopped", local_addr);
        Ok(())
    }
}

async fn serve_connection<E: ControlEndpoint + ?Sized>(
    mut stream: TcpStream,
    endpoint: Arc<E>,
) -> Result<()> {
    loop {
        let envelope = match Envelope::read_from(&mut stream).await {
            Ok(envelope) => envelope,
            Err(err) if is_disconnect(&err) => return Ok(()),
            Err(err) => return Err(err),
        };
        let (call_id, request) = match envelope {
            Envelope::Call { call_id, request } => (call_id, request),
            other => bail!("expected a call, got {:?}", other),
        };
        let reply = match endpoint.call(request).await {
            Ok(response) => Envelope::Reply { call_id, response },
            Err(err) => Envelope::Failure {
                call_id,
                message: err.to_string(),
            },
        };
        reply.write_to(&mut stream).await?;
    }
}

fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

fn is_disconnect(err: &anyhow::Error) -> bool {
    err.downcast_ref::<io::Error>().is_some_and(|io_err| {
        matches!(
            io_err.kind(),
            io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
        )
    })
}
