use super::*;
use crate::recovery::ChannelTunables;

/// Opens an endpoint for a coordinator address.
#[async_trait]
pub trait Connector: Send + Sync {
    type Endpoint: ControlEndpoint + 'static;

    async fn connect(&self, uri: &ConnectUri) -> Result<Self::Endpoint, CallError>;
}

/// Where the current coordinator address is published.
pub trait PointerSource: Send + Sync {
    fn read_pointer(&self) -> Result<ConnectUri>;
}

impl PointerSource for FsRecoveryStore {
    fn read_pointer(&self) -> Result<ConnectUri> {
        FsRecoveryStore::read_pointer(self)
    }
}

impl<P: PointerSource + ?Sized> PointerSource for Arc<P> {
    fn read_pointer(&self) -> Result<ConnectUri> {
        (**self).read_pointer()
    }
}

struct ChannelState<E> {
    endpoint: Option<E>,
    address: Option<String>,
    last_success: Instant,
    tunables: ChannelTunables,
}

enum Attempt {
    /// Surfaced to the caller immediately.
    Fatal(CallError),
    Retry(CallError),
}

/// Control endpoint that follows the coordinator across restarts.
///
/// Connects lazily to the address read from the pointer record. A failed
/// call drops the connection and is retried after `retry_delay` for as
/// long as the last successful call (or the first connect to a new address)
/// is less than `retry_timeout` ago; after that the failure is returned.
/// Tunables come from the pointer record.
///
/// Calls are serialized: a caller waiting out a reconnect holds up every
/// other caller of the same channel.
pub struct ResilientChannel<C: Connector, P: PointerSource> {
    connector: C,
    pointer: P,
    state: Mutex<ChannelState<C::Endpoint>>,
}

impl<C: Connector, P: PointerSource> ResilientChannel<C, P> {
    pub fn new(connector: C, pointer: P) -> Self {
        Self {
            connector,
            pointer,
            state: Mutex::new(ChannelState {
                endpoint: None,
                address: None,
                last_success: Instant::now(),
                tunables: ChannelTunables::default(),
            }),
        }
    }

    /// Address of the last coordinator connected to.
    pub async fn address(&self) -> Option<String> {
        self.state.lock().await.address.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.endpoint.is_some()
    }

    /// Drop the current connection; the next call reconnects.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.endpoint.take().is_some() {
            tracing::debug!(
                "closing control connection to {}",
                state.address.as_deref().unwrap_or("<none>")
            );
        }
    }

    async fn attempt(
        &self,
        state: &mut ChannelState<C::Endpoint>,
        request: &ControlRequest,
    ) -> Result<ControlResponse, Attempt> {
        if state.endpoint.is_none() {
            let uri = self.pointer.read_pointer().map_err(|err| {
                Attempt::Fatal(
                    CallError::other("failed to read coordinator address").with_source(err),
                )
            })?;
            let address = uri.address();
            if state.address.as_deref() != Some(address.as_str()) {
                tracing::debug!("got new control address {}", uri);
                state.last_success = Instant::now();
                state.address = Some(address.clone());
            }
            state.tunables = uri.tunables;

            let call_timeout = state.tunables.call_timeout;
            let endpoint = tokio::time::timeout(call_timeout, self.connector.connect(&uri))
                .await
                .map_err(|_| {
                    Attempt::Retry(CallError::timeout(format!(
                        "connect to {address} timed out after {call_timeout:?}"
                    )))
                })?
                .map_err(Attempt::Retry)?;
            state.endpoint = Some(endpoint);
        }

        let call_timeout = state.tunables.call_timeout;
        let Some(endpoint) = state.endpoint.as_ref() else {
            return Err(Attempt::Fatal(CallError::other("control endpoint missing")));
        };
        tokio::time::timeout(call_timeout, endpoint.call(request.clone()))
            .await
            .map_err(|_| {
                Attempt::Retry(CallError::timeout(format!(
                    "{} timed out after {call_timeout:?}",
                    request.name()
                )))
            })?
            .map_err(Attempt::Retry)
    }
}

#[async_trait]
impl<C: Connector, P: PointerSource> ControlEndpoint for ResilientChannel<C, P> {
    async fn call(&self, request: ControlRequest) -> Result<ControlResponse, CallError> {
        let mut state = self.state.lock().await;
        loop {
            match self.attempt(&mut state, &request).await {
                Ok(response) => {
                    state.last_success = Instant::now();
                    return Ok(response);
                }
                Err(Attempt::Fatal(err)) => {
                    state.endpoint = None;
                    return Err(err);
                }
                Err(Attempt::Retry(err)) => {
                    state.endpoint = None;
                    let elapsed = state.last_success.elapsed();
                    let ChannelTunables {
                        retry_delay,
                        retry_timeout,
                        ..
                    } = state.tunables;
                    if elapsed < retry_timeout {
                        tracing::warn!(
                            "{} failed, reconnecting after {:?} (remaining {:?}): {}",
                            request.name(),
                            retry_delay,
                            retry_timeout - elapsed,
                            err
                        );
                        tokio::time::sleep(retry_delay).await;
                    } else {
                        tracing::error!(
                            "giving up {} after {:?} without a successful call: {}",
                            request.name(),
                            elapsed,
                            err
                        );
                        return Err(err);
                    }
                }
            }
        }
    }
}
