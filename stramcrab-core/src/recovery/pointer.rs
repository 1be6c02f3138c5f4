use super::*;

pub const DEFAULT_RPC_TIMEOUT_MILLIS: u64 = 5_000;
pub const DEFAULT_RETRY_DELAY_MILLIS: u64 = 10_000;
pub const DEFAULT_RETRY_TIMEOUT_MILLIS: u64 = 30_000;

const POINTER_SCHEME: &str = "stram";

/// Retry behaviour a coordinator advertises to its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTunables {
    /// Bound on a single connect or call.
    pub call_timeout: Duration,
    /// Pause between reconnect attempts.
    pub retry_delay: Duration,
    /// Give up once no call succeeded for this long.
    pub retry_timeout: Duration,
}

impl Default for ChannelTunables {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(DEFAULT_RPC_TIMEOUT_MILLIS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MILLIS),
            retry_timeout: Duration::from_millis(DEFAULT_RETRY_TIMEOUT_MILLIS),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PointerParams {
    #[serde(rename = "rpcTimeout")]
    rpc_timeout: Option<u64>,
    #[serde(rename = "retryDelayMillis")]
    retry_delay_millis: Option<u64>,
    #[serde(rename = "retryTimeoutMillis")]
    retry_timeout_millis: Option<u64>,
}

/// Coordinator address plus its advertised [`ChannelTunables`].
///
/// Textual form:
/// `stram://host:port?rpcTimeout=5000&retryDelayMillis=10000&retryTimeoutMillis=30000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectUri {
    pub host: String,
    pub port: u16,
    pub tunables: ChannelTunables,
}

impl ConnectUri {
    pub fn new(host: impl Into<String>, port: u16, tunables: ChannelTunables) -> Self {
        Self {
            host: host.into(),
            port,
            tunables,
        }
    }

    pub fn from_socket_addr(addr: std::net::SocketAddr, tunables: ChannelTunables) -> Self {
        Self::new(addr.ip().to_string(), addr.port(), tunables)
    }

    /// `host:port`, bracketing IPv6 hosts; accepted by `TcpStream::connect`.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for ConnectUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{POINTER_SCHEME}://{}?rpcTimeout={}&retryDelayMillis={}&retryTimeoutMillis={}",
            self.address(),
            self.tunables.call_timeout.as_millis(),
            self.tunables.retry_delay.as_millis(),
            self.tunables.retry_timeout.as_millis()
        )
    }
}

impl std::str::FromStr for ConnectUri {
    type Err = anyhow::Error;

    fn from_str(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let (_scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| anyhow!("connect uri {uri:?} has no scheme"))?;
        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, query),
            None => (rest, ""),
        };
        let authority = authority.split('/').next().unwrap_or_default();

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, port) = bracketed
                .split_once("]:")
                .ok_or_else(|| anyhow!("connect uri {uri:?} has no port"))?;
            (host, port)
        } else {
            authority
                .rsplit_once(':')
                .ok_or_else(|| anyhow!("connect uri {uri:?} has no port"))?
        };
        ensure!(!host.is_empty(), "connect uri {uri:?} has no host");
        let port = port
            .parse::<u16>()
            .with_context(|| format!("connect uri {uri:?} has an invalid port"))?;

        let params: PointerParams = serde_urlencoded::from_str(query)
            .with_context(|| format!("connect uri {uri:?} has invalid parameters"))?;
        let defaults = ChannelTunables::default();
        let millis = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };
        Ok(Self {
            host: host.to_string(),
            port,
            tunables: ChannelTunables {
                call_timeout: millis(params.rpc_timeout, defaults.call_timeout),
                retry_delay: millis(params.retry_delay_millis, defaults.retry_delay),
                retry_timeout: millis(params.retry_timeout_millis, defaults.retry_timeout),
            },
        })
    }
}
