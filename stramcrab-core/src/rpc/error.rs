use super::*;

/// Failure class of a control call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// No connection could be established or it was lost.
    Connect,
    /// The connect or call did not finish within the call timeout.
    Timeout,
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Connect => f.write_str("connect"),
            FailureKind::Timeout => f.write_str("timeout"),
            FailureKind::Other => f.write_str("call"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind} failure: {message}")]
pub struct CallError {
    pub kind: FailureKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CallError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Connect, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Other, message)
    }

    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Classify a socket error.
    pub fn from_io(context: impl Into<String>, err: io::Error) -> Self {
        Self::new(io_failure_kind(err.kind()), context).with_source(err)
    }

    /// Classify a transport error by the socket error inside it, if any.
    pub fn from_transport(context: impl Into<String>, err: anyhow::Error) -> Self {
        let kind = err
            .downcast_ref::<io::Error>()
            .map(|io_err| io_failure_kind(io_err.kind()))
            .unwrap_or(FailureKind::Other);
        Self::new(kind, context).with_source(err)
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }
}

fn io_failure_kind(kind: io::ErrorKind) -> FailureKind {
    match kind {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => FailureKind::Connect,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FailureKind::Timeout,
        _ => FailureKind::Other,
    }
}
