use super::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRegistration {
    pub container_id: ContainerId,
    /// Address the container can be reached at, informational.
    pub host: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationAck {
    /// Coordinator incarnation that accepted the registration.
    pub incarnation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeartbeat {
    pub container_id: ContainerId,
    pub sent_millis: EpochMillis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub incarnation: u64,
    /// Oldest window every operator has checkpointed.
    pub committed_window: Option<WindowId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointReport {
    pub container_id: ContainerId,
    pub operator_id: OperatorId,
    pub window_id: WindowId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub container_id: ContainerId,
    pub operator_id: Option<OperatorId>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub container_id: ContainerId,
    pub level: LogLevel,
    pub message: String,
}

/// A control call, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlRequest {
    Register(ContainerRegistration),
    Heartbeat(ContainerHeartbeat),
    ReportCheckpoint(CheckpointReport),
    ReportError(ErrorReport),
    Log(LogMessage),
}

impl ControlRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ControlRequest::Register(_) => "register",
            ControlRequest::Heartbeat(_) => "heartbeat",
            ControlRequest::ReportCheckpoint(_) => "report_checkpoint",
            ControlRequest::ReportError(_) => "report_error",
            ControlRequest::Log(_) => "log",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlResponse {
    Registered(RegistrationAck),
    Heartbeat(HeartbeatAck),
    Ack,
}

/// Something that answers control calls: the coordinator itself, a
/// connection to it, or a channel that reconnects on failure.
#[async_trait]
pub trait ControlEndpoint: Send + Sync {
    async fn call(&self, request: ControlRequest) -> Result<ControlResponse, CallError>;
}

#[async_trait]
impl<E: ControlEndpoint + ?Sized> ControlEndpoint for Arc<E> {
    async fn call(&self, request: ControlRequest) -> Result<ControlResponse, CallError> {
        (**self).call(request).await
    }
}

/// Typed coordinator operations over any [`ControlEndpoint`].
#[async_trait]
pub trait CoordinatorProtocol: ControlEndpoint {
    async fn register(
        &self,
        registration: ContainerRegistration,
    ) -> Result<RegistrationAck, CallError> {
        match self.call(ControlRequest::Register(registration)).await? {
            ControlResponse::Registered(ack) => Ok(ack),
            other => Err(unexpected("register", &other)),
        }
    }

    async fn heartbeat(&self, heartbeat: ContainerHeartbeat) -> Result<HeartbeatAck, CallError> {
        match self.call(ControlRequest::Heartbeat(heartbeat)).await? {
            ControlResponse::Heartbeat(ack) => Ok(ack),
            other => Err(unexpected("heartbeat", &other)),
        }
    }

    async fn report_checkpoint(&self, report: CheckpointReport) -> Result<(), CallError> {
        expect_ack(
            "report_checkpoint",
            self.call(ControlRequest::ReportCheckpoint(report)).await?,
        )
    }

    async fn report_error(&self, report: ErrorReport) -> Result<(), CallError> {
        expect_ack(
            "report_error",
            self.call(ControlRequest::ReportError(report)).await?,
        )
    }

    async fn log(&self, message: LogMessage) -> Result<(), CallError> {
        expect_ack("log", self.call(ControlRequest::Log(message)).await?)
    }
}

impl<E: ControlEndpoint + ?Sized> CoordinatorProtocol for E {}

fn expect_ack(call: &str, response: ControlResponse) -> Result<(), CallError> {
    match response {
        ControlResponse::Ack => Ok(()),
        other => Err(unexpected(call, &other)),
    }
}

fn unexpected(call: &str, response: &ControlResponse) -> CallError {
    CallError::other(format!("unexpected response to {call}: {response:?}"))
}
