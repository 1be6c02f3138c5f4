//! The coordinator: owner of the durable control-plane state and server of
//! the control protocol.

use crate::recovery::{
    ChannelTunables, ConnectUri, FsRecoveryStore, LogWriter, RecoveryHandler, Versioned,
};
use crate::rpc::{
    CallError, ControlEndpoint, ControlListener, ControlRequest, ControlResponse, ControlServer,
    HeartbeatAck, LogLevel, RegistrationAck,
};
use crate::types::{ContainerId, EpochMillis, OperatorId, WindowId};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

mod server;
mod state;

pub use server::*;
pub use state::*;

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
