//! Worker container: registers with the coordinator, heartbeats, and runs a
//! window-driven operator whose checkpoints are reported back.

use crate::checkpoint::{CheckpointOutcome, FsStateStore, StateStore};
use crate::engine::{NodeConfig, Operator, OperatorNode};
use crate::rpc::{
    CheckpointReport, ContainerHeartbeat, ContainerRegistration, ControlEndpoint,
    CoordinatorProtocol, ErrorReport, HeartbeatAck, RegistrationAck,
};
use crate::types::{ContainerId, OperatorId, WindowId};
use crate::window::{SweepableReservoir, SystemTimeSource, TimeSource, WindowClock, WindowConfig};
use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

mod container;
mod counter;

pub use container::*;
pub use counter::*;

#[cfg(test)]
#[path = "tests/worker_tests.rs"]
mod tests;
