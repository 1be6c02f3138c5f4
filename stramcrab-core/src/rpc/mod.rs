//! Worker-to-coordinator control protocol.
//!
//! [`ControlEndpoint`] is the single call capability; the coordinator
//! operations of [`CoordinatorProtocol`] are built on it. A
//! [`ResilientChannel`] is itself an endpoint that survives coordinator
//! restarts by re-reading the address pointer and reconnecting.

use crate::recovery::{ConnectUri, FsRecoveryStore};
use crate::types::{ContainerId, EpochMillis, OperatorId, WindowId};
use anyhow::{Context, Result, bail, ensure};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

mod channel;
mod envelope;
mod error;
mod protocol;
mod tcp;

pub use channel::*;
pub use envelope::*;
pub use error::*;
pub use protocol::*;
pub use tcp::*;

#[cfg(test)]
#[path = "tests/rpc_tests.rs"]
mod tests;
