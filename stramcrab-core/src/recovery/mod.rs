//! Durable coordinator state.
//!
//! A recovery directory holds a write-ahead journal (`log`), the latest
//! snapshot (`snapshot`), their backups during rotation (`log0`,
//! `snapshot0`) and the coordinator address pointer (`heartbeatUri`).
//! Every operation leaves the directory in a state that [`restore`]
//! can repair after a crash.
//!
//! [`restore`]: RecoveryHandler::restore

use anyhow::{Context, Result, anyhow, ensure};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod codec;
mod error;
mod journal;
mod pointer;
mod store;

pub use codec::*;
pub use error::*;
pub use journal::*;
pub use pointer::*;
pub use store::*;

#[cfg(test)]
#[path = "tests/recovery_tests.rs"]
mod tests;
