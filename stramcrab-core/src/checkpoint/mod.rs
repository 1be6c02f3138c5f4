//! Window-boundary checkpointing of operator state.
//!
//! The [`CheckpointTrigger`] decides at each `End` boundary whether an
//! operator's state goes to the [`StateStore`]; stores are keyed by
//! `(operator, window)`.

use crate::engine::Operator;
use crate::types::{OperatorId, WindowId};
use anyhow::{Context, Result, anyhow};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

mod storage;
mod trigger;

pub use storage::*;
pub use trigger::*;

#[cfg(test)]
#[path = "tests/checkpoint_tests.rs"]
mod tests;
