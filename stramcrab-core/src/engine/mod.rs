//! Operator execution driven by window control signals.

use crate::checkpoint::{CheckpointOutcome, CheckpointTrigger, StateStore};
use crate::types::{ControlSignal, OperatorId, WindowId};
use crate::window::SweepableReservoir;
use anyhow::{Context, Result, bail};
use std::sync::Arc;

mod node;
mod operator;

pub use node::*;
pub use operator::*;

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
