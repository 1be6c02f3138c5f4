//! Window clock: the logical clock that batches, checkpoints and recovers
//! operator state.
//!
//! - [`window_id_for`] / [`window_millis`] convert between wall-clock time and
//!   [`WindowId`]s.
//! - [`WindowGenerator`] is the pure state machine producing
//!   [`ControlSignal`]s.
//! - [`WindowClock`] drives a generator from a timer and fans signals out to
//!   per-consumer [`SweepableReservoir`]s.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Result, anyhow, bail, ensure};

use crate::types::{ControlSignal, EpochMillis, WindowId};

mod clock;
mod generator;
mod reservoir;
mod window_id;

pub use clock::*;
pub use generator::*;
pub use reservoir::*;
pub use window_id::*;

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
