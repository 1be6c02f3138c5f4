//! # StramCrab Core
//!
//! Control-plane backbone of the StramCrab stream processing runtime.
//!
//! - [`types`]: [`WindowId`](types::WindowId), [`ControlSignal`](types::ControlSignal)
//!   and the identifiers shared by every component.
//! - [`window`]: the window clock and its per-consumer reservoirs.
//! - [`checkpoint`]: window-boundary checkpointing into a [`StateStore`](checkpoint::StateStore).
//! - [`engine`]: operators driven by window signals.
//! - [`recovery`]: journal + snapshot persistence and the coordinator address pointer.
//! - [`rpc`]: the control protocol, its TCP transport and the reconnecting
//!   [`ResilientChannel`](rpc::ResilientChannel).
//! - [`coordinator`]: durable control-plane state served over [`rpc`].
//! - [`worker`]: a container that registers, heartbeats and checkpoints.

pub mod checkpoint;
pub mod coordinator;
pub mod engine;
pub mod recovery;
pub mod rpc;
pub mod types;
pub mod window;
pub mod worker;
