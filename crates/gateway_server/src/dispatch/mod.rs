//! Outbound message pipeline.
//!
//! Two bounded stages: the broadcast buffer drops on overflow, the worker
//! queue runs the task on the caller on overflow. Neither ever blocks the
//! read loop that produced the message.

pub mod broadcaster;
pub mod pool;

pub use broadcaster::{BroadcastJob, BroadcastTarget, Broadcaster, DeliveryTimeouts};
pub use pool::WorkerPool;
