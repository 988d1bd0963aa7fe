#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! Cooperative CSP-style channels for Rust.
//!
//! Weft provides a first-class coordination object through which producers
//! and consumers exchange values FIFO: unbuffered rendezvous or bounded
//! buffering, per-value transforms (including one-to-many expansion),
//! fan-out pipelines, fan-in merging, and a monotonic
//! OPEN -> CLOSED -> ENDED lifecycle with graceful draining.
//!
//! Channels run on the Tokio runtime: registering an intent spawns (or
//! wakes) the matchmaking task that services it, so every operation must be
//! made from within a runtime.
//!
//! ```
//! use weft::Channel;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let ch = Channel::from_iter([1, 2, 3], false);
//! assert_eq!(ch.to_vec().await, vec![1, 2, 3]);
//! ch.done().await;
//! # });
//! ```

pub mod buffer;
pub mod channel;
pub mod error;
pub mod pipe;
pub mod telemetry;
pub mod transform;

mod async_util;

pub use async_util::timeout;
pub use buffer::RingBuffer;
pub use channel::{Channel, Done, ProducerHandle, Put, State, Take};
pub use error::SendError;
pub use pipe::{merge, pipeline, Stage};
pub use transform::{Emitter, Transform};
