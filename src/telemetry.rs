// src/telemetry.rs

//! Feature-gated instrumentation.
//!
//! With the `weft_telemetry` feature enabled, lifecycle transitions and
//! slide passes emit `tracing` events; without it every emitter compiles to
//! a no-op.

#[cfg(feature = "weft_telemetry")]
pub mod enabled {
  //! `tracing`-backed emitters.

  /// Records one pass of the slide engine with the queue depths it saw.
  pub fn slide_pass(puts: usize, takes: usize, buffered: usize) {
    tracing::trace!(target: "weft::slide", puts, takes, buffered, "slide pass");
  }

  /// Records the OPEN -> CLOSED transition.
  pub fn closed() {
    tracing::debug!(target: "weft::lifecycle", "channel closed");
  }

  /// Records a flush resolving `takes` outstanding consumers.
  pub fn flushed(takes: usize) {
    tracing::debug!(target: "weft::lifecycle", takes, "channel flushed");
  }

  /// Records the transition to ENDED.
  pub fn ended() {
    tracing::debug!(target: "weft::lifecycle", "channel ended");
  }
}

#[cfg(not(feature = "weft_telemetry"))]
pub mod disabled {
  //! No-op emitters compiled in when telemetry is off.

  /// Records one pass of the slide engine.
  #[inline(always)]
  pub fn slide_pass(_puts: usize, _takes: usize, _buffered: usize) {}

  /// Records the OPEN -> CLOSED transition.
  #[inline(always)]
  pub fn closed() {}

  /// Records a flush.
  #[inline(always)]
  pub fn flushed(_takes: usize) {}

  /// Records the transition to ENDED.
  #[inline(always)]
  pub fn ended() {}
}

#[cfg(feature = "weft_telemetry")]
pub use enabled::{closed, ended, flushed, slide_pass};

#[cfg(not(feature = "weft_telemetry"))]
pub use disabled::{closed, ended, flushed, slide_pass};
