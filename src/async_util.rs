// src/async_util.rs

//! Scheduler-yield helpers.

use std::time::Duration;

/// Suspends the current task for `delay`. A zero-length delay yields
/// exactly one scheduler tick, which makes `timeout(Duration::ZERO)` the
/// cooperative "let someone else run" primitive.
pub async fn timeout(delay: Duration) {
  if delay.is_zero() {
    tokio::task::yield_now().await;
  } else {
    tokio::time::sleep(delay).await;
  }
}
