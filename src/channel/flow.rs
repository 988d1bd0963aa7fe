// src/channel/flow.rs

//! Detached producer and consumer loops.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::core::finish_after_consume;
use super::Channel;

/// Cooperative cancellation flag shared between a detached loop and the
/// handle that stops it. The loop observes the flag at its next iteration.
#[derive(Clone, Debug)]
pub(crate) struct CancelToken {
  flag: Arc<AtomicBool>,
}

impl CancelToken {
  pub(crate) fn new() -> Self {
    CancelToken { flag: Arc::new(AtomicBool::new(false)) }
  }

  pub(crate) fn cancel(&self) {
    self.flag.store(true, Ordering::Release);
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.flag.load(Ordering::Acquire)
  }
}

/// Handle returned by [`Channel::produce`]. Stops the producer loop at its
/// next iteration; dropping the handle does not stop the loop.
pub struct ProducerHandle {
  token: CancelToken,
}

impl ProducerHandle {
  /// Requests the producer loop stop. Idempotent.
  pub fn cancel(&self) {
    self.token.cancel();
  }
}

impl fmt::Debug for ProducerHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProducerHandle")
      .field("cancelled", &self.token.is_cancelled())
      .finish()
  }
}

impl<T: Send + 'static> Channel<T> {
  /// Spawns a detached loop that repeatedly invokes `producer` and puts
  /// each value. The loop yields one scheduler tick per iteration so a
  /// producer that is always ready cannot monopolize the runtime. It exits
  /// when the channel closes or the returned handle is cancelled; a panic
  /// in the producer escapes through the spawned task to the process panic
  /// hook and leaves the channel usable.
  pub fn produce<F, Fut>(&self, mut producer: F) -> ProducerHandle
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
  {
    let token = CancelToken::new();
    let loop_token = token.clone();
    let ch = self.clone();
    tokio::spawn(async move {
      loop {
        if loop_token.is_cancelled() {
          break;
        }
        tokio::task::yield_now().await;
        let value = producer().await;
        if ch.put(value).await.is_err() {
          break;
        }
      }
    });
    ProducerHandle { token }
  }

  /// Spawns a detached loop that feeds every value to `consumer`, awaiting
  /// each invocation. The next take is registered before the current
  /// consumer call is awaited, so delivery of value N+1 overlaps the
  /// processing of value N. The loop exits when the channel drains; the
  /// final consumer call completes before [`done`](Channel::done)
  /// listeners can observe the end.
  pub fn consume<F, Fut>(&self, mut consumer: F)
  where
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    {
      let mut core = self.shared.core.lock();
      core.consuming = true;
    }
    let ch = self.clone();
    tokio::spawn(async move {
      let mut pending = ch.take();
      loop {
        match pending.await {
          None => break,
          Some(value) => {
            pending = ch.take();
            consumer(value).await;
          }
        }
      }
      finish_after_consume(&ch.shared);
    });
  }
}
