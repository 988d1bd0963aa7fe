// src/channel/core.rs

//! The shared state and slide engine behind every channel handle.
//!
//! ### Design notes
//!
//! 1.  **Central mutex**: a `parking_lot::Mutex` guards every queue and flag.
//!     It is never held across an await; the awaits inside the slide engine
//!     (user transforms) run with the lock released.
//! 2.  **Single-owner phases**: the `sliding`, `flushing`, and `consuming`
//!     flags make each lifecycle phase single-owner across suspension
//!     points. Registering an intent triggers the slide engine; if a slide
//!     task is already active the trigger is a no-op and the active task
//!     picks the new work up on its next pass.
//! 3.  **Drain before end**: a closed channel keeps matching until `puts`,
//!     `buf`, and `tails` are all empty; only then does `flush` resolve the
//!     outstanding takes and hand the channel to `finish`.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::buffer::RingBuffer;
use crate::telemetry;
use crate::transform::{self, Deferred, Expansion, Payload, Transform};

use super::flow::CancelToken;
use super::{Channel, State};

/// One slot of a buffered channel.
pub(crate) enum Entry<T> {
  /// A buffered put. Its resolver fired when it was accepted into the
  /// buffer; the payload still runs through the channel transform on drain.
  Deferred(Deferred<T>),
  /// A bare value loaded by `from_iter` or a caller-supplied buffer. Runs
  /// through the transform current at drain time.
  Raw(T),
  /// Expansion output re-queued during a drain; delivered as-is.
  Literal(T),
}

/// The mutable state of a channel.
pub(crate) struct Core<T> {
  pub(crate) puts: VecDeque<Deferred<T>>,
  pub(crate) tails: VecDeque<Deferred<T>>,
  pub(crate) takes: VecDeque<oneshot::Sender<Option<T>>>,
  pub(crate) buf: Option<RingBuffer<Entry<T>>>,
  pub(crate) pipeline: Vec<Channel<T>>,
  pub(crate) waiting: Vec<oneshot::Sender<()>>,
  pub(crate) state: State,
  pub(crate) sliding: bool,
  pub(crate) flushing: bool,
  pub(crate) consuming: bool,
  pub(crate) should_close: bool,
  /// Cancel slot for the pipeline forwarding loop.
  pub(crate) forward: Option<CancelToken>,
}

impl<T> Core<T> {
  pub(crate) fn new(buf: Option<RingBuffer<Entry<T>>>) -> Self {
    Core {
      puts: VecDeque::new(),
      tails: VecDeque::new(),
      takes: VecDeque::new(),
      buf,
      pipeline: Vec::new(),
      waiting: Vec::new(),
      state: State::Open,
      sliding: false,
      flushing: false,
      consuming: false,
      should_close: false,
      forward: None,
    }
  }

  pub(crate) fn buf_len(&self) -> usize {
    self.buf.as_ref().map_or(0, |b| b.len())
  }

  fn buf_empty(&self) -> bool {
    self.buf.as_ref().map_or(true, |b| b.is_empty())
  }

  /// True once every producer-side queue has emptied out.
  fn drained(&self) -> bool {
    self.puts.is_empty() && self.tails.is_empty() && self.buf_empty()
  }
}

/// The shared owner of a channel's state, wrapped in an `Arc` by the handle.
pub(crate) struct Shared<T> {
  pub(crate) core: Mutex<Core<T>>,
  pub(crate) transform: Mutex<Transform<T>>,
  pub(crate) capacity: Option<usize>,
}

// --- Slide engine ---

/// Whether a matchmaking step can make progress right now.
fn can_slide<T>(core: &Core<T>) -> bool {
  match core.buf.as_ref() {
    Some(buf) => {
      (!buf.is_full() && !core.puts.is_empty())
        || (!core.takes.is_empty() && !buf.is_empty())
    }
    None => !core.takes.is_empty() && !core.puts.is_empty(),
  }
}

/// Whether spawning a slide task would accomplish anything: a matchmaking
/// step, a tail splice, or the final flush.
fn wants_slide<T>(core: &Core<T>) -> bool {
  if can_slide(core) {
    return true;
  }
  if core.state == State::Open {
    return false;
  }
  if !core.puts.is_empty() || !core.buf_empty() {
    return false;
  }
  if !core.tails.is_empty() {
    return true;
  }
  // Once the flush has run there is nothing left for a slide task to do:
  // takes registered from then on resolve `None` at registration.
  !core.flushing
}

/// Spawns a slide task unless one is active or there is nothing to do.
///
/// Every registration path (put, take, tail, close) funnels through here.
pub(crate) fn trigger<T: Send + 'static>(shared: &Arc<Shared<T>>) {
  {
    let mut core = shared.core.lock();
    if core.sliding || !wants_slide(&core) {
      return;
    }
    core.sliding = true;
  }
  let shared = Arc::clone(shared);
  tokio::spawn(slide(shared));
}

/// Clears the `sliding` flag when the slide task exits, a panic out of a
/// user transform included.
struct SlideGuard<'a, T> {
  shared: &'a Arc<Shared<T>>,
}

impl<T> Drop for SlideGuard<'_, T> {
  fn drop(&mut self) {
    self.shared.core.lock().sliding = false;
  }
}

/// Advances the channel as far as possible, then drains tails and flushes
/// once the close conditions are met. Single-owner via `sliding`.
async fn slide<T: Send + 'static>(shared: Arc<Shared<T>>) {
  let guard = SlideGuard { shared: &shared };

  {
    let core = shared.core.lock();
    telemetry::slide_pass(core.puts.len(), core.takes.len(), core.buf_len());
  }

  loop {
    if shared.capacity.is_some() {
      buffered_slide(&shared).await;
    } else {
      direct_slide(&shared).await;
    }

    // Once the live queues have emptied, closed channels promote their
    // tails and run the matchmaking loop again.
    let spliced = {
      let mut core = shared.core.lock();
      if core.state != State::Open
        && !core.tails.is_empty()
        && core.puts.is_empty()
        && core.buf_empty()
      {
        while let Some(tail) = core.tails.pop_back() {
          core.puts.push_front(tail);
        }
        true
      } else {
        false
      }
    };
    if !spliced {
      break;
    }
  }

  let do_flush = {
    let core = shared.core.lock();
    core.state != State::Open && core.drained()
  };
  if do_flush {
    flush(&shared);
  }

  // Release the slider, then re-arm for any work that arrived while this
  // task was between locks.
  drop(guard);
  trigger(&shared);
}

fn deliver<T>(core: &mut Core<T>, value: T) {
  if let Some(take) = core.takes.pop_front() {
    let _ = take.send(Some(value));
  }
}

/// Unbuffered matchmaking: puts rendezvous directly with takes.
async fn direct_slide<T: Send + 'static>(shared: &Arc<Shared<T>>) {
  loop {
    let put = {
      let mut core = shared.core.lock();
      if core.takes.is_empty() {
        break;
      }
      match core.puts.pop_front() {
        Some(put) => put,
        None => break,
      }
    };
    let Deferred { payload, resolver } = put;
    let expansion = transform::run(payload, &shared.transform).await;

    let mut core = shared.core.lock();
    match expansion {
      Expansion::Drop => resolver.resolve(),
      Expansion::One(v) => {
        resolver.resolve();
        deliver(&mut core, v);
      }
      Expansion::Many(values) => match values.len() {
        0 => resolver.resolve(),
        1 => {
          resolver.resolve();
          if let Some(v) = values.into_iter().next() {
            deliver(&mut core, v);
          }
        }
        n => {
          // The original put resolves only after all n sub-records are
          // consumed. Front-pushing keeps the expansion contiguous at the
          // value's original position.
          resolver.fan_out(n);
          for v in values.into_iter().rev() {
            core.puts.push_front(Deferred::literal(v, resolver.clone()));
          }
        }
      },
    }
  }
}

/// Buffered matchmaking: drain the buffer into takes, then refill it from
/// puts. Buffer placement is acceptance, so puts resolve on entry.
async fn buffered_slide<T: Send + 'static>(shared: &Arc<Shared<T>>) {
  enum Step<T> {
    Drain(Entry<T>),
    Filled,
    Idle,
  }

  loop {
    let step = {
      let mut core = shared.core.lock();
      let Core { puts, takes, buf, .. } = &mut *core;
      let buf = match buf.as_mut() {
        Some(buf) => buf,
        None => return,
      };
      if !takes.is_empty() && !buf.is_empty() {
        match buf.pop_front() {
          Some(entry) => Step::Drain(entry),
          None => Step::Idle,
        }
      } else if !buf.is_full() && !puts.is_empty() {
        while !buf.is_full() {
          match puts.pop_front() {
            Some(put) => {
              put.resolver.resolve();
              buf.push_back(Entry::Deferred(put));
            }
            None => break,
          }
        }
        Step::Filled
      } else {
        Step::Idle
      }
    };

    let entry = match step {
      Step::Idle => break,
      Step::Filled => continue,
      Step::Drain(entry) => entry,
    };

    let expansion = match entry {
      Entry::Literal(v) => Expansion::One(v),
      Entry::Raw(v) => transform::run(Payload::Value(v), &shared.transform).await,
      Entry::Deferred(Deferred { payload, resolver: _ }) => {
        transform::run(payload, &shared.transform).await
      }
    };

    let mut core = shared.core.lock();
    match expansion {
      Expansion::Drop => {}
      Expansion::One(v) => deliver(&mut core, v),
      Expansion::Many(values) => match values.len() {
        0 => {}
        1 => {
          if let Some(v) = values.into_iter().next() {
            deliver(&mut core, v);
          }
        }
        _ => {
          // Expansions re-enter at the front of the buffer, overshooting
          // the nominal capacity until consumers drain them.
          if let Some(buf) = core.buf.as_mut() {
            for v in values.into_iter().rev() {
              buf.push_front(Entry::Literal(v));
            }
          }
        }
      },
    }
  }
}

// --- Flush and finish ---

/// Resolves every outstanding take with `None` once the channel has fully
/// drained. Runs at most once per channel; `flushing` is set under the same
/// lock that drains the takes, so a take registered after this sees the
/// flag and resolves at registration instead.
///
/// # Panics
///
/// Panics if invoked while values are still queued; that is a bug in the
/// slide engine, not a recoverable condition.
fn flush<T>(shared: &Arc<Shared<T>>) {
  let takes = {
    let mut core = shared.core.lock();
    assert!(core.drained(), "flush invoked on a non-empty channel");
    if core.flushing {
      return;
    }
    core.flushing = true;
    core.takes.drain(..).collect::<Vec<_>>()
  };
  telemetry::flushed(takes.len());
  for take in takes {
    let _ = take.send(None);
  }

  // An active consume loop observes its own DONE and performs the deferred
  // finish on exit, after its final consumer call completes.
  let finish_now = {
    let core = shared.core.lock();
    !core.consuming
  };
  if finish_now {
    finish(shared);
  }
}

/// Transitions to ENDED and fires every end-listener in FIFO order. Any
/// take that slipped in between flush and finish is resolved with `None`.
pub(crate) fn finish<T>(shared: &Arc<Shared<T>>) {
  let (takes, waiting) = {
    let mut core = shared.core.lock();
    if core.state == State::Ended {
      return;
    }
    core.state = State::Ended;
    (
      core.takes.drain(..).collect::<Vec<_>>(),
      std::mem::take(&mut core.waiting),
    )
  };
  for take in takes {
    let _ = take.send(None);
  }
  for listener in waiting {
    let _ = listener.send(());
  }
  telemetry::ended();
}

/// Exit path of the consume loop: clears `consuming` and performs the
/// finish that flush deferred to it, if any.
pub(crate) fn finish_after_consume<T>(shared: &Arc<Shared<T>>) {
  let do_finish = {
    let mut core = shared.core.lock();
    core.consuming = false;
    core.flushing && core.state != State::Ended
  };
  if do_finish {
    finish(shared);
  }
}
