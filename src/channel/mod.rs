// src/channel/mod.rs

//! The channel handle and its lifecycle operations.
//!
//! A [`Channel`] is a clonable handle over shared coordination state.
//! Producers register intents with [`put`](Channel::put) (or
//! [`tail`](Channel::tail)), consumers with [`take`](Channel::take); the
//! slide engine matches them FIFO, running the channel's transform on each
//! value. Closing a channel lets everything in flight drain, after which
//! every outstanding and future take resolves `None` and
//! [`done`](Channel::done) listeners fire exactly once.
//!
//! All operations assume a running Tokio runtime: registrations spawn the
//! matchmaking task that services them.
//!
//! # Examples
//!
//! ```
//! use weft::Channel;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let ch = Channel::bounded(2);
//! ch.put(1).await.unwrap();
//! ch.put(2).await.unwrap();
//! ch.close();
//!
//! assert_eq!(ch.take().await, Some(1));
//! assert_eq!(ch.take().await, Some(2));
//! assert_eq!(ch.take().await, None);
//! ch.done().await;
//! # });
//! ```

pub(crate) mod core;
pub(crate) mod flow;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::buffer::RingBuffer;
use crate::error::SendError;
use crate::transform::{Deferred, Resolver, Transform};

use self::core::{trigger, Core, Entry, Shared};

pub use self::flow::ProducerHandle;

/// Lifecycle of a channel. Transitions are monotonic:
/// `Open` -> `Closed` -> `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  /// Accepting puts, tails, and takes.
  Open,
  /// No new values are accepted; in-flight values are draining.
  Closed,
  /// Fully drained. Every take resolves `None` immediately.
  Ended,
}

/// A FIFO coordination object mediating between producers and consumers.
///
/// Cloning a `Channel` clones the handle, not the channel: all clones share
/// the same queues and lifecycle.
pub struct Channel<T> {
  pub(crate) shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
  fn clone(&self) -> Self {
    Channel { shared: Arc::clone(&self.shared) }
  }
}

// --- Construction ---

impl<T: Send + 'static> Channel<T> {
  /// An unbuffered channel: every put rendezvouses with a take.
  pub fn new() -> Self {
    Self::build(None, Transform::identity())
  }

  /// An unbuffered channel with a transform.
  pub fn with_transform(transform: Transform<T>) -> Self {
    Self::build(None, transform)
  }

  /// A buffered channel with the given capacity. Puts resolve as soon as
  /// the buffer accepts them; a capacity of zero is normalized to one.
  pub fn bounded(capacity: usize) -> Self {
    Self::bounded_with(capacity, Transform::identity())
  }

  /// A buffered channel with a transform.
  pub fn bounded_with(capacity: usize, transform: Transform<T>) -> Self {
    Self::build(Some(RingBuffer::new(capacity.max(1))), transform)
  }

  /// A buffered channel backed by a caller-provided buffer. Values the
  /// caller already pushed are delivered first, running through the
  /// channel transform as they drain.
  pub fn with_buffer(buffer: RingBuffer<T>) -> Self {
    Self::with_buffer_and(buffer, Transform::identity())
  }

  /// A buffered channel with a caller-provided buffer and a transform.
  pub fn with_buffer_and(buffer: RingBuffer<T>, transform: Transform<T>) -> Self {
    let mut ring = RingBuffer::new(buffer.capacity());
    for value in buffer {
      ring.push_back(Entry::Raw(value));
    }
    Self::build(Some(ring), transform)
  }

  /// Materializes an iterable into a buffered channel sized to it, then
  /// closes the channel unless `keep_open` is set. The loaded values run
  /// through whatever transform is current when they drain, so a transform
  /// installed afterwards with [`set_transform`](Channel::set_transform)
  /// still applies.
  pub fn from_iter<I>(iter: I, keep_open: bool) -> Self
  where
    I: IntoIterator<Item = T>,
  {
    let values: Vec<T> = iter.into_iter().collect();
    let mut ring = RingBuffer::new(values.len().max(1));
    for value in values {
      ring.push_back(Entry::Raw(value));
    }
    let ch = Self::build(Some(ring), Transform::identity());
    if !keep_open {
      ch.close_all();
    }
    ch
  }

  fn build(buf: Option<RingBuffer<Entry<T>>>, transform: Transform<T>) -> Self {
    let capacity = buf.as_ref().map(|b| b.capacity());
    Channel {
      shared: Arc::new(Shared {
        core: Mutex::new(Core::new(buf)),
        transform: Mutex::new(transform),
        capacity,
      }),
    }
  }
}

impl<T: Send + 'static> Default for Channel<T> {
  fn default() -> Self {
    Channel::new()
  }
}

// --- Producer / consumer intents ---

impl<T: Send + 'static> Channel<T> {
  /// Registers a value for delivery. The registration happens immediately;
  /// the returned future resolves once the value is handed to a consumer
  /// or accepted by the buffer. If the channel is not open, the future
  /// resolves `Err` carrying the value back.
  pub fn put(&self, value: T) -> Put<T> {
    self.register(value, false)
  }

  /// Like [`put`](Channel::put), but the value is delivered after the
  /// channel closes, ahead of the end: tails drain strictly after every
  /// pre-close put and strictly before takes start resolving `None`.
  pub fn tail(&self, value: T) -> Put<T> {
    self.register(value, true)
  }

  fn register(&self, value: T, tail: bool) -> Put<T> {
    let inner = {
      let mut core = self.shared.core.lock();
      if core.state == State::Open {
        let (tx, rx) = oneshot::channel();
        let record = Deferred::new(value, Resolver::new(tx));
        if tail {
          core.tails.push_back(record);
        } else {
          core.puts.push_back(record);
        }
        PutInner::Pending(rx)
      } else {
        PutInner::Rejected(Some(value))
      }
    };
    if matches!(inner, PutInner::Pending(_)) {
      trigger(&self.shared);
    }
    Put { inner }
  }

  /// Registers a consumer intent. Resolves to the next value, or `None`
  /// once the channel has ended or has drained and flushed. Registration
  /// is immediate; takes are matched in registration order.
  pub fn take(&self) -> Take<T> {
    let inner = {
      let mut core = self.shared.core.lock();
      // A flushed channel can never deliver again; the ENDED transition
      // may still be pending on an active consume loop's exit, so late
      // takes resolve here rather than waiting on a slide pass that
      // `trigger` would refuse to spawn.
      if core.state == State::Ended || core.flushing {
        TakeInner::Done
      } else {
        let (tx, rx) = oneshot::channel();
        core.takes.push_back(tx);
        TakeInner::Pending(rx)
      }
    };
    if matches!(inner, TakeInner::Pending(_)) {
      trigger(&self.shared);
    }
    Take { inner }
  }

  /// Takes until the channel ends, collecting every value.
  pub async fn to_vec(&self) -> Vec<T> {
    let mut values = Vec::new();
    while let Some(value) = self.take().await {
      values.push(value);
    }
    values
  }
}

// --- Lifecycle ---

impl<T: Send + 'static> Channel<T> {
  /// Closes the channel. In-flight values (puts, buffered values, tails)
  /// still drain to consumers; once everything has delivered the channel
  /// ends. Idempotent; a no-op on a channel that is already closed.
  pub fn close(&self) {
    self.close_inner(false);
  }

  /// Closes the channel and marks the close as cascading: when a pipeline
  /// forwarding loop sees this channel end, it closes the downstream
  /// children the same way.
  pub fn close_all(&self) {
    self.close_inner(true);
  }

  fn close_inner(&self, all: bool) {
    {
      let mut core = self.shared.core.lock();
      if core.state != State::Open {
        return;
      }
      core.state = State::Closed;
      core.should_close = all;
    }
    crate::telemetry::closed();
    trigger(&self.shared);
  }

  /// Resolves when the channel has ended. May be awaited by any number of
  /// listeners; each fires exactly once, and registration after the end
  /// resolves immediately.
  pub fn done(&self) -> Done {
    let inner = {
      let mut core = self.shared.core.lock();
      if core.state == State::Ended {
        DoneInner::Ready
      } else {
        let (tx, rx) = oneshot::channel();
        core.waiting.push(tx);
        DoneInner::Pending(rx)
      }
    };
    Done { inner }
  }
}

// --- Introspection ---

impl<T> Channel<T> {
  /// The channel's current lifecycle state.
  pub fn state(&self) -> State {
    self.shared.core.lock().state
  }

  /// Number of values waiting to be consumed: buffered values plus pending
  /// puts. Tails are not counted until they are promoted.
  pub fn len(&self) -> usize {
    let core = self.shared.core.lock();
    core.buf_len() + core.puts.len()
  }

  /// True when no values are buffered or pending.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Buffer capacity, or `None` for an unbuffered channel.
  pub fn capacity(&self) -> Option<usize> {
    self.shared.capacity
  }

  /// True when both handles refer to the same channel.
  pub fn same_channel(&self, other: &Channel<T>) -> bool {
    Arc::ptr_eq(&self.shared, &other.shared)
  }

  /// Replaces the channel's transform. Values already queued pick up the
  /// new transform when the slide engine reaches them.
  pub fn set_transform(&self, transform: Transform<T>) {
    *self.shared.transform.lock() = transform;
  }
}

// --- Mapping ---

impl<T: Send + 'static> Channel<T> {
  /// A derived channel fed by a detached loop that takes from `self`,
  /// applies `f`, and puts the result. The derived channel closes when
  /// `self` ends.
  pub fn map<U, F>(&self, mut f: F) -> Channel<U>
  where
    U: Send + 'static,
    F: FnMut(T) -> U + Send + 'static,
  {
    let mapped = Channel::new();
    let out = mapped.clone();
    let parent = self.clone();
    tokio::spawn(async move {
      while let Some(value) = parent.take().await {
        if out.put(f(value)).await.is_err() {
          break;
        }
      }
      out.close();
    });
    mapped
  }
}

impl<T> fmt::Debug for Channel<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.shared.core.try_lock() {
      Some(core) => f
        .debug_struct("Channel")
        .field("state", &core.state)
        .field("puts", &core.puts.len())
        .field("takes", &core.takes.len())
        .field("buffered", &core.buf_len())
        .finish(),
      None => f.write_str("Channel { <locked> }"),
    }
  }
}

// --- Futures ---

/// Future returned by [`Channel::put`] and [`Channel::tail`].
#[must_use = "futures do nothing unless you .await or poll them"]
pub struct Put<T> {
  inner: PutInner<T>,
}

enum PutInner<T> {
  /// The channel was not open; the value is handed back on first poll.
  Rejected(Option<T>),
  Pending(oneshot::Receiver<()>),
}

impl<T> Future for Put<T> {
  type Output = Result<(), SendError<T>>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    // Safety: Put holds no self-references and none of its fields are
    // structurally pinned.
    let this = unsafe { self.get_unchecked_mut() };
    match &mut this.inner {
      PutInner::Rejected(slot) => match slot.take() {
        Some(value) => Poll::Ready(Err(SendError::Closed(value))),
        // Polled again after completion.
        None => Poll::Ready(Ok(())),
      },
      // A registered record is always serviced: delivery, buffering, and
      // teardown all fire the resolver.
      PutInner::Pending(rx) => Pin::new(rx).poll(cx).map(|_| Ok(())),
    }
  }
}

impl<T> fmt::Debug for Put<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.inner {
      PutInner::Rejected(_) => f.write_str("Put { rejected }"),
      PutInner::Pending(_) => f.write_str("Put { pending }"),
    }
  }
}

/// Future returned by [`Channel::take`]. Resolves to the next value, or
/// `None` once no more values will ever deliver.
#[must_use = "futures do nothing unless you .await or poll them"]
pub struct Take<T> {
  inner: TakeInner<T>,
}

enum TakeInner<T> {
  /// No more values will ever deliver; resolves `None` on first poll.
  Done,
  Pending(oneshot::Receiver<Option<T>>),
}

impl<T> Future for Take<T> {
  type Output = Option<T>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    // Safety: as for Put, no field is structurally pinned.
    let this = unsafe { self.get_unchecked_mut() };
    match &mut this.inner {
      TakeInner::Done => Poll::Ready(None),
      TakeInner::Pending(rx) => Pin::new(rx).poll(cx).map(|r| r.unwrap_or(None)),
    }
  }
}

impl<T> fmt::Debug for Take<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.inner {
      TakeInner::Done => f.write_str("Take { done }"),
      TakeInner::Pending(_) => f.write_str("Take { pending }"),
    }
  }
}

/// Future returned by [`Channel::done`]. Resolves when the channel ends.
#[must_use = "futures do nothing unless you .await or poll them"]
pub struct Done {
  inner: DoneInner,
}

enum DoneInner {
  Ready,
  Pending(oneshot::Receiver<()>),
}

impl Future for Done {
  type Output = ();

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    match &mut this.inner {
      DoneInner::Ready => Poll::Ready(()),
      DoneInner::Pending(rx) => Pin::new(rx).poll(cx).map(|_| ()),
    }
  }
}

impl fmt::Debug for Done {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.inner {
      DoneInner::Ready => f.write_str("Done { ready }"),
      DoneInner::Pending(_) => f.write_str("Done { pending }"),
    }
  }
}
