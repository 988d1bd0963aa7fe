// src/transform.rs

//! Per-value transforms and the deferred records the slide engine consumes.
//!
//! A channel optionally carries one [`Transform`], applied to every value as
//! it is matched with a consumer. A transform can rewrite a value, drop it,
//! or expand it into several values; expanded values are delivered
//! contiguously, in the position the original value occupied.
//!
//! The source model dispatches on the transform function's arity. Here each
//! shape is a distinct constructor:
//!
//! - [`Transform::identity`] passes values through untouched.
//! - [`Transform::map`] is a synchronous one-to-zero-or-one mapping.
//! - [`Transform::then`] is the asynchronous form of `map`.
//! - [`Transform::expand`] pushes any number of values through an
//!   [`Emitter`]; the collected sequence is final when the closure returns.
//! - [`Transform::expand_async`] owns its emitter and finishes when the
//!   returned future resolves, so collection may span awaits.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// A per-channel value transformation.
///
/// Stored on the channel and invoked by the slide engine each time a pending
/// value is matched with a consumer (or drained from the buffer).
pub struct Transform<T> {
  kind: Kind<T>,
}

enum Kind<T> {
  Identity,
  Map(Box<dyn FnMut(T) -> Option<T> + Send>),
  Then(Box<dyn FnMut(T) -> BoxFuture<'static, Option<T>> + Send>),
  Expand(Box<dyn FnMut(T, &Emitter<T>) + Send>),
  ExpandAsync(Box<dyn FnMut(T, Emitter<T>) -> BoxFuture<'static, ()> + Send>),
}

impl<T: Send + 'static> Transform<T> {
  /// The no-op transform: every value is delivered as-is.
  pub fn identity() -> Self {
    Transform { kind: Kind::Identity }
  }

  /// A synchronous mapping. Returning `None` drops the value silently: the
  /// originating put still resolves, but no consumer sees anything.
  pub fn map<F>(f: F) -> Self
  where
    F: FnMut(T) -> Option<T> + Send + 'static,
  {
    Transform { kind: Kind::Map(Box::new(f)) }
  }

  /// An asynchronous mapping. The slide engine awaits the returned future;
  /// `None` drops the value.
  pub fn then<F, Fut>(mut f: F) -> Self
  where
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = Option<T>> + Send + 'static,
  {
    Transform {
      kind: Kind::Then(Box::new(move |v| -> BoxFuture<'static, Option<T>> {
        Box::pin(f(v))
      })),
    }
  }

  /// An expanding transform. The closure pushes zero or more replacement
  /// values through the emitter; the collected sequence replaces the input
  /// at its original position.
  pub fn expand<F>(f: F) -> Self
  where
    F: FnMut(T, &Emitter<T>) + Send + 'static,
  {
    Transform { kind: Kind::Expand(Box::new(f)) }
  }

  /// An expanding transform whose collection window is the returned future:
  /// the emitter is owned and clonable, and the sequence is sealed when the
  /// future resolves rather than when the closure returns.
  pub fn expand_async<F, Fut>(mut f: F) -> Self
  where
    F: FnMut(T, Emitter<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    Transform {
      kind: Kind::ExpandAsync(Box::new(move |v, e| -> BoxFuture<'static, ()> {
        Box::pin(f(v, e))
      })),
    }
  }
}

impl<T: Send + 'static> Default for Transform<T> {
  fn default() -> Self {
    Transform::identity()
  }
}

impl<T> fmt::Debug for Transform<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self.kind {
      Kind::Identity => "Identity",
      Kind::Map(_) => "Map",
      Kind::Then(_) => "Then",
      Kind::Expand(_) => "Expand",
      Kind::ExpandAsync(_) => "ExpandAsync",
    };
    write!(f, "Transform::{}", name)
  }
}

/// Collects the values pushed by an expanding transform.
pub struct Emitter<T> {
  items: Arc<Mutex<Vec<T>>>,
}

impl<T> Emitter<T> {
  pub(crate) fn new() -> Self {
    Emitter { items: Arc::new(Mutex::new(Vec::new())) }
  }

  /// Adds a value to the collected sequence.
  pub fn push(&self, value: T) {
    self.items.lock().push(value);
  }

  pub(crate) fn collect(&self) -> Vec<T> {
    std::mem::take(&mut *self.items.lock())
  }
}

impl<T> Clone for Emitter<T> {
  fn clone(&self) -> Self {
    Emitter { items: Arc::clone(&self.items) }
  }
}

impl<T> fmt::Debug for Emitter<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Emitter")
      .field("pending", &self.items.lock().len())
      .finish()
  }
}

// --- Thunk outcome ---

/// What running a deferred value's thunk produced.
pub(crate) enum Expansion<T> {
  /// The value was dropped; nothing is delivered.
  Drop,
  /// A single value to deliver.
  One(T),
  /// A collected sequence from an expanding transform.
  Many(Vec<T>),
}

// --- Deferred records ---

/// The pending payload of a producer record.
pub(crate) enum Payload<T> {
  /// Runs through the channel transform when slid.
  Value(T),
  /// Already expanded; delivered as-is.
  Literal(T),
}

/// A pending put: the payload packaged with its resolution handle.
pub(crate) struct Deferred<T> {
  pub(crate) payload: Payload<T>,
  pub(crate) resolver: Resolver,
}

impl<T> Deferred<T> {
  pub(crate) fn new(value: T, resolver: Resolver) -> Self {
    Deferred { payload: Payload::Value(value), resolver }
  }

  pub(crate) fn literal(value: T, resolver: Resolver) -> Self {
    Deferred { payload: Payload::Literal(value), resolver }
  }
}

/// Runs a payload through the channel transform, yielding its expansion.
///
/// The transform lock is held only while the user callable runs (or, for the
/// async shapes, while it is started); the produced future is awaited with
/// the lock released.
pub(crate) async fn run<T: Send + 'static>(
  payload: Payload<T>,
  slot: &Mutex<Transform<T>>,
) -> Expansion<T> {
  let value = match payload {
    Payload::Literal(v) => return Expansion::One(v),
    Payload::Value(v) => v,
  };

  enum Step<T> {
    Ready(Expansion<T>),
    Single(BoxFuture<'static, Option<T>>),
    Collect(BoxFuture<'static, ()>, Emitter<T>),
  }

  let step = {
    let mut transform = slot.lock();
    match &mut transform.kind {
      Kind::Identity => Step::Ready(Expansion::One(value)),
      Kind::Map(f) => Step::Ready(match f(value) {
        Some(v) => Expansion::One(v),
        None => Expansion::Drop,
      }),
      Kind::Then(f) => Step::Single(f(value)),
      Kind::Expand(f) => {
        let emitter = Emitter::new();
        f(value, &emitter);
        Step::Ready(Expansion::Many(emitter.collect()))
      }
      Kind::ExpandAsync(f) => {
        let emitter = Emitter::new();
        Step::Collect(f(value, emitter.clone()), emitter)
      }
    }
  };

  match step {
    Step::Ready(expansion) => expansion,
    Step::Single(fut) => match fut.await {
      Some(v) => Expansion::One(v),
      None => Expansion::Drop,
    },
    Step::Collect(fut, emitter) => {
      fut.await;
      Expansion::Many(emitter.collect())
    }
  }
}

// --- Resolver ---

/// Resolve-once handle for a pending put.
///
/// When a transform expands a value into `n` elements, the resolver is
/// fanned out across the `n` sub-records and fires only after the last of
/// them is consumed, so the original put observes full delivery.
pub(crate) struct Resolver {
  inner: Arc<ResolverInner>,
}

struct ResolverInner {
  pending: AtomicUsize,
  tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Resolver {
  pub(crate) fn new(tx: oneshot::Sender<()>) -> Self {
    Resolver {
      inner: Arc::new(ResolverInner {
        pending: AtomicUsize::new(1),
        tx: Mutex::new(Some(tx)),
      }),
    }
  }

  /// Counts one pending consumption; the final call fires the put.
  pub(crate) fn resolve(&self) {
    if self.inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
      if let Some(tx) = self.inner.tx.lock().take() {
        let _ = tx.send(());
      }
    }
  }

  /// Re-targets the resolver at `n` sub-records (expansion fan-out).
  /// Only the slide engine calls this, before any sub-record can resolve.
  pub(crate) fn fan_out(&self, n: usize) {
    self.inner.pending.store(n, Ordering::Release);
  }
}

impl Clone for Resolver {
  fn clone(&self) -> Self {
    Resolver { inner: Arc::clone(&self.inner) }
  }
}

impl Drop for ResolverInner {
  fn drop(&mut self) {
    // A record dropped without being consumed (channel torn down, transform
    // panic) still resolves its put rather than leaving it suspended.
    if let Some(tx) = self.tx.get_mut().take() {
      let _ = tx.send(());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn identity_passes_through() {
    let slot = Mutex::new(Transform::identity());
    match run(Payload::Value(7), &slot).await {
      Expansion::One(v) => assert_eq!(v, 7),
      _ => panic!("identity must yield the original value"),
    }
  }

  #[tokio::test]
  async fn map_none_drops() {
    let slot = Mutex::new(Transform::map(|v: i32| (v % 2 == 0).then_some(v)));
    assert!(matches!(run(Payload::Value(3), &slot).await, Expansion::Drop));
    assert!(matches!(run(Payload::Value(4), &slot).await, Expansion::One(4)));
  }

  #[tokio::test]
  async fn expand_collects_in_order() {
    let slot = Mutex::new(Transform::expand(|v: i32, emit: &Emitter<i32>| {
      emit.push(v);
      emit.push(v + 1);
    }));
    match run(Payload::Value(10), &slot).await {
      Expansion::Many(vs) => assert_eq!(vs, vec![10, 11]),
      _ => panic!("expand must yield the collected sequence"),
    }
  }

  #[tokio::test]
  async fn expand_async_seals_on_completion() {
    let slot = Mutex::new(Transform::expand_async(|v: i32, emit: Emitter<i32>| async move {
      emit.push(v);
      tokio::task::yield_now().await;
      emit.push(v * 2);
    }));
    match run(Payload::Value(3), &slot).await {
      Expansion::Many(vs) => assert_eq!(vs, vec![3, 6]),
      _ => panic!("expand_async must yield the collected sequence"),
    }
  }

  #[tokio::test]
  async fn literal_bypasses_transform() {
    let slot = Mutex::new(Transform::map(|_: i32| None));
    assert!(matches!(run(Payload::Literal(9), &slot).await, Expansion::One(9)));
  }

  #[tokio::test]
  async fn fanned_resolver_fires_after_last_child() {
    let (tx, mut rx) = oneshot::channel();
    let resolver = Resolver::new(tx);
    resolver.fan_out(3);
    let children: Vec<_> = (0..3).map(|_| resolver.clone()).collect();
    drop(resolver);

    children[0].resolve();
    children[1].resolve();
    assert!(rx.try_recv().is_err());
    children[2].resolve();
    assert!(rx.try_recv().is_ok());
  }
}
