// src/pipe.rs

//! Fan-out pipelines, fan-in merging, and pipeline assembly.
//!
//! Piping attaches downstream children to a parent channel and starts a
//! forwarding loop: every value taken from the parent is put to every child,
//! and all acceptances are awaited before the next take, so a child never
//! observes value N+1 before it accepted value N. The loop runs until the
//! parent ends (closing the children too when the parent was closed with
//! [`close_all`](Channel::close_all)) or until [`unpipe`](Channel::unpipe)
//! empties the pipeline and fires the loop's cancel token.
//!
//! Fan-out hands each child its own copy of the value, hence the `T: Clone`
//! bound on everything pipeline-shaped.

use futures_util::future::join_all;

use crate::channel::flow::CancelToken;
use crate::channel::Channel;
use crate::transform::Transform;

impl<T: Clone + Send + 'static> Channel<T> {
  /// Appends `children` to this channel's pipeline, starting the forwarding
  /// loop if one is not already running. Returns the last child so calls
  /// can be chained head-to-tail; with no children, returns `self`.
  pub fn pipe(&self, children: &[Channel<T>]) -> Channel<T> {
    let started = {
      let mut core = self.shared.core.lock();
      core.pipeline.extend(children.iter().cloned());
      if core.forward.is_none() && !core.pipeline.is_empty() {
        let token = CancelToken::new();
        core.forward = Some(token.clone());
        Some(token)
      } else {
        None
      }
    };
    if let Some(token) = started {
      let parent = self.clone();
      tokio::spawn(forward(parent, token));
    }
    children.last().cloned().unwrap_or_else(|| self.clone())
  }

  /// Detaches `children` from the pipeline. When the pipeline empties, the
  /// forwarding loop's cancel token fires; the loop observes it after its
  /// in-flight take. Returns `self` for chaining.
  pub fn unpipe(&self, children: &[Channel<T>]) -> &Self {
    let cancel = {
      let mut core = self.shared.core.lock();
      core
        .pipeline
        .retain(|child| !children.iter().any(|c| c.same_channel(child)));
      if core.pipeline.is_empty() {
        core.forward.take()
      } else {
        None
      }
    };
    if let Some(token) = cancel {
      token.cancel();
    }
    self
  }
}

/// The forwarding loop between a parent and its pipeline.
async fn forward<T: Clone + Send + 'static>(parent: Channel<T>, token: CancelToken) {
  loop {
    if token.is_cancelled() {
      break;
    }
    match parent.take().await {
      None => {
        let (children, should_close) = {
          let core = parent.shared.core.lock();
          (core.pipeline.clone(), core.should_close)
        };
        if should_close {
          for child in &children {
            child.close_all();
          }
        }
        break;
      }
      Some(value) => {
        if token.is_cancelled() {
          // Unpiped while the take was in flight; the pipeline is empty
          // and the value has nowhere to go.
          break;
        }
        let children = { parent.shared.core.lock().pipeline.clone() };
        let last = match children.len().checked_sub(1) {
          Some(last) => last,
          None => continue,
        };
        let mut puts = Vec::with_capacity(children.len());
        for child in &children[..last] {
          puts.push(child.put(value.clone()));
        }
        puts.push(children[last].put(value));
        for result in join_all(puts).await {
          let _ = result;
        }
      }
    }
  }
}

/// One stage of a [`pipeline`]: either a transform (a fresh unbuffered
/// channel is built around it) or an existing channel to splice in.
pub enum Stage<T> {
  /// Wrap this transform in a new unbuffered channel.
  Transform(Transform<T>),
  /// Use this channel as-is.
  Channel(Channel<T>),
}

impl<T> From<Transform<T>> for Stage<T> {
  fn from(transform: Transform<T>) -> Self {
    Stage::Transform(transform)
  }
}

impl<T> From<Channel<T>> for Stage<T> {
  fn from(channel: Channel<T>) -> Self {
    Stage::Channel(channel)
  }
}

impl<T> std::fmt::Debug for Stage<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Stage::Transform(t) => f.debug_tuple("Stage::Transform").field(t).finish(),
      Stage::Channel(c) => f.debug_tuple("Stage::Channel").field(c).finish(),
    }
  }
}

/// Builds a chain of channels from `stages`, wiring them head-to-tail with
/// [`pipe`](Channel::pipe). Returns the head and tail of the chain; with no
/// stages, a single identity channel is both.
pub fn pipeline<T: Clone + Send + 'static>(stages: Vec<Stage<T>>) -> (Channel<T>, Channel<T>) {
  let links: Vec<Channel<T>> = stages
    .into_iter()
    .map(|stage| match stage {
      Stage::Transform(t) => Channel::with_transform(t),
      Stage::Channel(c) => c,
    })
    .collect();

  let (head, tail) = match (links.first(), links.last()) {
    (Some(head), Some(tail)) => (head.clone(), tail.clone()),
    _ => {
      let ch = Channel::new();
      return (ch.clone(), ch);
    }
  };
  for pair in links.windows(2) {
    pair[0].pipe(std::slice::from_ref(&pair[1]));
  }
  (head, tail)
}

/// Fans several parents into one fresh unbuffered child. Values arrive in
/// whatever order the parents deliver them.
pub fn merge<T: Clone + Send + 'static>(parents: &[Channel<T>]) -> Channel<T> {
  let child = Channel::new();
  for parent in parents {
    parent.pipe(std::slice::from_ref(&child));
  }
  child
}
