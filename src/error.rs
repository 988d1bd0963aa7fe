// src/error.rs

use core::fmt;

/// Error returned by `put` and `tail` when the channel is no longer open.
///
/// The rejected value is handed back so the caller can recover it with
/// [`into_inner`](SendError::into_inner). Rejection happens at registration
/// time; a put accepted while the channel was open always resolves `Ok`.
#[derive(PartialEq, Eq, Clone)]
pub enum SendError<T> {
  /// The channel has been closed (or has ended). The value is returned.
  Closed(T),
}

impl<T> SendError<T> {
  /// Consumes the error, returning the rejected value.
  #[inline]
  pub fn into_inner(self) -> T {
    match self {
      SendError::Closed(v) => v,
    }
  }
}

impl<T> fmt::Debug for SendError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SendError::Closed(_) => write!(f, "SendError::Closed(..)"),
    }
  }
}

impl<T> fmt::Display for SendError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SendError::Closed(_) => f.write_str("channel closed"),
    }
  }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}
