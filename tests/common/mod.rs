use std::future::Future;
use std::time::Duration;

pub const SHORT_TIMEOUT: Duration = Duration::from_millis(200);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(3);
pub const ITEMS_MEDIUM: usize = 200;

/// Asserts that `fut` stays unresolved for SHORT_TIMEOUT. The future is
/// left registered so the caller can still await it afterwards.
pub async fn assert_pending<F>(fut: &mut F)
where
  F: Future + Unpin,
{
  assert!(
    tokio::time::timeout(SHORT_TIMEOUT, fut).await.is_err(),
    "future resolved when it should have stayed pending"
  );
}

/// Awaits `fut` with a test-wide deadline so a broken channel fails the
/// test instead of hanging it.
pub async fn within<F: Future>(fut: F) -> F::Output {
  tokio::time::timeout(LONG_TIMEOUT, fut)
    .await
    .expect("test deadline elapsed")
}
