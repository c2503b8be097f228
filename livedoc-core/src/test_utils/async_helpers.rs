//! Async test helpers

use crate::core_engine::SessionHandle;
use crate::core_session::SessionResult;
use std::future::Future;
use tokio::time::{timeout, Duration};

/// Run a future with a timeout, panicking if it does not finish
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

/// Poll `check` until it returns true or `duration` passes
pub async fn eventually<F>(duration: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until every handle shows the same text as `expected`
pub async fn wait_for_text(handles: &[&SessionHandle], expected: &str, duration: Duration) -> SessionResult<()> {
    for handle in handles {
        handle
            .wait_for_timeout(duration, |s| s.text == expected)
            .await?;
    }
    Ok(())
}

/// Leave every session, ignoring ones already stopped
pub async fn leave_all(handles: &[&SessionHandle]) {
    for handle in handles {
        let _ = handle.leave().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_eventually_sees_condition() {
        let calls = AtomicU32::new(0);
        let seen = eventually(Duration::from_secs(1), || calls.fetch_add(1, Ordering::SeqCst) >= 3).await;
        assert!(seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_gives_up() {
        assert!(!eventually(Duration::from_millis(50), || false).await);
    }

    #[tokio::test]
    #[should_panic(expected = "did not complete")]
    async fn test_assert_completes_within_panics() {
        assert_completes_within(Duration::from_millis(10), std::future::pending::<()>()).await;
    }
}
