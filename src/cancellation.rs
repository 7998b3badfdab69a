use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

/// Returned by every cancellable suspension point once the token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled at stage={stage}")]
pub struct Cancelled {
    pub stage: &'static str,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation shared between a narration run and whoever may stop it.
///
/// The flag is checked at loop boundaries; the notifier wakes tasks parked on a
/// pause, a backoff delay or an in-flight synthesis call.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn check_cancelled(&self, stage: &'static str) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled { stage });
        }
        Ok(())
    }

    /// Resolves once `cancel` has been called (immediately if it already was).
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: Duration, stage: &'static str) -> Result<(), Cancelled> {
        self.check_cancelled(stage)?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(Cancelled { stage }),
        }
    }

    /// Drive `future` to completion unless cancelled first; the future is dropped on cancel.
    pub async fn run_until_cancelled<F>(&self, future: F, stage: &'static str) -> Result<F::Output, Cancelled>
    where
        F: std::future::Future,
    {
        self.check_cancelled(stage)?;
        tokio::select! {
            output = future => Ok(output),
            _ = self.cancelled() => Err(Cancelled { stage }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_reports_stage_after_cancel() {
        let token = CancellationToken::new();
        assert!(token.check_cancelled("synthesis").is_ok());
        token.clone().cancel();
        assert_eq!(
            token.check_cancelled("synthesis"),
            Err(Cancelled { stage: "synthesis" })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_wakes_parked_sleep() {
        let token = CancellationToken::new();
        let sleeper = {
            let token = token.clone();
            tokio::spawn(async move { token.sleep(Duration::from_secs(3600), "pause").await })
        };
        tokio::task::yield_now().await;
        token.cancel();
        let result = sleeper.await.expect("sleeper task should not panic");
        assert_eq!(result, Err(Cancelled { stage: "pause" }));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_when_not_cancelled() {
        let token = CancellationToken::new();
        let started = tokio::time::Instant::now();
        token
            .sleep(Duration::from_millis(700), "pause")
            .await
            .expect("sleep should complete");
        assert!(started.elapsed() >= Duration::from_millis(700));
    }

    #[tokio::test]
    async fn run_until_cancelled_drops_pending_future() {
        let token = CancellationToken::new();
        token.cancel();
        let result = token
            .run_until_cancelled(std::future::pending::<()>(), "synthesis")
            .await;
        assert_eq!(result, Err(Cancelled { stage: "synthesis" }));
    }
}
