//! Cancellable polling with a deadline
//!
//! Every blocking wait in the launcher (Job completion, resource disposal)
//! goes through [`poll_until`], which stops on the first of:
//! - the check yielding a value
//! - the deadline passing
//! - the shutdown signal firing

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Reference poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default bound for teardown waits
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Poll cadence and deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl PollSettings {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Same cadence, different deadline
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("wait cancelled by shutdown")]
    Cancelled,
}

/// Receiving side of the process shutdown signal
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: Option<watch::Receiver<bool>>,
}

/// Fires the paired [`Shutdown`] handles
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Create a connected trigger/handle pair
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx: Some(rx) })
}

impl ShutdownTrigger {
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// A handle that never fires; used for waits that must run to their deadline
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_fired(&self) -> bool {
        self.rx.as_ref().map_or(false, |rx| *rx.borrow())
    }

    /// Resolves once the signal fires; pends forever if it never can
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Trigger dropped without firing
                return std::future::pending().await;
            }
        }
    }
}

/// Evaluate `check` now and then every `settings.interval` until it yields a value
pub async fn poll_until<T, F, Fut>(
    mut check: F,
    settings: PollSettings,
    shutdown: &Shutdown,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + settings.timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(WaitError::Cancelled),
            outcome = tokio::time::timeout_at(deadline, check()) => match outcome {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => debug!(attempts, "condition not met yet"),
                Err(_) => return Err(WaitError::Timeout(settings.timeout)),
            },
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WaitError::Timeout(settings.timeout));
        }

        let wake = std::cmp::min(deadline, now + settings.interval);
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(WaitError::Cancelled),
            _ = tokio::time::sleep_until(wake) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(timeout_ms: u64) -> PollSettings {
        PollSettings::new(Duration::from_millis(5), Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_returns_first_value() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let value = poll_until(
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    (n >= 3).then_some(n)
                }
            },
            fast(1_000),
            &Shutdown::never(),
        )
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out() {
        let result: Result<(), _> =
            poll_until(|| async { None }, fast(30), &Shutdown::never()).await;
        assert_eq!(result, Err(WaitError::Timeout(Duration::from_millis(30))));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_wait() {
        let (trigger, shutdown) = shutdown_channel();
        let waiter = tokio::spawn(async move {
            poll_until(
                || async { None::<()> },
                PollSettings::new(Duration::from_secs(1), Duration::from_secs(60)),
                &shutdown,
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.fire();

        assert_eq!(waiter.await.unwrap(), Err(WaitError::Cancelled));
    }

    #[tokio::test]
    async fn test_fired_before_wait_cancels_immediately() {
        let (trigger, shutdown) = shutdown_channel();
        trigger.fire();
        assert!(shutdown.is_fired());

        let result = poll_until(|| async { Some(1) }, fast(1_000), &shutdown).await;
        assert_eq!(result, Err(WaitError::Cancelled));
    }

    #[test]
    fn test_never_stays_pending() {
        let shutdown = Shutdown::never();
        let mut cancelled = tokio_test::task::spawn(shutdown.cancelled());
        tokio_test::assert_pending!(cancelled.poll());
    }

    #[test]
    fn test_fire_wakes_waiter() {
        let (trigger, shutdown) = shutdown_channel();
        let mut cancelled = tokio_test::task::spawn(shutdown.cancelled());
        tokio_test::assert_pending!(cancelled.poll());

        trigger.fire();

        assert!(cancelled.is_woken());
        tokio_test::assert_ready!(cancelled.poll());
    }

    #[tokio::test]
    async fn test_dropped_trigger_never_cancels() {
        let (trigger, shutdown) = shutdown_channel();
        drop(trigger);

        let result: Result<(), _> = poll_until(|| async { None }, fast(20), &shutdown).await;
        assert!(matches!(result, Err(WaitError::Timeout(_))));
    }
}
