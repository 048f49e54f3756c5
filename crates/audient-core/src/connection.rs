//! Reconnection controller: wraps a fallible async operation with
//! exponential backoff, jitter, and a manual retry override.
//!
//! The controller is the single writer of [`ConnectionState`]; everyone
//! else observes it through a watch subscription. It knows nothing about
//! chat semantics.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("Connection attempt cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Observable progress of the connection, for banner display.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Current retry attempt; 0 whenever connected.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Delay before the next retry, if one is scheduled.
    pub next_retry_delay: Duration,
    pub last_error: Option<String>,
}

impl ConnectionState {
    fn initial(max_attempts: u32) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempt: 0,
            max_attempts,
            next_retry_delay: Duration::ZERO,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }
}

pub struct ReconnectController {
    config: ReconnectConfig,
    state: watch::Sender<ConnectionState>,
    /// Token guarding the currently pending backoff sleep, if any.
    backoff: Mutex<CancellationToken>,
}

impl ReconnectController {
    pub fn new(config: ReconnectConfig) -> Self {
        let initial = ConnectionState::initial(config.max_retries);
        let (state, _) = watch::channel(initial);
        Self {
            config,
            state,
            backoff: Mutex::new(CancellationToken::new()),
        }
    }

    /// Snapshot of the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Execute `operation`, retrying with backoff until it succeeds or the
    /// retry budget is exhausted.
    ///
    /// Each failure increments the attempt counter and publishes the
    /// computed delay for display. A pending backoff sleep is interrupted
    /// by [`force_retry`](Self::force_retry) (retry immediately, counter
    /// reset) or by any state reset (the run fails with `Cancelled`).
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, ConnectionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.reset_retries();
        let mut attempt: u32 = 0;

        loop {
            self.state.send_modify(|s| {
                s.status = ConnectionStatus::Connecting;
            });

            match operation().await {
                Ok(value) => {
                    self.mark_connected();
                    return Ok(value);
                }
                Err(err) => {
                    attempt += 1;
                    let message = err.to_string();

                    if attempt > self.config.max_retries {
                        self.state.send_modify(|s| {
                            s.status = ConnectionStatus::Error;
                            s.attempt = attempt;
                            s.next_retry_delay = Duration::ZERO;
                            s.last_error = Some(message.clone());
                        });
                        return Err(ConnectionError::RetriesExhausted {
                            attempts: self.config.max_retries,
                            last_error: message,
                        });
                    }

                    let delay = self.jittered_delay(attempt);
                    // arm before publishing: anyone reacting to the
                    // published backoff state must find this sleep's
                    // token already in place, not the previous one
                    let token = self.arm_backoff();
                    self.state.send_modify(|s| {
                        s.status = ConnectionStatus::Connecting;
                        s.attempt = attempt;
                        s.next_retry_delay = delay;
                        s.last_error = Some(message.clone());
                    });
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "agent call failed, backing off"
                    );

                    tokio::select! {
                        () = token.cancelled() => {
                            if self.state.borrow().status == ConnectionStatus::Connecting {
                                // force_retry: skip the wait, restart the budget
                                debug!("backoff wait bypassed by manual retry");
                                attempt = 0;
                            } else {
                                return Err(ConnectionError::Cancelled);
                            }
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Reset attempts and error state and re-enter `connecting`
    /// immediately, bypassing any pending backoff wait.
    pub fn force_retry(&self) {
        self.state.send_modify(|s| {
            s.status = ConnectionStatus::Connecting;
            s.attempt = 0;
            s.next_retry_delay = Duration::ZERO;
            s.last_error = None;
        });
        self.cancel_backoff();
    }

    /// Idempotent: repeated calls observe the same state.
    pub fn mark_connected(&self) {
        self.state.send_if_modified(|s| {
            let next = ConnectionState {
                status: ConnectionStatus::Connected,
                attempt: 0,
                max_attempts: s.max_attempts,
                next_retry_delay: Duration::ZERO,
                last_error: None,
            };
            if *s == next {
                false
            } else {
                *s = next;
                true
            }
        });
        self.cancel_backoff();
    }

    pub fn mark_disconnected(&self) {
        self.state.send_modify(|s| {
            s.status = ConnectionStatus::Disconnected;
        });
        self.cancel_backoff();
    }

    pub fn reset_retries(&self) {
        self.state.send_modify(|s| {
            s.attempt = 0;
            s.next_retry_delay = Duration::ZERO;
            s.last_error = None;
        });
        self.cancel_backoff();
    }

    /// Exponential delay before jitter: `min(base * mult^(n-1), max)`.
    pub fn unjittered_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_millis() as f64;
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = base * self.config.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(capped.round() as u64)
    }

    /// Adds up to 20% uniform jitter on top of the capped delay.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let capped = self.unjittered_delay(attempt).as_millis() as f64;
        let jitter = capped * 0.2 * rand::thread_rng().r#gen::<f64>();
        Duration::from_millis((capped + jitter).round() as u64)
    }

    /// Replace the backoff token so only the newest sleep is pending.
    fn arm_backoff(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        let mut guard = match self.backoff.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let old = std::mem::replace(&mut *guard, fresh.clone());
        old.cancel();
        fresh
    }

    fn cancel_backoff(&self) {
        let guard = match self.backoff.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn controller(max_retries: u32, base_ms: u64) -> ReconnectController {
        ReconnectController::new(
            ReconnectConfig::default()
                .with_max_retries(max_retries)
                .with_base_delay(Duration::from_millis(base_ms)),
        )
    }

    #[test]
    fn unjittered_delay_sequence() {
        let controller = controller(3, 1000);
        assert_eq!(controller.unjittered_delay(1), Duration::from_millis(1000));
        assert_eq!(controller.unjittered_delay(2), Duration::from_millis(2000));
        assert_eq!(controller.unjittered_delay(3), Duration::from_millis(4000));
        // capped at max_delay
        assert_eq!(controller.unjittered_delay(10), Duration::from_millis(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn run_exhausts_retries_and_reports_count() {
        let controller = controller(3, 1000);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = Arc::clone(&calls);

        let result: Result<(), ConnectionError> = controller
            .run(|| {
                let calls = Arc::clone(&calls_in_op);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("boom")
                }
            })
            .await;

        // initial call + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let err = result.unwrap_err();
        assert!(err.to_string().contains('3'), "got: {err}");
        assert!(err.to_string().contains("boom"));
        assert_eq!(controller.state().status, ConnectionStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn run_publishes_attempt_and_delay() {
        let controller = controller(2, 1000);
        let mut rx = controller.subscribe();
        let failures = Arc::new(AtomicU32::new(0));
        let failures_in_op = Arc::clone(&failures);

        let result = controller
            .run(|| {
                let failures = Arc::clone(&failures_in_op);
                async move {
                    if failures.fetch_add(1, Ordering::SeqCst) < 1 {
                        Err("transient".to_string())
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        // end state is connected with the counter reset
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert_eq!(state.attempt, 0);
        assert_eq!(state.next_retry_delay, Duration::ZERO);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let controller = controller(1, 1000);
        let base = controller.unjittered_delay(2);
        for _ in 0..100 {
            let jittered = controller.jittered_delay(2);
            assert!(jittered >= base);
            assert!(jittered <= base + Duration::from_millis(base.as_millis() as u64 / 5));
        }
    }

    #[tokio::test]
    async fn force_retry_bypasses_pending_backoff() {
        // long base delay so only a manual retry can wake the run
        let controller = Arc::new(controller(5, 60_000));
        let calls = Arc::new(AtomicU32::new(0));

        let run_controller = Arc::clone(&controller);
        let run_calls = Arc::clone(&calls);
        let handle = tokio::spawn(async move {
            run_controller
                .run(move || {
                    let calls = Arc::clone(&run_calls);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err::<u32, _>("first attempt fails")
                        } else {
                            Ok(7)
                        }
                    }
                })
                .await
        });

        // wait for the first failure to schedule its backoff
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        controller.force_retry();
        assert_eq!(controller.state().attempt, 0);
        assert_eq!(controller.state().status, ConnectionStatus::Connecting);

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run should finish promptly after force_retry")
            .expect("task should not panic");
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn force_retry_on_published_backoff_state_wakes_the_run() {
        // a reader that reacts the instant the backoff state is visible
        // must cancel this sleep, not a stale token from a prior one
        let controller = Arc::new(controller(5, 60_000));
        let mut rx = controller.subscribe();
        let calls = Arc::new(AtomicU32::new(0));

        let run_controller = Arc::clone(&controller);
        let run_calls = Arc::clone(&calls);
        let handle = tokio::spawn(async move {
            run_controller
                .run(move || {
                    let calls = Arc::clone(&run_calls);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err::<u32, _>("first attempt fails")
                        } else {
                            Ok(7)
                        }
                    }
                })
                .await
        });

        rx.wait_for(|s| s.attempt == 1).await.unwrap();
        controller.force_retry();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run should wake promptly after force_retry")
            .expect("task should not panic");
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn mark_connected_is_idempotent() {
        let controller = controller(5, 1000);
        controller.mark_connected();
        let first = controller.state();
        controller.mark_connected();
        let second = controller.state();

        assert_eq!(first, second);
        assert_eq!(second.status, ConnectionStatus::Connected);
        assert_eq!(second.attempt, 0);
    }

    #[tokio::test]
    async fn mark_disconnected_cancels_pending_backoff() {
        let controller = Arc::new(controller(5, 60_000));
        let calls = Arc::new(AtomicU32::new(0));

        let run_controller = Arc::clone(&controller);
        let run_calls = Arc::clone(&calls);
        let handle = tokio::spawn(async move {
            run_controller
                .run(move || {
                    let calls = Arc::clone(&run_calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>("down")
                    }
                })
                .await
        });

        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        controller.mark_disconnected();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run should stop promptly after disconnect")
            .expect("task should not panic");
        assert!(matches!(result, Err(ConnectionError::Cancelled)));
    }
}
