//! Restart-with-backoff supervision.
//!
//! A supervised task that exits normally is done. A task that panics is
//! relaunched after an exponentially growing, capped, jittered delay, until
//! the restart budget runs out or the supervisor is cancelled.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use newswire_common::StreamSettings;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Fraction of the delay added or removed at random (0.2 = ±20%).
    pub jitter: f64,
    pub max_restarts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: 0.2,
            max_restarts: 10,
        }
    }
}

impl BackoffPolicy {
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            initial: settings.restart_initial_backoff,
            max: settings.restart_max_backoff,
            max_restarts: settings.restart_max_attempts,
            ..Self::default()
        }
    }

    /// Delay before restart number `attempt` (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        base.mul_f64(1.0 + spread)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The task returned normally.
    Finished,
    /// The supervisor was cancelled, or the task was aborted.
    Cancelled,
    /// The task kept panicking past the restart budget.
    GaveUp { restarts: u32 },
}

/// Run `launch(restart_count)` as a task, relaunching it after a backoff
/// delay whenever it panics.
pub async fn supervise<F, Fut>(
    name: &str,
    policy: BackoffPolicy,
    cancel: CancellationToken,
    mut launch: F,
) -> SupervisorExit
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut restarts = 0u32;
    loop {
        let task = tokio::spawn(launch(restarts));
        match task.await {
            Ok(()) => return SupervisorExit::Finished,
            Err(e) if e.is_cancelled() => return SupervisorExit::Cancelled,
            Err(e) => {
                if cancel.is_cancelled() {
                    return SupervisorExit::Cancelled;
                }
                if restarts >= policy.max_restarts {
                    error!(task = name, restarts, error = %e, "Task keeps crashing, giving up");
                    return SupervisorExit::GaveUp { restarts };
                }

                let delay = policy.delay(restarts);
                restarts += 1;
                warn!(
                    task = name,
                    restart = restarts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Task crashed, restarting after backoff"
                );

                tokio::select! {
                    _ = cancel.cancelled() => return SupervisorExit::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn base_delay_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay(4), Duration::from_secs(16));
        assert_eq!(policy.base_delay(5), Duration::from_secs(30));
        assert_eq!(policy.base_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let policy = BackoffPolicy::default();
        for attempt in 0..8 {
            let base = policy.base_delay(attempt).as_secs_f64();
            let d = policy.delay(attempt).as_secs_f64();
            assert!(d >= base * 0.8 - 1e-9 && d <= base * 1.2 + 1e-9, "{d} vs {base}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_is_restarted() {
        let launches = Arc::new(AtomicU32::new(0));
        let counter = launches.clone();

        let exit = supervise("test", BackoffPolicy::default(), CancellationToken::new(), move |restart| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if restart < 2 {
                    panic!("boom");
                }
            }
        })
        .await;

        assert_eq!(exit, SupervisorExit::Finished);
        assert_eq!(launches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_restart_budget() {
        let policy = BackoffPolicy {
            max_restarts: 2,
            ..BackoffPolicy::default()
        };
        let exit = supervise("test", policy, CancellationToken::new(), |_| async {
            panic!("always");
        })
        .await;
        assert_eq!(exit, SupervisorExit::GaveUp { restarts: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_supervision() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let exit = supervise("test", BackoffPolicy::default(), cancel, move |_| {
            trigger.cancel();
            async { panic!("crash") }
        })
        .await;
        assert_eq!(exit, SupervisorExit::Cancelled);
    }
}
