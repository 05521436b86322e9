//! Periodic harvest runs.
//!
//! The first run starts immediately. After a successful run the scheduler
//! sleeps for the configured interval; after a failed one it backs off for a
//! short fixed delay instead. Shutdown is checked while sleeping, never in
//! the middle of a run. A second interrupt ends the process right away.

use anyhow::Result;
use chrono::Local;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info};

/// Delay before retrying after a failed run.
pub const FAILURE_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct Schedule {
    pub interval: Duration,
    pub failure_backoff: Duration,
    /// Run a single time and return its result.
    pub run_once: bool,
}

impl Schedule {
    pub fn every_hours(hours: u64) -> Self {
        Self {
            interval: Duration::from_secs(hours.saturating_mul(3600)),
            failure_backoff: FAILURE_BACKOFF,
            run_once: false,
        }
    }
}

/// Call `job` on `schedule` until `shutdown` is notified.
///
/// Returns the job's own result in run-once mode, `Ok(())` otherwise.
pub async fn run<F, Fut>(schedule: &Schedule, shutdown: Arc<Notify>, mut job: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut runs: u64 = 0;
    loop {
        runs += 1;
        info!("starting scheduled run #{runs}");
        let outcome = job().await;

        if schedule.run_once {
            return outcome;
        }

        let wait = match outcome {
            Ok(()) => schedule.interval,
            Err(e) => {
                error!("scheduled run #{runs} failed: {e:#}");
                schedule.failure_backoff
            }
        };
        let next = chrono::Duration::from_std(wait)
            .ok()
            .and_then(|d| Local::now().checked_add_signed(d));
        match next {
            Some(at) => info!("next run at {}", at.format("%Y-%m-%d %H:%M:%S")),
            None => info!("next run in {}s", wait.as_secs()),
        }

        tokio::select! {
            biased;
            _ = shutdown.notified() => {
                info!("scheduler stopping after {runs} runs");
                return Ok(());
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// Notify `shutdown` on the first interrupt and return on the second.
pub async fn watch_interrupts<F, Fut>(mut interrupt: F, shutdown: Arc<Notify>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    interrupt().await;
    info!("received shutdown signal, stopping after the current run (interrupt again to exit now)");
    shutdown.notify_one();
    interrupt().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(run_once: bool) -> Schedule {
        Schedule {
            interval: Duration::from_millis(1),
            failure_backoff: Duration::from_millis(1),
            run_once,
        }
    }

    #[tokio::test]
    async fn test_run_once_returns_job_result() {
        let calls = AtomicUsize::new(0);
        let result = run(&fast(true), Arc::new(Notify::new()), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow!("portal down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(Notify::new());

        let counter = Arc::clone(&calls);
        let stopper = Arc::clone(&shutdown);
        let result = run(&fast(false), shutdown, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 3 {
                stopper.notify_one();
            }
            async move {
                if n % 2 == 1 {
                    Err(anyhow!("run {n} failed"))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_second_interrupt_ends_watch() {
        let presses = Arc::new(Notify::new());
        let shutdown = Arc::new(Notify::new());

        let source = Arc::clone(&presses);
        let watcher = tokio::spawn(watch_interrupts(
            move || {
                let source = Arc::clone(&source);
                async move { source.notified().await }
            },
            Arc::clone(&shutdown),
        ));

        presses.notify_one();
        tokio::time::timeout(Duration::from_secs(1), shutdown.notified())
            .await
            .unwrap();
        assert!(!watcher.is_finished());

        presses.notify_one();
        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_every_hours() {
        let schedule = Schedule::every_hours(24);
        assert_eq!(schedule.interval, Duration::from_secs(86_400));
        assert_eq!(schedule.failure_backoff, FAILURE_BACKOFF);
        assert!(!schedule.run_once);
    }
}
