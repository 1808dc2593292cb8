//! Debounced scheduled task.
//!
//! [`Debouncer::trigger`] (re)schedules the action to run once the triggers
//! have been quiet for the quiet period, and never sooner than the minimum
//! spacing after the previous run. Runs never overlap.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

type Action = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

enum Signal {
    Trigger,
    Flush(oneshot::Sender<()>),
}

/// Timing for a [`Debouncer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceTiming {
    /// Quiet period after the last trigger.
    pub quiet: Duration,
    /// Minimum time between the starts of two runs.
    pub min_spacing: Duration,
}

/// Handle to a debounced background task. Dropping it stops the task after
/// running any pending action.
#[derive(Debug)]
pub struct Debouncer {
    tx: mpsc::UnboundedSender<Signal>,
    handle: JoinHandle<()>,
}

impl Debouncer {
    /// Spawn the task. Must be called inside a tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, timing: DebounceTiming, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let action: Action = Arc::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> { Box::pin(action()) });
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(name, timing, action, rx));
        Self { tx, handle }
    }

    /// Schedule a run.
    pub fn trigger(&self) {
        // The task only stops once every handle is gone.
        let _ = self.tx.send(Signal::Trigger);
    }

    /// Run now if a run is pending, and wait for it.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Signal::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Whether the background task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run(name: &'static str, timing: DebounceTiming, action: Action, mut rx: mpsc::UnboundedReceiver<Signal>) {
    let mut last_run: Option<Instant> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        let signal = match deadline {
            Some(at) => {
                tokio::select! {
                    () = sleep_until(at) => {
                        deadline = None;
                        last_run = Some(Instant::now());
                        tracing::debug!("{name}: quiet period elapsed, running");
                        action().await;
                        continue;
                    }
                    signal = rx.recv() => signal,
                }
            }
            None => rx.recv().await,
        };

        match signal {
            Some(Signal::Trigger) => {
                let quiet_at = Instant::now() + timing.quiet;
                let spaced_at = last_run.map_or(quiet_at, |t| t + timing.min_spacing);
                deadline = Some(quiet_at.max(spaced_at));
            }
            Some(Signal::Flush(ack)) => {
                if deadline.take().is_some() {
                    last_run = Some(Instant::now());
                    tracing::debug!("{name}: flushing");
                    action().await;
                }
                let _ = ack.send(());
            }
            None => {
                if deadline.is_some() {
                    action().await;
                }
                tracing::debug!("{name}: stopped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> futures::future::Ready<()> + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        })
    }

    const TIMING: DebounceTiming = DebounceTiming {
        quiet: Duration::from_millis(100),
        min_spacing: Duration::from_millis(1_000),
    };

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_once_after_quiet() {
        let (count, action) = counter();
        let debouncer = Debouncer::spawn("test", TIMING, action);
        for _ in 0..5 {
            debouncer.trigger();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_spacing_between_runs() {
        let (count, action) = counter();
        let debouncer = Debouncer::spawn("test", TIMING, action);
        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_runs_pending_only() {
        let (count, action) = counter();
        let debouncer = Debouncer::spawn("test", TIMING, action);
        debouncer.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        debouncer.trigger();
        debouncer.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_runs_pending() {
        let (count, action) = counter();
        let debouncer = Debouncer::spawn("test", TIMING, action);
        debouncer.trigger();
        let Debouncer { tx, handle } = debouncer;
        drop(tx);
        handle.await.expect("join");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
