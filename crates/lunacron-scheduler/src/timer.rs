use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

/// Handle to a pending single-shot timer.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Abort the timer. No-op if it already fired or was cancelled.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

/// Run `f` once after `delay` on `runtime`.
///
/// The wait is split into sleeps no longer than `max_slice`, so delays of
/// several weeks are just a chain of shorter sleeps.
pub fn schedule_once<F>(
    runtime: &Handle,
    delay: Duration,
    max_slice: Duration,
    f: F,
) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    let max_slice = max_slice.max(Duration::from_millis(1));
    let task = runtime.spawn(async move {
        let start = Instant::now();
        let deadline = start.checked_add(delay);
        loop {
            let now = Instant::now();
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(now),
                // Deadline beyond what Instant can represent: keep slicing.
                None => delay.saturating_sub(now.duration_since(start)),
            };
            if remaining.is_zero() {
                break;
            }
            let step = remaining.min(max_slice);
            trace!(step_ms = step.as_millis() as u64, "timer sleeping");
            tokio::time::sleep(step).await;
        }
        f();
    });
    TimerHandle { task }
}
