use std::future::Future;
use std::sync::Mutex;
use tokio::spawn;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::bluetooth::constants::TICK;

const ONE_SECOND: Duration = Duration::from_millis(TICK);

/// A cancellable one-shot countdown with a progress callback every second.
///
/// At most one countdown runs per instance: starting a new one cancels the previous one.
/// The first tick is delivered before `start_timer` returns. Every later callback runs on a
/// spawned tokio task, so whatever they touch must be safe to use from another task.
#[derive(Default)]
pub struct CountdownTimer {
    job: Mutex<Option<CancellationToken>>,
}

impl CountdownTimer {
    pub fn new() -> Self {
        CountdownTimer::default()
    }

    /// Calls `on_each_second` with the remaining time right away and then once every second
    /// (`delay`, `delay - 1s`, ... down to the last value that is not negative), after which
    /// `on_timeout` runs once.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_timer<T, F, E>(&self, delay: Duration, on_timeout: T, mut on_each_second: E)
    where
        T: FnOnce() -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
        E: FnMut(Duration) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        self.replace_job(Some(cancel.clone()));

        let mut remaining = delay;
        on_each_second(remaining);

        spawn(async move {
            let ticks = delay.as_millis() / ONE_SECOND.as_millis();
            for _ in 0..ticks {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return;
                    },
                    _ = sleep(ONE_SECOND) => {},
                }

                // stop_timer() may have raced with the sleep
                if cancel.is_cancelled() {
                    return;
                }

                remaining = remaining.saturating_sub(ONE_SECOND);
                on_each_second(remaining);
            }

            if cancel.is_cancelled() {
                return;
            }

            // mark this job as finished before handing control to the callback, which may
            // very well start a new countdown on the same timer
            cancel.cancel();
            on_timeout().await;
        });
    }

    /// Cancels the running countdown, if any. Neither callback fires afterwards.
    pub fn stop_timer(&self) {
        self.replace_job(None);
    }

    pub fn is_running(&self) -> bool {
        let job = self.job.lock().expect("Failed to lock CountdownTimer job");
        job.as_ref().map_or(false, |cancel| !cancel.is_cancelled())
    }

    fn replace_job(&self, job: Option<CancellationToken>) {
        let previous = {
            let mut current = self.job.lock().expect("Failed to lock CountdownTimer job");
            std::mem::replace(&mut *current, job)
        };

        if let Some(previous) = previous {
            previous.cancel();
        }
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.stop_timer();
    }
}
