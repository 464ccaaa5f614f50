//! Restartable periodic task on the tokio runtime

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Periodic timer. The first tick fires one period after `start`; a tick
/// callback always finishes before the next tick is awaited.
pub struct PeriodicTimer {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTimer {
    pub fn new(name: &'static str) -> Self {
        Self { name, handle: None }
    }

    /// (Re)start the timer. `tick` returns `false` to end the timer.
    /// Outside a tokio runtime the timer stays inactive.
    pub fn start<F>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.stop();

        if period.is_zero() {
            tracing::warn!("Timer {} not started: zero period", self.name);
            return;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("Timer {} not started: no tokio runtime", self.name);
                return;
            }
        };

        let name = self.name;
        self.handle = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if !tick() {
                    tracing::trace!("Timer {} finished", name);
                    break;
                }
            }
        }));

        tracing::debug!("Timer {} started ({:?})", self.name, period);
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!("Timer {} stopped", self.name);
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().map_or(false, |handle| !handle.is_finished())
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
