//! Real-time pacing: ticks a shared simulation on a tokio interval.

use crate::Simulation;
use sim_core::Catalog;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DriverError {
    /// `start` was called outside a tokio runtime.
    #[error("no tokio runtime available to drive the simulation")]
    NoRuntime,
}

/// Owns a simulation behind a mutex so admission calls and the ticking task
/// never interleave with a tick in progress.
pub struct Driver<C: Catalog + 'static> {
    sim: Arc<Mutex<Simulation<C>>>,
    task: Option<JoinHandle<()>>,
}

impl<C: Catalog + 'static> Driver<C> {
    pub fn new(sim: Simulation<C>) -> Self {
        Self {
            sim: Arc::new(Mutex::new(sim)),
            task: None,
        }
    }

    /// Handle to the simulation for callers that outlive a borrow of the driver.
    pub fn shared(&self) -> Arc<Mutex<Simulation<C>>> {
        Arc::clone(&self.sim)
    }

    /// Run `f` with exclusive access to the simulation.
    pub fn with<R>(&self, f: impl FnOnce(&mut Simulation<C>) -> R) -> R {
        f(&mut lock(&self.sim))
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Tick every `interval_ms` until [`Driver::stop`]. Starting a running
    /// driver does nothing.
    pub fn start(&mut self, interval_ms: u64) -> Result<(), DriverError> {
        if self.is_running() {
            debug!("driver already running");
            return Ok(());
        }
        let runtime = Handle::try_current().map_err(|_| DriverError::NoRuntime)?;
        let sim = Arc::clone(&self.sim);
        let period = Duration::from_millis(interval_ms.max(1));
        self.task = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let report = lock(&sim).tick();
                debug!(tick = report.tick, events = report.events.len(), "paced tick");
            }
        }));
        info!(interval_ms, "driver started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("driver stopped");
        }
    }
}

impl<C: Catalog + 'static> Drop for Driver<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A panic inside a tick leaves the state as it was; keep serving it.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
