//! Store health monitoring.
//!
//! A background [`HealthMonitor`] probes the store on a fixed interval and is
//! the only writer of the serving status; the health-check handler reads it
//! through a [`HealthState`] handle and never touches the store itself.

use partstream_store::ObjectStore;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Aggregate serving status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ServingStatus {
    NotServing = 0,
    Serving = 1,
}

impl ServingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotServing => "NOT_SERVING",
            Self::Serving => "SERVING",
        }
    }

    fn from_u8(value: u8) -> Self {
        if value == Self::Serving as u8 {
            Self::Serving
        } else {
            Self::NotServing
        }
    }
}

impl fmt::Display for ServingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read handle on the serving status
#[derive(Clone, Debug)]
pub struct HealthState {
    status: Arc<AtomicU8>,
}

impl HealthState {
    pub fn status(&self) -> ServingStatus {
        ServingStatus::from_u8(self.status.load(Ordering::Acquire))
    }
}

/// Write handle on the serving status; there is exactly one
#[derive(Debug)]
pub struct HealthReporter {
    status: Arc<AtomicU8>,
}

impl HealthReporter {
    /// Set the status, returning the previous one
    pub fn set_status(&self, status: ServingStatus) -> ServingStatus {
        ServingStatus::from_u8(self.status.swap(status as u8, Ordering::AcqRel))
    }
}

/// Create the writer and reader halves of a serving status.
/// The status starts as `NotServing` until the first probe succeeds.
pub fn health_channel() -> (HealthReporter, HealthState) {
    let status = Arc::new(AtomicU8::new(ServingStatus::NotServing as u8));
    (
        HealthReporter {
            status: Arc::clone(&status),
        },
        HealthState { status },
    )
}

/// Periodically probes the store and reports the result
pub struct HealthMonitor {
    store: Arc<dyn ObjectStore>,
    reporter: HealthReporter,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn ObjectStore>, reporter: HealthReporter, interval: Duration) -> Self {
        Self {
            store,
            reporter,
            interval,
        }
    }

    /// Probe the store once and record the outcome
    pub async fn probe_once(&self) -> ServingStatus {
        let status = match self.store.list_buckets().await {
            Ok(()) => ServingStatus::Serving,
            Err(e) => {
                debug!(error = %e, "health probe failed");
                ServingStatus::NotServing
            }
        };

        let previous = self.reporter.set_status(status);
        if previous != status {
            match status {
                ServingStatus::Serving => info!(%status, "store reachable"),
                ServingStatus::NotServing => warn!(%status, "store unreachable"),
            }
        }
        status
    }

    /// Run the probe loop on the current runtime until the handle is aborted.
    /// The first probe runs immediately.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.probe_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partstream_store::MemoryObjectStore;

    #[test]
    fn test_channel_starts_not_serving() {
        let (reporter, state) = health_channel();
        assert_eq!(state.status(), ServingStatus::NotServing);

        assert_eq!(reporter.set_status(ServingStatus::Serving), ServingStatus::NotServing);
        assert_eq!(state.clone().status(), ServingStatus::Serving);
    }

    #[test_log::test(tokio::test)]
    async fn test_probe_follows_store() {
        let store = MemoryObjectStore::new();
        let (reporter, state) = health_channel();
        let monitor = HealthMonitor::new(Arc::new(store.clone()), reporter, Duration::from_secs(3));

        assert_eq!(monitor.probe_once().await, ServingStatus::Serving);
        assert_eq!(state.status(), ServingStatus::Serving);

        store.set_available(false);
        assert_eq!(monitor.probe_once().await, ServingStatus::NotServing);
        assert_eq!(state.status(), ServingStatus::NotServing);

        store.set_available(true);
        assert_eq!(monitor.probe_once().await, ServingStatus::Serving);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_ticks_on_interval() {
        let store = MemoryObjectStore::new();
        let (reporter, state) = health_channel();
        let handle = HealthMonitor::new(Arc::new(store.clone()), reporter, Duration::from_secs(3)).spawn();

        // First probe runs immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(state.status(), ServingStatus::Serving);
        assert_eq!(store.stats().list_calls, 1);

        store.set_available(false);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(state.status(), ServingStatus::NotServing);
        assert_eq!(store.stats().list_calls, 2);

        handle.abort();
    }
}
