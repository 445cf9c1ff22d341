//! Idle reaper
//!
//! Background loop enforcing the idle threshold. Each sweep:
//! 1. Takes a snapshot of the registry
//! 2. Picks the records idle for longer than the threshold
//! 3. For each, re-checks idleness under a short lock, tears the container
//!    down without holding the lock, then removes the record
//!
//! Teardown is best-effort: a failure is logged and the record is removed
//! anyway. Nothing is retried and the loop never stops on a failure.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::container::ContainerTeardown;
use crate::registry::ContainerRegistry;

/// Default wake interval
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Default idle threshold
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(60);

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records present in the snapshot
    pub examined: usize,
    /// Records removed from the registry
    pub reaped: Vec<String>,
    /// Reaped records whose teardown failed
    pub failed: Vec<String>,
}

pub struct IdleReaper {
    registry: Arc<ContainerRegistry>,
    teardown: Arc<dyn ContainerTeardown>,
    interval: Duration,
    idle_threshold: Duration,
}

impl IdleReaper {
    pub fn new(
        registry: Arc<ContainerRegistry>,
        teardown: Arc<dyn ContainerTeardown>,
        interval: Duration,
        idle_threshold: Duration,
    ) -> Self {
        Self {
            registry,
            teardown,
            interval,
            idle_threshold,
        }
    }

    /// Runs the loop on its own task for the rest of the process lifetime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Sweeps once per interval, forever
    pub async fn run(self) {
        info!(
            "Starting idle reaper (interval: {:?}, idle threshold: {:?})",
            self.interval, self.idle_threshold
        );

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let report = self.sweep().await;
            if report.reaped.is_empty() {
                debug!("Reaper sweep found no idle containers ({} examined)", report.examined);
            } else {
                info!(
                    "Reaped {} idle container(s), {} teardown failure(s)",
                    report.reaped.len(),
                    report.failed.len()
                );
            }
        }
    }

    /// Performs one sweep against the current time
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Performs one sweep as if the current time were `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let snapshot = self.registry.snapshot();
        let mut report = SweepReport {
            examined: snapshot.len(),
            ..Default::default()
        };

        let candidates = snapshot
            .into_iter()
            .filter(|record| record.is_idle(now, self.idle_threshold));

        for record in candidates {
            let id = record.container_id;

            // A touch that landed after the snapshot spares the container.
            if !self.registry.is_idle(&id, now, self.idle_threshold) {
                debug!("Container {} was touched during the sweep, keeping it", id);
                continue;
            }

            info!("Stopping idle container {}", id);
            if let Err(e) = self.teardown.teardown(&id).await {
                warn!("Teardown of idle container {} failed: {}", id, e);
                report.failed.push(id.clone());
            }

            self.registry.remove(&id);
            report.reaped.push(id);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::RuntimeError;
    use crate::testing::FakeRuntime;
    use async_trait::async_trait;
    use dockyard_core::domain::container::ContainerRecord;
    use std::sync::Mutex;

    fn stale_record(id: &str, port: u16, age: Duration) -> ContainerRecord {
        let mut record = ContainerRecord::new(id, port);
        record.last_access = Utc::now() - chrono::Duration::from_std(age).unwrap();
        record
    }

    fn reaper(registry: &Arc<ContainerRegistry>, runtime: &Arc<FakeRuntime>) -> IdleReaper {
        IdleReaper::new(
            Arc::clone(registry),
            Arc::clone(runtime) as Arc<dyn ContainerTeardown>,
            DEFAULT_REAP_INTERVAL,
            DEFAULT_IDLE_THRESHOLD,
        )
    }

    #[tokio::test]
    async fn test_stale_record_reaped_once() {
        let registry = Arc::new(ContainerRegistry::new());
        let runtime = Arc::new(FakeRuntime::default());
        registry
            .register(stale_record("stale", 8001, DEFAULT_IDLE_THRESHOLD * 2))
            .unwrap();

        let report = reaper(&registry, &runtime).sweep().await;

        assert_eq!(report.examined, 1);
        assert_eq!(report.reaped, vec!["stale".to_string()]);
        assert!(report.failed.is_empty());
        assert!(registry.get("stale").is_none());
        assert_eq!(runtime.torn_down(), vec!["stale".to_string()]);
    }

    #[tokio::test]
    async fn test_fresh_record_kept() {
        let registry = Arc::new(ContainerRegistry::new());
        let runtime = Arc::new(FakeRuntime::default());
        registry.register(ContainerRecord::new("fresh", 8001)).unwrap();
        registry
            .register(stale_record("old", 8002, Duration::from_secs(600)))
            .unwrap();

        let report = reaper(&registry, &runtime).sweep().await;

        assert_eq!(report.examined, 2);
        assert_eq!(report.reaped, vec!["old".to_string()]);
        assert!(registry.get("fresh").is_some());
        assert_eq!(runtime.torn_down(), vec!["old".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_teardown_still_removes() {
        let registry = Arc::new(ContainerRegistry::new());
        let runtime = Arc::new(FakeRuntime::default().failing_teardown());
        registry
            .register(stale_record("a", 8001, Duration::from_secs(300)))
            .unwrap();
        registry
            .register(stale_record("b", 8002, Duration::from_secs(300)))
            .unwrap();

        let reaper = reaper(&registry, &runtime);
        let report = reaper.sweep().await;

        assert_eq!(report.reaped.len(), 2);
        assert_eq!(report.failed.len(), 2);
        assert!(registry.is_empty());
        assert_eq!(runtime.torn_down().len(), 2);

        // A later sweep has nothing left to do and issues no more teardowns.
        let report = reaper.sweep().await;
        assert!(report.reaped.is_empty());
        assert_eq!(runtime.torn_down().len(), 2);
    }

    /// Teardown that simulates a ping arriving for every other container
    /// while the first one is being stopped
    struct TouchingTeardown {
        registry: Arc<ContainerRegistry>,
        at: DateTime<Utc>,
        torn_down: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContainerTeardown for TouchingTeardown {
        async fn teardown(&self, container_id: &str) -> Result<(), RuntimeError> {
            self.torn_down.lock().unwrap().push(container_id.to_string());
            for record in self.registry.snapshot() {
                if record.container_id != container_id {
                    self.registry.touch_at(&record.container_id, self.at);
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_touch_after_snapshot_spares_container() {
        let registry = Arc::new(ContainerRegistry::new());
        registry
            .register(stale_record("a", 8001, Duration::from_secs(300)))
            .unwrap();
        registry
            .register(stale_record("b", 8002, Duration::from_secs(300)))
            .unwrap();

        let now = Utc::now();
        let teardown = Arc::new(TouchingTeardown {
            registry: Arc::clone(&registry),
            at: now,
            torn_down: Mutex::new(Vec::new()),
        });
        let reaper = IdleReaper::new(
            Arc::clone(&registry),
            Arc::clone(&teardown) as Arc<dyn ContainerTeardown>,
            DEFAULT_REAP_INTERVAL,
            DEFAULT_IDLE_THRESHOLD,
        );

        // Both records are stale in the snapshot; the first teardown touches
        // the other one before its re-check.
        let report = reaper.sweep_at(now).await;

        assert_eq!(report.examined, 2);
        assert_eq!(report.reaped.len(), 1);
        let torn_down = teardown.torn_down.lock().unwrap().clone();
        assert_eq!(torn_down, report.reaped);

        let spared = if report.reaped[0] == "a" { "b" } else { "a" };
        assert_eq!(registry.get(spared).unwrap().last_access, now);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_sweeps_on_interval() {
        let registry = Arc::new(ContainerRegistry::new());
        let runtime = Arc::new(FakeRuntime::default());
        registry
            .register(stale_record("stale", 8001, Duration::from_secs(3600)))
            .unwrap();

        let handle = reaper(&registry, &runtime).spawn();

        // Nothing happens before the first interval elapses.
        tokio::task::yield_now().await;
        assert_eq!(registry.len(), 1);

        time::sleep(DEFAULT_REAP_INTERVAL + Duration::from_secs(1)).await;
        assert!(registry.is_empty());
        assert_eq!(runtime.torn_down(), vec!["stale".to_string()]);

        handle.abort();
    }
}
