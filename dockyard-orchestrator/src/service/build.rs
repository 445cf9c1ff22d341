//! Build Service
//!
//! Accepts build requests, launches a pipeline for each on its own task and
//! keeps every build's log conduit so observers can subscribe while the build
//! runs and for a while after it has finished.

use chrono::{DateTime, Utc};
use dockyard_core::domain::build::{BuildId, BuildRequest};
use dockyard_runner::{LogConduit, LogSubscriber, PipelineExecutor, conduit};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Service error type
#[derive(Debug)]
pub enum BuildServiceError {
    NotFound(BuildId),
    ValidationError(String),
}

pub struct BuildService {
    executor: Arc<PipelineExecutor>,
    builds: Mutex<HashMap<BuildId, LogConduit>>,
    log_capacity: usize,
}

impl BuildService {
    pub fn new(executor: Arc<PipelineExecutor>, log_capacity: usize) -> Self {
        Self {
            executor,
            builds: Mutex::new(HashMap::new()),
            log_capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BuildId, LogConduit>> {
        self.builds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates a request and starts its pipeline in the background
    ///
    /// The returned subscriber is attached before the pipeline starts, so it
    /// observes every line the build produces.
    pub fn launch(
        &self,
        request: BuildRequest,
    ) -> Result<(BuildId, LogSubscriber), BuildServiceError> {
        validate_request(&request)?;

        let build_id = BuildId::new();
        let (writer, logs) = conduit(self.log_capacity);
        let subscriber = logs.subscribe();
        self.lock().insert(build_id, logs);

        tracing::info!(
            "Build {} accepted for {} ({})",
            build_id,
            request.repo_url,
            request.app_type
        );

        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            // The outcome is already on the conduit and in the process log.
            let _ = executor.execute(build_id, request, writer).await;
        });

        Ok((build_id, subscriber))
    }

    /// Attaches a new observer to a known build
    pub fn subscribe(&self, build_id: BuildId) -> Result<LogSubscriber, BuildServiceError> {
        self.lock()
            .get(&build_id)
            .map(LogConduit::subscribe)
            .ok_or(BuildServiceError::NotFound(build_id))
    }

    /// Drops conduits that closed more than `retention` before `now`
    ///
    /// Returns how many were dropped. Observers already attached keep
    /// reading what they have.
    pub fn prune_at(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };

        let mut builds = self.lock();
        let before = builds.len();
        builds.retain(|_, logs| match logs.closed_at() {
            Some(closed_at) => now.signed_duration_since(closed_at) <= retention,
            None => true,
        });
        before - builds.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Periodically prunes finished builds' logs
    pub fn spawn_pruner(self: Arc<Self>, interval: Duration, retention: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                "Starting log pruner (interval: {:?}, retention: {:?})",
                interval,
                retention
            );

            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let pruned = self.prune_at(Utc::now(), retention);
                if pruned > 0 {
                    tracing::debug!("Pruned logs of {} finished build(s)", pruned);
                }
            }
        })
    }
}

fn validate_request(request: &BuildRequest) -> Result<(), BuildServiceError> {
    if request.repo_url.trim().is_empty() {
        return Err(BuildServiceError::ValidationError(
            "repoUrl cannot be empty".to_string(),
        ));
    }

    Ok(())
}
