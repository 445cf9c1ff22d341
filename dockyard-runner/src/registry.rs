//! Container registry
//!
//! The single authoritative in-memory table of running containers. Pipeline
//! executors register into it, ping handlers touch it, and the idle reaper
//! snapshots and prunes it.
//!
//! Every mutation and every full iteration goes through one mutex. Critical
//! sections only copy or update map entries; nothing slow (and nothing async)
//! ever runs while the lock is held, so `touch` is never stuck behind a
//! snapshot or a teardown.

use chrono::{DateTime, Utc};
use dockyard_core::domain::container::ContainerRecord;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("container {0} is already registered")]
    Duplicate(String),
}

#[derive(Default)]
pub struct ContainerRegistry {
    records: Mutex<HashMap<String, ContainerRecord>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ContainerRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a new record
    ///
    /// A record whose container id is already present is rejected and the
    /// existing entry is left untouched.
    pub fn register(&self, record: ContainerRecord) -> Result<(), RegistryError> {
        let mut records = self.lock();
        if records.contains_key(&record.container_id) {
            return Err(RegistryError::Duplicate(record.container_id));
        }

        debug!(
            "Registered container {} on port {}",
            record.container_id, record.port
        );
        records.insert(record.container_id.clone(), record);
        Ok(())
    }

    /// Marks a container as accessed now
    ///
    /// Returns whether the container was registered. Unknown ids are ignored.
    pub fn touch(&self, container_id: &str) -> bool {
        self.touch_at(container_id, Utc::now())
    }

    /// Marks a container as accessed at `now`
    ///
    /// The last access time never moves backwards, even if `now` does.
    pub fn touch_at(&self, container_id: &str, now: DateTime<Utc>) -> bool {
        let mut records = self.lock();
        match records.get_mut(container_id) {
            Some(record) => {
                record.last_access = record.last_access.max(now);
                true
            }
            None => false,
        }
    }

    /// Point-in-time copy of every record
    pub fn snapshot(&self) -> Vec<ContainerRecord> {
        self.lock().values().cloned().collect()
    }

    /// Deletes a record unconditionally
    pub fn remove(&self, container_id: &str) -> Option<ContainerRecord> {
        self.lock().remove(container_id)
    }

    pub fn get(&self, container_id: &str) -> Option<ContainerRecord> {
        self.lock().get(container_id).cloned()
    }

    /// Whether the container is registered and has been idle for longer than
    /// `threshold` as of `now`
    pub fn is_idle(&self, container_id: &str, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.lock()
            .get(container_id)
            .is_some_and(|record| record.is_idle(now, threshold))
    }

    /// Host ports held by registered containers
    pub fn ports_in_use(&self) -> HashSet<u16> {
        self.lock().values().map(|record| record.port).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_and_get() {
        let registry = ContainerRegistry::new();
        registry
            .register(ContainerRecord::new("abc123", 8042))
            .unwrap();

        let record = registry.get("abc123").unwrap();
        assert_eq!(record.port, 8042);
        assert_eq!(registry.len(), 1);
        assert!(registry.ports_in_use().contains(&8042));
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let registry = ContainerRegistry::new();
        registry.register(ContainerRecord::new("abc", 8001)).unwrap();

        let err = registry
            .register(ContainerRecord::new("abc", 8002))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(id) if id == "abc"));
        assert_eq!(registry.get("abc").unwrap().port, 8001);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let registry = ContainerRegistry::new();
        let record = ContainerRecord::new("abc", 8001);
        let registered_at = record.last_access;
        registry.register(record).unwrap();

        let later = registered_at + chrono::Duration::seconds(5);
        assert!(registry.touch_at("abc", later));
        assert_eq!(registry.get("abc").unwrap().last_access, later);

        let earlier = registered_at - chrono::Duration::seconds(5);
        assert!(registry.touch_at("abc", earlier));
        assert_eq!(registry.get("abc").unwrap().last_access, later);
    }

    #[test]
    fn test_touch_unknown_is_noop() {
        let registry = ContainerRegistry::new();
        assert!(!registry.touch("ghost"));
        assert!(registry.is_empty());
        assert!(registry.get("ghost").is_none());
    }

    #[test]
    fn test_touch_after_remove_is_noop() {
        let registry = ContainerRegistry::new();
        registry.register(ContainerRecord::new("abc", 8001)).unwrap();

        assert!(registry.remove("abc").is_some());
        assert!(registry.remove("abc").is_none());
        assert!(!registry.touch("abc"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = ContainerRegistry::new();
        registry.register(ContainerRecord::new("a", 8001)).unwrap();
        registry.register(ContainerRecord::new("b", 8002)).unwrap();

        let snapshot = registry.snapshot();
        registry.remove("a");

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_is_idle() {
        let registry = ContainerRegistry::new();
        let mut record = ContainerRecord::new("old", 8001);
        let now = Utc::now();
        record.last_access = now - chrono::Duration::seconds(120);
        registry.register(record).unwrap();
        registry.register(ContainerRecord::new("new", 8002)).unwrap();

        let threshold = Duration::from_secs(60);
        assert!(registry.is_idle("old", now, threshold));
        assert!(!registry.is_idle("new", now, threshold));
        assert!(!registry.is_idle("missing", now, threshold));
    }

    #[test]
    fn test_concurrent_touch_and_register() {
        let registry = Arc::new(ContainerRegistry::new());
        registry.register(ContainerRecord::new("shared", 8000)).unwrap();

        let handles: Vec<_> = (0..8u16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(registry.touch("shared"));
                    }
                    registry
                        .register(ContainerRecord::new(format!("c{}", i), 8001 + i))
                        .unwrap();
                    registry.snapshot().len()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap() >= 2);
        }
        assert_eq!(registry.len(), 9);
    }
}
