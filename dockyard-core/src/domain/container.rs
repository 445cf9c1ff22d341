//! Container domain model
//!
//! Represents a container started by a successful build.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A running container tracked by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    /// Identifier assigned by the container runtime
    pub container_id: String,

    /// Host port mapped to the application's port
    pub port: u16,

    /// Last time the container was started or pinged
    pub last_access: DateTime<Utc>,
}

impl ContainerRecord {
    /// Creates a record for a container that has just started
    pub fn new(container_id: impl Into<String>, port: u16) -> Self {
        Self {
            container_id: container_id.into(),
            port,
            last_access: Utc::now(),
        }
    }

    /// Time elapsed since the last access, or `None` if the last access lies
    /// in the future relative to `now`
    pub fn idle_for(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        now.signed_duration_since(self.last_access).to_std().ok()
    }

    /// Whether the record has been idle for longer than `threshold`
    pub fn is_idle(&self, now: DateTime<Utc>, threshold: std::time::Duration) -> bool {
        self.idle_for(now).is_some_and(|idle| idle > threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_idle_threshold_is_exclusive() {
        let now = Utc::now();
        let mut record = ContainerRecord::new("abc", 8000);

        record.last_access = now - chrono::Duration::seconds(60);
        assert!(!record.is_idle(now, Duration::from_secs(60)));

        record.last_access = now - chrono::Duration::seconds(61);
        assert!(record.is_idle(now, Duration::from_secs(60)));
    }

    #[test]
    fn test_future_access_is_never_idle() {
        let now = Utc::now();
        let mut record = ContainerRecord::new("abc", 8000);
        record.last_access = now + chrono::Duration::seconds(30);

        assert_eq!(record.idle_for(now), None);
        assert!(!record.is_idle(now, Duration::ZERO));
    }
}
