//! Engine configuration
//!
//! Everything the build engine needs to know about its host: where
//! workspaces live, which binaries to drive, the host port range, and the
//! idle reaping and timeout policy.

use anyhow::Context;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::conduit::DEFAULT_CAPACITY;
use crate::pipeline::ExecutorSettings;
use crate::ports::{DEFAULT_PORT_RANGE, PortAllocator};
use crate::reaper::{DEFAULT_IDLE_THRESHOLD, DEFAULT_REAP_INTERVAL};
use crate::registry::ContainerRegistry;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory build workspaces are created under
    pub workspace_dir: PathBuf,

    /// Docker-compatible runtime binary
    pub runtime_binary: String,

    /// Git binary used to clone repositories
    pub git_binary: String,

    /// Host ports handed to containers (half-open)
    pub port_range: Range<u16>,

    /// Check that a port can be bound before handing it out
    pub probe_ports: bool,

    /// Log lines retained per build
    pub log_buffer: usize,

    /// Deadline for the clone and image build steps, if any
    pub step_timeout: Option<Duration>,

    /// How often the idle reaper wakes up
    pub reap_interval: Duration,

    /// How long a container may go without access before it is reaped
    pub idle_threshold: Duration,

    /// Container start attempts on host port conflicts
    pub run_attempts: u32,

    /// Leave workspaces on disk after each build
    pub keep_workspaces: bool,

    /// Host name used in access URLs
    pub public_host: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("ci"),
            runtime_binary: "docker".to_string(),
            git_binary: "git".to_string(),
            port_range: DEFAULT_PORT_RANGE,
            probe_ports: true,
            log_buffer: DEFAULT_CAPACITY,
            step_timeout: None,
            reap_interval: DEFAULT_REAP_INTERVAL,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            run_attempts: 3,
            keep_workspaces: false,
            public_host: "localhost".to_string(),
        }
    }
}

impl EngineConfig {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - DOCKYARD_WORKSPACE_DIR (default: ci)
    /// - DOCKYARD_RUNTIME (default: docker)
    /// - DOCKYARD_GIT (default: git)
    /// - DOCKYARD_PORT_RANGE (default: 8000-9000, end exclusive)
    /// - DOCKYARD_PROBE_PORTS (default: true)
    /// - DOCKYARD_LOG_BUFFER (lines, default: 512)
    /// - DOCKYARD_STEP_TIMEOUT (seconds, 0 disables, default: 0)
    /// - DOCKYARD_REAP_INTERVAL (seconds, default: 60)
    /// - DOCKYARD_IDLE_THRESHOLD (seconds, default: 60)
    /// - DOCKYARD_RUN_ATTEMPTS (default: 3)
    /// - DOCKYARD_KEEP_WORKSPACES (default: false)
    /// - DOCKYARD_PUBLIC_HOST (default: localhost)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |key: &str| var(key).and_then(|s| s.parse::<u64>().ok());
        let flag = |key: &str, default: bool| {
            var(key)
                .and_then(|s| match s.to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => Some(true),
                    "0" | "false" | "no" | "off" => Some(false),
                    _ => None,
                })
                .unwrap_or(default)
        };

        let port_range = match var("DOCKYARD_PORT_RANGE") {
            Some(raw) => parse_port_range(&raw)
                .with_context(|| format!("invalid DOCKYARD_PORT_RANGE '{}'", raw))?,
            None => defaults.port_range.clone(),
        };

        let step_timeout = match number("DOCKYARD_STEP_TIMEOUT") {
            Some(0) | None => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            workspace_dir: var("DOCKYARD_WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_dir),
            runtime_binary: var("DOCKYARD_RUNTIME").unwrap_or(defaults.runtime_binary),
            git_binary: var("DOCKYARD_GIT").unwrap_or(defaults.git_binary),
            port_range,
            probe_ports: flag("DOCKYARD_PROBE_PORTS", defaults.probe_ports),
            log_buffer: number("DOCKYARD_LOG_BUFFER")
                .map(|n| n as usize)
                .unwrap_or(defaults.log_buffer),
            step_timeout,
            reap_interval: number("DOCKYARD_REAP_INTERVAL")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reap_interval),
            idle_threshold: number("DOCKYARD_IDLE_THRESHOLD")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_threshold),
            run_attempts: number("DOCKYARD_RUN_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.run_attempts),
            keep_workspaces: flag("DOCKYARD_KEEP_WORKSPACES", defaults.keep_workspaces),
            public_host: var("DOCKYARD_PUBLIC_HOST").unwrap_or(defaults.public_host),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port_range.is_empty() {
            anyhow::bail!(
                "port_range {}..{} is empty",
                self.port_range.start,
                self.port_range.end
            );
        }

        if self.port_range.start == 0 {
            anyhow::bail!("port_range cannot include port 0");
        }

        if self.log_buffer == 0 {
            anyhow::bail!("log_buffer must be greater than 0");
        }

        if self.reap_interval.is_zero() {
            anyhow::bail!("reap_interval must be greater than 0");
        }

        if self.idle_threshold.is_zero() {
            anyhow::bail!("idle_threshold must be greater than 0");
        }

        if self.run_attempts == 0 {
            anyhow::bail!("run_attempts must be greater than 0");
        }

        if self.runtime_binary.is_empty() {
            anyhow::bail!("runtime_binary cannot be empty");
        }

        if self.git_binary.is_empty() {
            anyhow::bail!("git_binary cannot be empty");
        }

        if self.public_host.is_empty() {
            anyhow::bail!("public_host cannot be empty");
        }

        Ok(())
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            workspace_base: self.workspace_dir.clone(),
            step_timeout: self.step_timeout,
            keep_workspaces: self.keep_workspaces,
            run_attempts: self.run_attempts,
            public_host: self.public_host.clone(),
        }
    }

    pub fn port_allocator(&self, registry: Arc<ContainerRegistry>) -> PortAllocator {
        PortAllocator::new(self.port_range.clone(), registry).with_probe(self.probe_ports)
    }
}

/// Parses `start-end` into a half-open range
fn parse_port_range(raw: &str) -> anyhow::Result<Range<u16>> {
    let (start, end) = raw
        .split_once('-')
        .context("expected the form START-END")?;
    let start: u16 = start.trim().parse().context("invalid range start")?;
    let end: u16 = end.trim().parse().context("invalid range end")?;

    if start >= end {
        anyhow::bail!("range start must be below range end");
    }

    Ok(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> anyhow::Result<EngineConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.port_range, 8000..9000);
        assert_eq!(config.reap_interval, Duration::from_secs(60));
        assert_eq!(config.idle_threshold, Duration::from_secs(60));
        assert_eq!(config.log_buffer, 512);
        assert!(config.step_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_without_vars_matches_default() {
        let config = from_vars(&[]).unwrap();
        let defaults = EngineConfig::default();

        assert_eq!(config.workspace_dir, defaults.workspace_dir);
        assert_eq!(config.runtime_binary, "docker");
        assert_eq!(config.port_range, defaults.port_range);
        assert_eq!(config.run_attempts, 3);
        assert!(config.probe_ports);
        assert!(!config.keep_workspaces);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = from_vars(&[
            ("DOCKYARD_WORKSPACE_DIR", "/var/lib/dockyard"),
            ("DOCKYARD_RUNTIME", "podman"),
            ("DOCKYARD_PORT_RANGE", "10000 - 10100"),
            ("DOCKYARD_PROBE_PORTS", "off"),
            ("DOCKYARD_STEP_TIMEOUT", "900"),
            ("DOCKYARD_IDLE_THRESHOLD", "300"),
            ("DOCKYARD_KEEP_WORKSPACES", "yes"),
            ("DOCKYARD_PUBLIC_HOST", "apps.example.com"),
        ])
        .unwrap();

        assert_eq!(config.workspace_dir, PathBuf::from("/var/lib/dockyard"));
        assert_eq!(config.runtime_binary, "podman");
        assert_eq!(config.port_range, 10000..10100);
        assert!(!config.probe_ports);
        assert_eq!(config.step_timeout, Some(Duration::from_secs(900)));
        assert_eq!(config.idle_threshold, Duration::from_secs(300));
        assert!(config.keep_workspaces);

        let settings = config.executor_settings();
        assert_eq!(settings.public_host, "apps.example.com");
        assert_eq!(settings.step_timeout, Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_unparseable_numbers_fall_back() {
        let config = from_vars(&[
            ("DOCKYARD_LOG_BUFFER", "lots"),
            ("DOCKYARD_REAP_INTERVAL", "-5"),
            ("DOCKYARD_STEP_TIMEOUT", "0"),
        ])
        .unwrap();

        assert_eq!(config.log_buffer, 512);
        assert_eq!(config.reap_interval, Duration::from_secs(60));
        assert!(config.step_timeout.is_none());
    }

    #[test]
    fn test_malformed_port_range_rejected() {
        assert!(from_vars(&[("DOCKYARD_PORT_RANGE", "8000")]).is_err());
        assert!(from_vars(&[("DOCKYARD_PORT_RANGE", "9000-8000")]).is_err());
        assert!(from_vars(&[("DOCKYARD_PORT_RANGE", "a-b")]).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.log_buffer = 0;
        assert!(config.validate().is_err());
        config.log_buffer = 16;

        config.run_attempts = 0;
        assert!(config.validate().is_err());
        config.run_attempts = 1;

        config.idle_threshold = Duration::ZERO;
        assert!(config.validate().is_err());
        config.idle_threshold = Duration::from_secs(1);

        config.runtime_binary = String::new();
        assert!(config.validate().is_err());
        config.runtime_binary = "podman".to_string();

        assert!(config.validate().is_ok());
    }
}
