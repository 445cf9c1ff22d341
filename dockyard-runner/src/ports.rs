//! Host port allocation
//!
//! Picks host ports for new containers from a fixed range. A port is only
//! handed out if no registered container holds it, no in-flight build has
//! reserved it, and (when probing is enabled) it can actually be bound.

use std::collections::HashSet;
use std::net::TcpListener;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::container::RuntimeError;
use crate::registry::ContainerRegistry;

/// Default range host ports are drawn from
pub const DEFAULT_PORT_RANGE: Range<u16> = 8000..9000;

#[derive(Default)]
struct Reservations {
    cursor: u16,
    reserved: HashSet<u16>,
}

pub struct PortAllocator {
    range: Range<u16>,
    registry: Arc<ContainerRegistry>,
    reservations: Arc<Mutex<Reservations>>,
    probe: bool,
}

impl PortAllocator {
    pub fn new(range: Range<u16>, registry: Arc<ContainerRegistry>) -> Self {
        let cursor = range.start;
        Self {
            range,
            registry,
            reservations: Arc::new(Mutex::new(Reservations {
                cursor,
                reserved: HashSet::new(),
            })),
            probe: true,
        }
    }

    /// Enables or disables the bind probe
    pub fn with_probe(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }

    /// Reserves a free port
    ///
    /// Scans the range once, starting after the previously handed out port.
    /// The reservation lasts until the returned lease is dropped, by which
    /// time the port should be held by a registered container.
    pub fn allocate(&self) -> Result<PortLease, RuntimeError> {
        let in_use = self.registry.ports_in_use();
        let mut reservations = lock(&self.reservations);
        let span = self.range.len();

        for offset in 0..span {
            let port = self.nth_after(reservations.cursor, offset);
            if in_use.contains(&port) || reservations.reserved.contains(&port) {
                continue;
            }
            if self.probe && !is_bindable(port) {
                debug!("Port {} is busy on the host, skipping", port);
                continue;
            }

            reservations.reserved.insert(port);
            reservations.cursor = self.nth_after(port, 1);
            debug!("Reserved host port {}", port);

            return Ok(PortLease {
                port,
                reservations: Arc::clone(&self.reservations),
            });
        }

        Err(RuntimeError::NoFreePort(self.range.start, self.range.end))
    }

    fn nth_after(&self, from: u16, offset: usize) -> u16 {
        let span = self.range.len();
        let base = usize::from(from.saturating_sub(self.range.start)) % span.max(1);
        self.range.start + ((base + offset) % span.max(1)) as u16
    }
}

fn lock(reservations: &Mutex<Reservations>) -> MutexGuard<'_, Reservations> {
    reservations.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_bindable(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// A reserved host port, released when dropped
pub struct PortLease {
    port: u16,
    reservations: Arc<Mutex<Reservations>>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        lock(&self.reservations).reserved.remove(&self.port);
    }
}

impl std::fmt::Debug for PortLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortLease").field("port", &self.port).finish()
    }
}
