//! Host port selection for sandbox port mappings.
//!
//! Candidates are drawn from an injected [`PortSource`] so tests can supply
//! fixed sequences. Every allocator owns a [`PortLeases`] registry; clones of
//! the registry share state, so allocators handed the same registry never
//! return a port another live workload still holds.

use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Lowest host port handed out when none is configured.
pub const DEFAULT_MIN_PORT: u16 = 1024;

/// Highest host port handed out when none is configured (top of the registered range).
pub const DEFAULT_MAX_PORT: u16 = 49151;

/// Attempt budget used when none is configured.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Errors produced while choosing a host port.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    /// The lower bound is not strictly below the upper bound.
    #[error("invalid port range: {min}-{max}")]
    InvalidRange {
        /// Requested lower bound.
        min: u16,
        /// Requested upper bound.
        max: u16,
    },

    /// No new candidate was accepted within the attempt budget.
    #[error("failed to find available port after {attempts} attempts")]
    Exhausted {
        /// Candidates drawn.
        attempts: u32,
    },

    /// An explicitly requested port is held by another workload in this process.
    #[error("host port {port} is already leased by another workload")]
    Leased {
        /// The requested port.
        port: u16,
    },
}

impl PortError {
    /// Returns true if the attempt budget ran out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Returns true if the requested range was rejected.
    pub fn is_invalid_range(&self) -> bool {
        matches!(self, Self::InvalidRange { .. })
    }
}

/// A source of candidate ports.
pub trait PortSource {
    /// Proposes a port in `[min, max]`.
    fn candidate(&mut self, min: u16, max: u16) -> u16;
}

/// Adapts any random number generator into a uniform [`PortSource`].
#[derive(Debug, Clone)]
pub struct RngSource<R>(pub R);

impl<R: Rng> PortSource for RngSource<R> {
    fn candidate(&mut self, min: u16, max: u16) -> u16 {
        self.0.random_range(min..=max)
    }
}

/// In-process registry of host ports held by live workloads.
#[derive(Debug, Clone, Default)]
pub struct PortLeases {
    held: Arc<Mutex<HashSet<u16>>>,
}

impl PortLeases {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `port`, or returns `None` if it is already held.
    pub fn try_acquire(&self, port: u16) -> Option<PortLease> {
        let inserted = self.lock().insert(port);
        inserted.then(|| PortLease {
            port,
            leases: self.clone(),
        })
    }

    /// Returns true if `port` is currently held.
    pub fn is_leased(&self, port: u16) -> bool {
        self.lock().contains(&port)
    }

    /// Number of ports currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no port is held.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn release(&self, port: u16) {
        self.lock().remove(&port);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<u16>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A held host port; released when dropped.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    leases: PortLeases,
}

impl PortLease {
    /// The leased port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        debug!("Releasing host port lease {}", self.port);
        self.leases.release(self.port);
    }
}

/// Chooses host ports from a range.
pub struct PortAllocator {
    source: Box<dyn PortSource + Send>,
    leases: PortLeases,
    probe_local_bind: bool,
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("leases", &self.leases)
            .field("probe_local_bind", &self.probe_local_bind)
            .finish_non_exhaustive()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator {
    /// Creates an allocator backed by an OS-seeded generator.
    pub fn new() -> Self {
        Self::with_source(RngSource(StdRng::from_os_rng()))
    }

    /// Creates an allocator drawing candidates from `source`.
    pub fn with_source(source: impl PortSource + Send + 'static) -> Self {
        Self {
            source: Box::new(source),
            leases: PortLeases::new(),
            probe_local_bind: false,
        }
    }

    /// Shares `leases` with other allocators.
    #[must_use]
    pub fn with_leases(mut self, leases: PortLeases) -> Self {
        self.leases = leases;
        self
    }

    /// Rejects candidates that cannot be bound on this host.
    #[must_use]
    pub fn with_bind_probe(mut self, enabled: bool) -> Self {
        self.probe_local_bind = enabled;
        self
    }

    /// The registry this allocator consults.
    pub fn leases(&self) -> &PortLeases {
        &self.leases
    }

    /// Returns one candidate in `[min, max]`.
    ///
    /// The port is not checked for availability anywhere.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvalidRange`] if `min >= max`.
    pub fn allocate(&mut self, min: u16, max: u16) -> Result<u16, PortError> {
        if min >= max {
            return Err(PortError::InvalidRange { min, max });
        }
        Ok(self.source.candidate(min, max))
    }

    /// Returns a port in `[min, max]`, skipping candidates already proposed
    /// in this call, currently leased, or (with the bind probe) unbindable.
    ///
    /// Every draw counts toward `max_attempts`. The port is not leased.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvalidRange`] for a bad range and
    /// [`PortError::Exhausted`] if no candidate was accepted in time.
    pub fn allocate_with_retry(
        &mut self,
        min: u16,
        max: u16,
        max_attempts: u32,
    ) -> Result<u16, PortError> {
        let leases = self.leases.clone();
        self.search(min, max, max_attempts, |port| {
            (!leases.is_leased(port)).then_some(port)
        })
    }

    /// Like [`allocate_with_retry`](Self::allocate_with_retry) but claims the
    /// accepted port in the shared registry.
    ///
    /// # Errors
    ///
    /// Same as [`allocate_with_retry`](Self::allocate_with_retry).
    pub fn lease_with_retry(
        &mut self,
        min: u16,
        max: u16,
        max_attempts: u32,
    ) -> Result<PortLease, PortError> {
        let leases = self.leases.clone();
        self.search(min, max, max_attempts, |port| leases.try_acquire(port))
    }

    /// Claims an explicitly requested port.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Leased`] if another workload holds it.
    pub fn lease_exact(&self, port: u16) -> Result<PortLease, PortError> {
        self.leases
            .try_acquire(port)
            .ok_or(PortError::Leased { port })
    }

    fn search<T>(
        &mut self,
        min: u16,
        max: u16,
        max_attempts: u32,
        mut accept: impl FnMut(u16) -> Option<T>,
    ) -> Result<T, PortError> {
        let mut attempted = HashSet::new();

        for attempt in 1..=max_attempts {
            let port = self.allocate(min, max)?;

            if !attempted.insert(port) {
                debug!("Port {} already tried (attempt {})", port, attempt);
                continue;
            }

            if self.probe_local_bind && !can_bind_locally(port) {
                debug!("Port {} is not bindable on this host", port);
                continue;
            }

            if let Some(accepted) = accept(port) {
                debug!("Selected host port {} after {} attempt(s)", port, attempt);
                return Ok(accepted);
            }
        }

        Err(PortError::Exhausted {
            attempts: max_attempts,
        })
    }
}

/// Returns a port in `[min, max]` from a fresh OS-seeded generator.
///
/// # Errors
///
/// Returns [`PortError::InvalidRange`] if `min >= max`.
pub fn allocate(min: u16, max: u16) -> Result<u16, PortError> {
    PortAllocator::new().allocate(min, max)
}

/// Retrying variant of [`allocate`]; see [`PortAllocator::allocate_with_retry`].
///
/// # Errors
///
/// Returns [`PortError::InvalidRange`] or [`PortError::Exhausted`].
pub fn allocate_with_retry(min: u16, max: u16, max_attempts: u32) -> Result<u16, PortError> {
    PortAllocator::new().allocate_with_retry(min, max, max_attempts)
}

fn can_bind_locally(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}
