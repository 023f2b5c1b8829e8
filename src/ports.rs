// ============================================================================
// File: src/ports.rs
// ----------------------------------------------------------------------------
// Process-wide host port allocator for instance access services.
//
// One port is claimed per instance at bind time and held until Destroy.
// The claim set is mutex-guarded so concurrent binds from different
// instance managers can never be handed the same port.
// ============================================================================

use std::collections::HashSet;
use std::net::TcpListener;
use std::ops::Range;
use std::sync::{Arc, Mutex, OnceLock};

use log::debug;
use rand::Rng;

use crate::error::{LifecycleError, LifecycleResult};

/// Default range candidate ports are drawn from.
pub const DEFAULT_PORT_RANGE: Range<u16> = 30000..40000;

/// How many random candidates to try before giving up.
const MAX_CLAIM_ATTEMPTS: usize = 128;

/// Allocator of host-side ports for instance access services.
#[derive(Debug)]
pub struct PortAllocator {
    range: Range<u16>,
    claimed: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    /// Create an allocator drawing from the default port range.
    pub fn new() -> Self {
        Self::with_range(DEFAULT_PORT_RANGE)
    }

    /// Create an allocator drawing from a custom port range.
    pub fn with_range(range: Range<u16>) -> Self {
        Self {
            range,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Claim an unused host port.
    ///
    /// Picks random candidates from the range, skipping ports already
    /// claimed by other live instances, and probes the remaining ones for
    /// bindability on loopback. The claim is recorded before the port is
    /// returned, so two concurrent calls can never observe the same port
    /// as free.
    pub fn claim(&self) -> LifecycleResult<u16> {
        let mut rng = rand::rng();

        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let candidate = rng.random_range(self.range.clone());

            let mut claimed = self
                .claimed
                .lock()
                .map_err(|e| LifecycleError::internal(format!("port registry poisoned: {e}")))?;

            if claimed.contains(&candidate) {
                continue;
            }

            if !probe_free(candidate) {
                continue;
            }

            claimed.insert(candidate);
            debug!("claimed host port {candidate}");
            return Ok(candidate);
        }

        Err(LifecycleError::internal(format!(
            "no free host port found in {}..{} after {} attempts",
            self.range.start, self.range.end, MAX_CLAIM_ATTEMPTS
        )))
    }

    /// Release a previously claimed port.
    ///
    /// Releasing a port that was never claimed is a no-op.
    pub fn release(&self, port: u16) {
        if let Ok(mut claimed) = self.claimed.lock()
            && claimed.remove(&port)
        {
            debug!("released host port {port}");
        }
    }

    /// Number of currently claimed ports.
    pub fn claimed_count(&self) -> usize {
        self.claimed.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that nothing on this host currently listens on the port.
fn probe_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Global allocator singleton
static GLOBAL_PORT_ALLOCATOR: OnceLock<Arc<PortAllocator>> = OnceLock::new();

/// Get a handle to the process-wide port allocator.
pub fn global_port_allocator() -> Arc<PortAllocator> {
    GLOBAL_PORT_ALLOCATOR
        .get_or_init(|| Arc::new(PortAllocator::new()))
        .clone()
}

/// Initialize the process-wide allocator with a custom range.
///
/// Fails if the global allocator was already initialized or used.
pub fn init_global_port_allocator(range: Range<u16>) -> Result<(), &'static str> {
    GLOBAL_PORT_ALLOCATOR
        .set(Arc::new(PortAllocator::with_range(range)))
        .map_err(|_| "global port allocator already initialized")
}
