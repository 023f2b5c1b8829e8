// ============================================================================
// File: src/backends/factory.rs
// ----------------------------------------------------------------------------
// Driver factory functions
// ============================================================================

use std::sync::Arc;

use crate::backends::InstanceDriver;
use crate::error::{LifecycleError, LifecycleResult};
use crate::ports::PortAllocator;
use crate::template::BackendKind;

/// Create an unbound driver for the requested backend variant.
///
/// The allocator is passed in explicitly; drivers claim their host port
/// from it at bind time and release it on destroy.
///
/// # Arguments
/// * `kind` - Backend variant to drive
/// * `allocator` - Port allocator shared across instance managers
///
/// # Returns
/// Boxed driver with default backend configuration, or an error when the
/// variant is not available on this platform.
pub fn create_driver(
    kind: BackendKind,
    allocator: Arc<PortAllocator>,
) -> LifecycleResult<Box<dyn InstanceDriver>> {
    match kind {
        #[cfg(unix)]
        BackendKind::Container => Ok(Box::new(crate::backends::DockerDriver::new(
            crate::backends::DockerConfig::default(),
            allocator,
        ))),

        #[cfg(target_os = "linux")]
        BackendKind::Hypervisor => Ok(Box::new(crate::backends::HypervisorDriver::new(
            crate::backends::HypervisorConfig::default(),
            allocator,
        ))),

        // Platform-specific error handling
        #[cfg(not(unix))]
        BackendKind::Container => {
            let _ = allocator;
            Err(LifecycleError::backend_unavailable(
                "docker",
                "the container driver requires a Unix engine socket",
            ))
        }

        #[cfg(not(target_os = "linux"))]
        BackendKind::Hypervisor => {
            let _ = allocator;
            Err(LifecycleError::backend_unavailable(
                "firecracker",
                "the hypervisor driver is only available on Linux",
            ))
        }
    }
}

/// Backend variants available on the current platform.
pub fn available_backends() -> Vec<BackendKind> {
    let mut kinds = Vec::new();

    #[cfg(unix)]
    kinds.push(BackendKind::Container);

    #[cfg(target_os = "linux")]
    kinds.push(BackendKind::Hypervisor);

    kinds
}
