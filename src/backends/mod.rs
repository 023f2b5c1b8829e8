// ============================================================================
// File: src/backends/mod.rs
// ----------------------------------------------------------------------------
// Backend driver trait and module organization.
//
// Provides a unified lifecycle contract over heterogeneous virtualization
// backends:
// - InstanceDriver trait for create/start/stop/reboot/destroy/access
// - One concrete driver per backend variant
// - Platform-conditional module loading
// ============================================================================

mod trait_def;
mod factory;

#[cfg(unix)]
pub(crate) mod uds_http;

pub use factory::{available_backends, create_driver};
pub use trait_def::InstanceDriver;

// Platform-conditional driver imports
#[cfg(unix)]
pub mod docker;
#[cfg(unix)]
pub use docker::{DockerConfig, DockerDriver};

#[cfg(target_os = "linux")]
pub mod hypervisor;
#[cfg(target_os = "linux")]
pub use hypervisor::{HypervisorConfig, HypervisorDriver};
