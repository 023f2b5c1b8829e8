// ============================================================================
// File: src/lib.rs
// ----------------------------------------------------------------------------
// berth: compute instance lifecycle management over pluggable
// virtualization backends.
// ============================================================================

//! Provision, control and tear down compute instances on a local host,
//! independent of the virtualization technology underneath.
//!
//! An instance is described once by a [`Template`] (image, quotas,
//! access port, backend choice) and then driven through a uniform
//! lifecycle: create, start, stop, reboot, destroy. Two backends are
//! built in: a container engine reached over its Unix socket, and a
//! micro-VM hypervisor configured over its API socket.
//!
//! ```no_run
//! use berth::{BackendKind, InstanceManager, Template};
//!
//! # async fn provision() -> berth::LifecycleResult<()> {
//! let template = Template::new("node-1", "ubuntu:22.04", BackendKind::Container)
//!     .with_cpu_cores(2)
//!     .with_memory_gib(4);
//!
//! let manager = InstanceManager::for_template(template)?;
//! manager.provision_and_grant_access("ssh-ed25519 AAAA... user@host").await?;
//!
//! println!("instance reachable at {}", manager.access_address()?);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod error;
pub mod instance_manager;
pub mod ports;
pub mod status;
pub mod template;

// Primary public API
pub use backends::{InstanceDriver, available_backends, create_driver};
pub use error::{LifecycleError, LifecycleResult};
pub use instance_manager::InstanceManager;
pub use ports::{PortAllocator, global_port_allocator, init_global_port_allocator};
pub use status::{AccessAddress, Phase, Status};
pub use template::{BackendKind, Template};
