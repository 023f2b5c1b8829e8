// ============================================================================
// File: src/backends/trait_def.rs
// ----------------------------------------------------------------------------
// InstanceDriver trait definition
// ============================================================================

use async_trait::async_trait;

use crate::error::LifecycleResult;
use crate::status::{AccessAddress, Status};
use crate::template::{BackendKind, Template};

/// Lifecycle contract every virtualization backend implements.
///
/// One driver instance manages exactly one instance, identified by the
/// template bound via [`bind`](InstanceDriver::bind). The backend is the
/// authority on instance state: drivers re-query it on every `status` call
/// and never trust a cached flag.
///
/// State machine:
/// `Absent --create--> Stopped --start--> Running --stop--> Stopped
/// --destroy--> Absent`, with `reboot` restarting any existing instance.
/// Operations invoked outside their source phases fail with
/// `InvalidState`/`InvalidIdentity` and mutate nothing.
#[async_trait]
pub trait InstanceDriver: Send + Sync + std::fmt::Debug {
    /// Associate a template with this driver.
    ///
    /// Claims a host port for the access service and computes the
    /// backend-facing name from the template name. Must be called exactly
    /// once before any other operation.
    fn bind(&mut self, template: &Template) -> LifecycleResult<()>;

    /// Query the backend for the bound instance.
    ///
    /// Returns `Phase::Absent` with no error when nothing matches the
    /// bound name; that is a normal outcome, not a failure.
    async fn status(&self) -> LifecycleResult<Status>;

    /// Create the instance.
    ///
    /// Ensures the image is present (pulling it if absent), removes any
    /// pre-existing instance with the same bound name, then creates a
    /// fresh one with the template's quotas and the claimed port binding.
    async fn create(&self) -> LifecycleResult<()>;

    /// Transition `Stopped -> Running`.
    async fn start(&self) -> LifecycleResult<()>;

    /// Transition `Running -> Stopped`, with a bounded grace period before
    /// forceful termination.
    async fn stop(&self) -> LifecycleResult<()>;

    /// Restart an existing instance regardless of phase, preserving its
    /// identity.
    async fn reboot(&self) -> LifecycleResult<()>;

    /// Forcefully remove the instance and clear its identity.
    async fn destroy(&self) -> LifecycleResult<()>;

    /// Write an access credential (public key material) into the running
    /// instance through the backend's remote-execution channel.
    ///
    /// The credential is untrusted input and must never be interpolated
    /// into shell text.
    async fn inject_access_credential(&self, credential: &str) -> LifecycleResult<()>;

    /// Externally reachable address of the instance's access service.
    fn access_address(&self) -> LifecycleResult<AccessAddress>;

    /// Which backend variant this driver speaks to.
    fn backend_kind(&self) -> BackendKind;
}
