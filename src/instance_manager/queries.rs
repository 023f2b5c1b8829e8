// ============================================================================
// File: src/instance_manager/queries.rs
// ----------------------------------------------------------------------------
// Read-only queries against the bound driver.
// ============================================================================

use crate::error::LifecycleResult;
use crate::status::{AccessAddress, Status};
use crate::template::{BackendKind, Template};

use super::InstanceManager;

impl InstanceManager {
    /// Current phase and identity of the instance.
    ///
    /// An instance that was never created (or was destroyed) reports
    /// `Phase::Absent` without an error.
    pub async fn status(&self) -> LifecycleResult<Status> {
        self.driver.status().await
    }

    /// Externally reachable address of the instance's access service.
    pub fn access_address(&self) -> LifecycleResult<AccessAddress> {
        self.driver.access_address()
    }

    /// Template this manager was bound with.
    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Backend variant hosting the instance.
    pub fn backend_kind(&self) -> BackendKind {
        self.driver.backend_kind()
    }
}
