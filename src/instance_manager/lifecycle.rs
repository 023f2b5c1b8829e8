// ============================================================================
// File: src/instance_manager/lifecycle.rs
// ----------------------------------------------------------------------------
// Lifecycle operations delegated to the bound driver:
// - Single-step transitions (create, start, stop, reboot, destroy)
// - Credential injection into the running instance
// - Composite provisioning with readiness polling
// ============================================================================

use log::{error, info};

use crate::error::{LifecycleError, LifecycleResult};

use super::InstanceManager;

impl InstanceManager {
    /// Create the instance in Stopped phase.
    ///
    /// Pulls the image if the backend does not have it, replaces any
    /// pre-existing instance with the same name, and applies the
    /// template's quotas and port binding.
    pub async fn create(&self) -> LifecycleResult<()> {
        info!("creating instance '{}'", self.template.name);
        self.driver.create().await.inspect_err(|e| {
            error!("failed to create instance '{}': {e}", self.template.name);
        })
    }

    /// Start the stopped instance.
    pub async fn start(&self) -> LifecycleResult<()> {
        info!("starting instance '{}'", self.template.name);
        self.driver.start().await.inspect_err(|e| {
            error!("failed to start instance '{}': {e}", self.template.name);
        })
    }

    /// Stop the running instance gracefully.
    pub async fn stop(&self) -> LifecycleResult<()> {
        info!("stopping instance '{}'", self.template.name);
        self.driver.stop().await.inspect_err(|e| {
            error!("failed to stop instance '{}': {e}", self.template.name);
        })
    }

    /// Alias for [`stop`](Self::stop); the instance survives and can be
    /// started again.
    pub async fn shutdown(&self) -> LifecycleResult<()> {
        self.stop().await
    }

    /// Restart the instance, preserving its identity.
    pub async fn reboot(&self) -> LifecycleResult<()> {
        info!("rebooting instance '{}'", self.template.name);
        self.driver.reboot().await.inspect_err(|e| {
            error!("failed to reboot instance '{}': {e}", self.template.name);
        })
    }

    /// Forcefully remove the instance.
    pub async fn destroy(&self) -> LifecycleResult<()> {
        info!("destroying instance '{}'", self.template.name);
        self.driver.destroy().await.inspect_err(|e| {
            error!("failed to destroy instance '{}': {e}", self.template.name);
        })
    }

    /// Write an access credential into the running instance.
    pub async fn inject_access_credential(&self, credential: &str) -> LifecycleResult<()> {
        info!(
            "injecting access credential into instance '{}'",
            self.template.name
        );
        self.driver
            .inject_access_credential(credential)
            .await
            .inspect_err(|e| {
                error!(
                    "failed to inject credential into instance '{}': {e}",
                    self.template.name
                );
            })
    }

    /// Create and start the instance in one step.
    ///
    /// No rollback on failure: a created instance stays created if the
    /// subsequent start fails, so the caller can retry the start alone.
    pub async fn provision(&self) -> LifecycleResult<()> {
        self.create().await?;
        self.start().await
    }

    /// Poll status until the instance reports Running.
    ///
    /// Polls at the configured interval until the deadline; exceeding it
    /// yields `ProvisioningTimeout`.
    pub async fn wait_until_running(&self) -> LifecycleResult<()> {
        let wait = tokio::time::timeout(self.max_wait, async {
            loop {
                let status = self.driver.status().await?;
                if status.is_running() {
                    return Ok(());
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        });

        match wait.await {
            Ok(result) => result,
            Err(_) => Err(LifecycleError::ProvisioningTimeout {
                instance: self.template.name.clone(),
                waited_secs: self.max_wait.as_secs(),
            }),
        }
    }

    /// Provision the instance and grant access with the given credential.
    ///
    /// Creates and starts the instance, waits for it to report Running,
    /// then writes the credential through the backend's remote channel.
    pub async fn provision_and_grant_access(&self, credential: &str) -> LifecycleResult<()> {
        self.provision().await?;
        self.wait_until_running().await?;
        self.inject_access_credential(credential).await?;

        info!(
            "instance '{}' provisioned and reachable at {}",
            self.template.name,
            self.driver.access_address()?
        );
        Ok(())
    }
}
