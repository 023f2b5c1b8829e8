// ============================================================================
// File: src/instance_manager/mod.rs
// ----------------------------------------------------------------------------
// Backend-agnostic orchestration of a single instance lifecycle.
//
// The manager owns one bound driver and one template, and provides:
// - Lifecycle operations delegated to the driver with boundary logging
// - Composite provisioning (create + start + readiness + credential)
// - Readiness polling with a bounded deadline
// ============================================================================

use std::time::Duration;

use crate::backends::{InstanceDriver, create_driver};
use crate::error::LifecycleResult;
use crate::ports::global_port_allocator;
use crate::template::Template;

// Submodules
mod lifecycle;
mod queries;

#[cfg(test)]
mod tests;

/// Default interval between readiness polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default deadline for an instance to reach Running after start.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(120);

/// Orchestrates the lifecycle of one instance through a bound driver.
///
/// The manager never caches instance state; every decision is made
/// against a fresh status query so external changes to the backend are
/// always observed.
#[derive(Debug)]
pub struct InstanceManager {
    /// Bound driver the manager delegates to
    pub(crate) driver: Box<dyn InstanceDriver>,

    /// Template the driver was bound with
    pub(crate) template: Template,

    /// Interval between readiness polls
    pub(crate) poll_interval: Duration,

    /// Deadline for readiness after start
    pub(crate) max_wait: Duration,
}

impl InstanceManager {
    /// Bind a template to a caller-supplied driver.
    ///
    /// Validates the template, binds the driver (claiming a host port),
    /// and returns a manager ready for lifecycle operations.
    ///
    /// # Arguments
    /// * `template` - Instance description to bind
    /// * `driver` - Unbound driver for the template's backend
    ///
    /// # Returns
    /// Manager owning the bound driver, or the validation/bind error
    pub fn bind(template: Template, mut driver: Box<dyn InstanceDriver>) -> LifecycleResult<Self> {
        template.validate()?;
        driver.bind(&template)?;

        Ok(Self {
            driver,
            template,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        })
    }

    /// Bind a template to a freshly constructed driver for its backend.
    ///
    /// Drivers are built with default backend configuration and share the
    /// process-wide port allocator.
    pub fn for_template(template: Template) -> LifecycleResult<Self> {
        let driver = create_driver(template.backend, global_port_allocator())?;
        Self::bind(template, driver)
    }

    /// Override the readiness polling parameters.
    pub fn with_readiness(mut self, poll_interval: Duration, max_wait: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.max_wait = max_wait;
        self
    }
}
