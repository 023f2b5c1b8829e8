// ============================================================================
// File: src/template.rs
// ----------------------------------------------------------------------------
// Immutable instance templates and backend selection.
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, LifecycleResult};

/// Upper bound on the memory quota in GiB. The byte conversion handed to
/// backends must stay well within `i64`.
pub const MAX_MEMORY_GIB: u64 = 4096;

/// Which virtualization backend hosts the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Container engine (Docker-compatible, local Unix socket).
    Container,
    /// Micro-VM hypervisor (Firecracker).
    Hypervisor,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Container => f.write_str("container"),
            BackendKind::Hypervisor => f.write_str("hypervisor"),
        }
    }
}

/// Immutable description of the instance to create.
///
/// Built by the caller before provisioning and read-only thereafter. The
/// backend kind is fixed once the template is bound to a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Instance name, unique per active instance.
    pub name: String,

    /// Image reference. `name:tag` for containers, an image name resolved
    /// under the hypervisor image root for micro-VMs.
    pub image: String,

    /// CPU quota in cores.
    pub cpu_cores: u32,

    /// Memory quota in GiB.
    pub memory_gib: u64,

    /// Disk quota in GiB.
    pub disk_gib: u64,

    /// Instance-side port of the access service (SSH by convention).
    pub access_port: u16,

    /// Backend that will host the instance.
    pub backend: BackendKind,
}

impl Template {
    /// Create a template with default quotas (1 core, 1 GiB memory,
    /// 10 GiB disk, SSH access port).
    pub fn new<N: Into<String>, I: Into<String>>(name: N, image: I, backend: BackendKind) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            cpu_cores: 1,
            memory_gib: 1,
            disk_gib: 10,
            access_port: 22,
            backend,
        }
    }

    /// Set the CPU quota.
    pub fn with_cpu_cores(mut self, cores: u32) -> Self {
        self.cpu_cores = cores;
        self
    }

    /// Set the memory quota.
    pub fn with_memory_gib(mut self, gib: u64) -> Self {
        self.memory_gib = gib;
        self
    }

    /// Set the disk quota.
    pub fn with_disk_gib(mut self, gib: u64) -> Self {
        self.disk_gib = gib;
        self
    }

    /// Set the instance-side access port.
    pub fn with_access_port(mut self, port: u16) -> Self {
        self.access_port = port;
        self
    }

    /// Validate the template before binding it to a driver.
    pub fn validate(&self) -> LifecycleResult<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(LifecycleError::internal(format!(
                "invalid template name '{}': expected [A-Za-z0-9_-]+",
                self.name
            )));
        }

        match self.backend {
            BackendKind::Container => {
                if !is_valid_image_reference(&self.image) {
                    return Err(LifecycleError::internal(format!(
                        "invalid image reference '{}': expected 'name:tag'",
                        self.image
                    )));
                }
            }
            BackendKind::Hypervisor => {
                if self.image.is_empty() {
                    return Err(LifecycleError::internal(
                        "hypervisor templates require an image name",
                    ));
                }
            }
        }

        if self.cpu_cores == 0 || self.memory_gib == 0 {
            return Err(LifecycleError::internal(
                "cpu and memory quotas must be non-zero",
            ));
        }

        if self.memory_gib > MAX_MEMORY_GIB {
            return Err(LifecycleError::internal(format!(
                "memory quota of {} GiB exceeds the {MAX_MEMORY_GIB} GiB limit",
                self.memory_gib
            )));
        }

        Ok(())
    }
}

/// Validate a container image reference of the form `name:tag`.
fn is_valid_image_reference(image: &str) -> bool {
    let Some((name, tag)) = image.split_once(':') else {
        return false;
    };

    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '/' || c == '-' || c == '_' || c == '.')
    {
        return false;
    }

    !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == '_')
}
