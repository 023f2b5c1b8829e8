// ============================================================================
// File: src/backends/hypervisor/config.rs
// ----------------------------------------------------------------------------
// Hypervisor driver configuration and installation checks.
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, LifecycleResult};

/// Hypervisor driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypervisorConfig {
    /// Path to the Firecracker binary.
    pub binary_path: PathBuf,

    /// Path to the guest kernel image.
    pub kernel_path: PathBuf,

    /// Directory holding base root filesystems, one `<image>.ext4` per
    /// image reference.
    pub image_root: PathBuf,

    /// Directory holding per-instance state (copied rootfs, identity,
    /// API socket).
    pub state_root: PathBuf,

    /// Kernel boot arguments.
    pub boot_args: String,

    /// Grace period between the guest shutdown signal and a forced kill.
    pub stop_grace: Duration,

    /// Guest network attachment.
    pub network: NetworkConfig,

    /// Credentials used to reach the guest for provisioning commands.
    pub ssh: SshProvisioning,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("/usr/bin/firecracker"),
            kernel_path: PathBuf::from("/var/lib/berth/vmlinux.bin"),
            image_root: PathBuf::from("/var/lib/berth/images"),
            state_root: PathBuf::from("/var/lib/berth/vms"),
            boot_args: "console=ttyS0 reboot=k panic=1 pci=off".to_string(),
            stop_grace: Duration::from_secs(3),
            network: NetworkConfig::default(),
            ssh: SshProvisioning::default(),
        }
    }
}

/// Guest network attachment for a micro-VM.
///
/// The tap device must be pre-provisioned on the host (up, addressed on
/// the same subnet as `guest_addr`). The driver attaches it to the guest
/// NIC at boot and forwards the instance's claimed host port to
/// `guest_addr` on the template's access port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Host tap device backing the guest NIC.
    pub host_interface: String,

    /// MAC address assigned to the guest NIC.
    pub guest_mac: String,

    /// Address the guest is reachable at over the tap network.
    pub guest_addr: IpAddr,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_interface: "tap0".to_string(),
            guest_mac: "AA:FC:00:00:00:01".to_string(),
            guest_addr: IpAddr::V4(Ipv4Addr::new(172, 16, 0, 2)),
        }
    }
}

impl HypervisorConfig {
    /// Verify the hypervisor installation before starting a VM.
    pub fn verify_installation(&self) -> LifecycleResult<()> {
        if !self.binary_path.exists() {
            return Err(LifecycleError::backend_unavailable(
                "firecracker",
                format!("hypervisor binary not found at {}", self.binary_path.display()),
            ));
        }

        if !self.kernel_path.exists() {
            return Err(LifecycleError::backend_unavailable(
                "firecracker",
                format!("kernel image not found at {}", self.kernel_path.display()),
            ));
        }

        if !Path::new("/dev/kvm").exists() {
            return Err(LifecycleError::backend_unavailable(
                "firecracker",
                "KVM device not available (/dev/kvm)",
            ));
        }

        Ok(())
    }
}

/// SSH identity used for guest provisioning commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshProvisioning {
    /// Guest user the provisioning channel authenticates as.
    pub username: String,

    /// Authentication method.
    pub auth: SshAuth,
}

impl Default for SshProvisioning {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            auth: SshAuth::Agent,
        }
    }
}

/// SSH authentication method for the provisioning channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SshAuth {
    /// Authenticate via the local SSH agent.
    Agent,
    /// Authenticate with a private key file.
    Key(PathBuf),
    /// Authenticate with a password baked into the base image.
    Password(String),
}
