// ============================================================================
// File: src/backends/hypervisor/mod.rs
// ----------------------------------------------------------------------------
// Micro-VM hypervisor driver (Firecracker).
//
// Each instance owns a state directory under the configured state root:
// a private copy of the base root filesystem, an identity file, and the
// hypervisor API socket. The VM process is a child of this process and
// is configured over its API socket at start, including a tap-backed
// guest NIC; the claimed host port is relayed to the guest's access
// service for as long as the VM runs.
// ============================================================================

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use rand::Rng;

use crate::backends::InstanceDriver;
use crate::error::{LifecycleError, LifecycleResult};
use crate::ports::PortAllocator;
use crate::status::{AccessAddress, Phase, Status};
use crate::template::{BackendKind, Template};

mod api;
mod config;
mod forward;
mod ssh;

pub use config::{HypervisorConfig, NetworkConfig, SshAuth, SshProvisioning};

use api::{BootSource, Drive, InstanceActionInfo, MachineConfiguration, NetworkInterface};
use forward::PortForward;

const BACKEND: &str = "firecracker";
const NAME_PREFIX: &str = "berth-";

const ID_FILE: &str = "instance-id";
const ROOTFS_FILE: &str = "rootfs.ext4";
const SOCKET_FILE: &str = "firecracker.sock";

/// How long to wait for the API socket after spawning the VM process.
const SOCKET_WAIT_ATTEMPTS: u32 = 10;
const SOCKET_WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// Driver hosting instances as Firecracker micro-VMs.
#[derive(Debug)]
pub struct HypervisorDriver {
    config: HypervisorConfig,
    allocator: Arc<PortAllocator>,
    bound: Option<Binding>,

    /// Handle of the VM process, present while this driver believes the
    /// VM is up. Status still re-checks the process on every query.
    child: Mutex<Option<Child>>,

    /// Relay from the claimed host port to the guest's access service,
    /// alive while the VM runs.
    forward: Mutex<Option<PortForward>>,
}

#[derive(Debug)]
struct Binding {
    template: Template,
    vm_name: String,
    host_port: u16,
}

impl HypervisorDriver {
    /// Create an unbound driver with the given hypervisor configuration.
    pub fn new(config: HypervisorConfig, allocator: Arc<PortAllocator>) -> Self {
        Self {
            config,
            allocator,
            bound: None,
            child: Mutex::new(None),
            forward: Mutex::new(None),
        }
    }

    fn binding(&self, operation: &'static str) -> LifecycleResult<&Binding> {
        self.bound
            .as_ref()
            .ok_or(LifecycleError::Unbound { operation })
    }

    fn state_dir(&self, binding: &Binding) -> PathBuf {
        self.config.state_root.join(&binding.vm_name)
    }

    fn rootfs_path(&self, binding: &Binding) -> PathBuf {
        self.state_dir(binding).join(ROOTFS_FILE)
    }

    fn id_path(&self, binding: &Binding) -> PathBuf {
        self.state_dir(binding).join(ID_FILE)
    }

    fn socket_path(&self, binding: &Binding) -> PathBuf {
        self.state_dir(binding).join(SOCKET_FILE)
    }

    fn source_image(&self, template: &Template) -> PathBuf {
        self.config
            .image_root
            .join(format!("{}.ext4", template.image))
    }

    fn lock_child(&self) -> LifecycleResult<std::sync::MutexGuard<'_, Option<Child>>> {
        self.child
            .lock()
            .map_err(|e| LifecycleError::internal(format!("VM handle lock poisoned: {e}")))
    }

    /// Best-effort kill of the VM process, if one is tracked.
    fn kill_vm_process(&self) -> LifecycleResult<()> {
        let mut guard = self.lock_child()?;
        if let Some(mut child) = guard.take() {
            if let Err(e) = child.kill() {
                warn!("failed to kill VM process: {e}");
            }
            let _ = child.wait();
        }
        Ok(())
    }

    /// Tear down the host-port relay, if one is running.
    fn stop_forward(&self) {
        if let Ok(mut guard) = self.forward.lock()
            && let Some(forward) = guard.take()
        {
            forward.stop();
        }
    }

    fn query_status(&self, binding: &Binding) -> LifecycleResult<Status> {
        let id_path = self.id_path(binding);
        if !id_path.exists() {
            return Ok(Status::absent());
        }

        let id = fs::read_to_string(&id_path)
            .map_err(|e| LifecycleError::internal(format!("failed to read instance id: {e}")))?
            .trim()
            .to_string();

        let mut guard = self.lock_child()?;
        let phase = match guard.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => Phase::Running,
                Ok(Some(_)) => {
                    // The VM exited on its own; drop the stale handle.
                    *guard = None;
                    Phase::Stopped
                }
                Err(e) => {
                    return Err(LifecycleError::internal(format!(
                        "failed to query VM process: {e}"
                    )));
                }
            },
            None => Phase::Stopped,
        };

        Ok(Status::existing(phase, id))
    }

    /// Spawn and configure the VM process, then trigger the boot.
    async fn boot(&self, binding: &Binding) -> LifecycleResult<()> {
        self.config.verify_installation()?;

        let socket_path = self.socket_path(binding);
        if socket_path.exists()
            && let Err(e) = fs::remove_file(&socket_path)
        {
            warn!("failed to remove stale API socket: {e}");
        }

        let child = Command::new(&self.config.binary_path)
            .arg("--api-sock")
            .arg(&socket_path)
            .arg("--id")
            .arg(&binding.vm_name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                LifecycleError::backend_unavailable(
                    BACKEND,
                    format!("failed to start hypervisor process: {e}"),
                )
            })?;

        let mut attempts = 0;
        while !socket_path.exists() && attempts < SOCKET_WAIT_ATTEMPTS {
            tokio::time::sleep(SOCKET_WAIT_INTERVAL).await;
            attempts += 1;
        }

        *self.lock_child()? = Some(child);

        if !socket_path.exists() {
            self.kill_vm_process()?;
            return Err(LifecycleError::backend_unavailable(
                BACKEND,
                "hypervisor API socket was not created",
            ));
        }

        if let Err(e) = self.configure_vm(binding).await {
            self.kill_vm_process()?;
            return Err(e);
        }

        // Publish the guest's access service on the claimed host port.
        let guest = SocketAddr::new(
            self.config.network.guest_addr,
            binding.template.access_port,
        );
        match forward::spawn(binding.host_port, guest).await {
            Ok(forward) => {
                if let Ok(mut guard) = self.forward.lock() {
                    *guard = Some(forward);
                }
            }
            Err(e) => {
                self.kill_vm_process()?;
                return Err(LifecycleError::backend_unavailable(
                    BACKEND,
                    format!("{e:#}"),
                ));
            }
        }

        info!("VM {} booted", binding.vm_name);
        Ok(())
    }

    async fn configure_vm(&self, binding: &Binding) -> LifecycleResult<()> {
        let socket_path = self.socket_path(binding);
        let template = &binding.template;
        let unavailable = |e: anyhow::Error| {
            LifecycleError::backend_unavailable(BACKEND, format!("{e:#}"))
        };

        let boot_source = BootSource {
            kernel_image_path: self.config.kernel_path.display().to_string(),
            boot_args: Some(self.config.boot_args.clone()),
        };
        api::api_put(&socket_path, "boot-source", &boot_source)
            .await
            .map_err(unavailable)?;

        let machine_config = MachineConfiguration {
            vcpu_count: template.cpu_cores,
            mem_size_mib: template.memory_gib * 1024,
            smt: Some(false),
        };
        api::api_put(&socket_path, "machine-config", &machine_config)
            .await
            .map_err(unavailable)?;

        let drive = Drive {
            drive_id: "rootfs".to_string(),
            path_on_host: self.rootfs_path(binding).display().to_string(),
            is_root_device: true,
            is_read_only: Some(false),
        };
        api::api_put(&socket_path, "drives/rootfs", &drive)
            .await
            .map_err(unavailable)?;

        let network = &self.config.network;
        let interface = NetworkInterface {
            iface_id: "eth0".to_string(),
            host_dev_name: network.host_interface.clone(),
            guest_mac: network.guest_mac.clone(),
        };
        api::api_put(&socket_path, "network-interfaces/eth0", &interface)
            .await
            .map_err(unavailable)?;

        let start_action = InstanceActionInfo {
            action_type: "InstanceStart".to_string(),
        };
        api::api_put(&socket_path, "actions", &start_action)
            .await
            .map_err(unavailable)?;

        Ok(())
    }

    /// Ask the guest to shut down, then kill it after the grace period.
    async fn shutdown_vm(&self, binding: &Binding) -> LifecycleResult<()> {
        self.stop_forward();
        let socket_path = self.socket_path(binding);

        let shutdown_action = InstanceActionInfo {
            action_type: "SendCtrlAltDel".to_string(),
        };
        if let Err(e) = api::api_put(&socket_path, "actions", &shutdown_action).await {
            warn!("failed to send guest shutdown request: {e}");
        }

        let deadline = tokio::time::Instant::now() + self.config.stop_grace;
        loop {
            {
                let mut guard = self.lock_child()?;
                match guard.as_mut() {
                    Some(child) => {
                        if let Ok(Some(_)) = child.try_wait() {
                            *guard = None;
                            break;
                        }
                    }
                    None => break,
                }
            }

            if tokio::time::Instant::now() >= deadline {
                self.kill_vm_process()?;
                break;
            }

            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        if socket_path.exists()
            && let Err(e) = fs::remove_file(&socket_path)
        {
            warn!("failed to remove API socket: {e}");
        }

        Ok(())
    }
}

#[async_trait]
impl InstanceDriver for HypervisorDriver {
    fn bind(&mut self, template: &Template) -> LifecycleResult<()> {
        if self.bound.is_some() {
            return Err(LifecycleError::internal(
                "driver is already bound to a template",
            ));
        }

        let host_port = self.allocator.claim()?;
        self.bound = Some(Binding {
            vm_name: format!("{NAME_PREFIX}{}", template.name),
            template: template.clone(),
            host_port,
        });
        Ok(())
    }

    async fn status(&self) -> LifecycleResult<Status> {
        let binding = self.binding("query")?;
        self.query_status(binding)
    }

    async fn create(&self) -> LifecycleResult<()> {
        let binding = self.binding("create")?;
        let template = &binding.template;

        // "Pulling" here is resolving the base rootfs under the image root;
        // there is no registry to fetch from.
        let source = self.source_image(template);
        if !source.exists() {
            return Err(LifecycleError::ImagePullFailed {
                image: template.image.clone(),
                reason: format!("no base rootfs at {}", source.display()),
            });
        }

        // Idempotent overwrite of any leftover instance with this name.
        self.stop_forward();
        self.kill_vm_process()?;
        let state_dir = self.state_dir(binding);
        if state_dir.exists() {
            info!("removing pre-existing VM state for {}", binding.vm_name);
            fs::remove_dir_all(&state_dir)
                .map_err(|e| LifecycleError::internal(format!("failed to clear VM state: {e}")))?;
        }

        fs::create_dir_all(&state_dir)
            .map_err(|e| LifecycleError::internal(format!("failed to create VM state dir: {e}")))?;

        tokio::fs::copy(&source, self.rootfs_path(binding))
            .await
            .map_err(|e| LifecycleError::internal(format!("failed to copy rootfs: {e}")))?;

        let id = format!("fc-{:016x}", rand::rng().random::<u64>());
        fs::write(self.id_path(binding), &id)
            .map_err(|e| LifecycleError::internal(format!("failed to write instance id: {e}")))?;

        info!("VM {} created for instance {} ({id})", binding.vm_name, template.name);
        Ok(())
    }

    async fn start(&self) -> LifecycleResult<()> {
        let binding = self.binding("start")?;
        let status = self.query_status(binding)?;

        if status.phase != Phase::Stopped {
            return Err(LifecycleError::InvalidState {
                operation: "start",
                instance: binding.template.name.clone(),
                phase: status.phase,
            });
        }

        self.boot(binding).await
    }

    async fn stop(&self) -> LifecycleResult<()> {
        let binding = self.binding("stop")?;
        let status = self.query_status(binding)?;

        if status.phase != Phase::Running {
            return Err(LifecycleError::InvalidState {
                operation: "stop",
                instance: binding.template.name.clone(),
                phase: status.phase,
            });
        }

        self.shutdown_vm(binding).await?;
        info!("VM {} stopped", binding.vm_name);
        Ok(())
    }

    async fn reboot(&self) -> LifecycleResult<()> {
        let binding = self.binding("reboot")?;
        let status = self.query_status(binding)?;

        match status.phase {
            Phase::Absent => Err(LifecycleError::InvalidIdentity {
                operation: "reboot",
                instance: binding.template.name.clone(),
            }),
            Phase::Running => {
                self.shutdown_vm(binding).await?;
                self.boot(binding).await
            }
            Phase::Stopped => self.boot(binding).await,
            phase => Err(LifecycleError::InvalidState {
                operation: "reboot",
                instance: binding.template.name.clone(),
                phase,
            }),
        }
    }

    async fn destroy(&self) -> LifecycleResult<()> {
        let binding = self.binding("destroy")?;
        let status = self.query_status(binding)?;

        if !status.exists() {
            return Err(LifecycleError::InvalidIdentity {
                operation: "destroy",
                instance: binding.template.name.clone(),
            });
        }

        self.stop_forward();
        self.kill_vm_process()?;

        let state_dir = self.state_dir(binding);
        fs::remove_dir_all(&state_dir)
            .map_err(|e| LifecycleError::internal(format!("failed to remove VM state: {e}")))?;

        self.allocator.release(binding.host_port);
        info!("VM {} destroyed", binding.vm_name);
        Ok(())
    }

    async fn inject_access_credential(&self, credential: &str) -> LifecycleResult<()> {
        let binding = self.binding("inject credential into")?;
        let status = self.query_status(binding)?;

        if status.phase != Phase::Running {
            return Err(LifecycleError::InvalidState {
                operation: "inject credential into",
                instance: binding.template.name.clone(),
                phase: status.phase,
            });
        }

        let ssh = self.config.ssh.clone();
        let host = "127.0.0.1".to_string();
        let port = binding.host_port;
        let credential = credential.to_string();
        let instance = binding.template.name.clone();

        // libssh2 is blocking; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            ssh::write_access_credential(&ssh, &host, port, &credential)
        })
        .await
        .map_err(|e| LifecycleError::internal(format!("credential injection task failed: {e}")))?
        .map_err(|e| LifecycleError::CredentialInjectionFailed {
            instance,
            reason: format!("{e:#}"),
        })
    }

    fn access_address(&self) -> LifecycleResult<AccessAddress> {
        let binding = self.binding("resolve access address for")?;

        // The claimed host port is relayed to the guest's access service
        // while the VM runs, so loopback is the published address.
        Ok(AccessAddress {
            host: "127.0.0.1".to_string(),
            port: binding.host_port,
        })
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::Hypervisor
    }
}

#[cfg(test)]
mod tests {
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    use super::*;

    fn test_config(tmp: &TempDir) -> HypervisorConfig {
        HypervisorConfig {
            binary_path: tmp.path().join("firecracker"),
            kernel_path: tmp.path().join("vmlinux.bin"),
            image_root: tmp.path().join("images"),
            state_root: tmp.path().join("vms"),
            ..HypervisorConfig::default()
        }
    }

    fn template() -> Template {
        Template::new("vm-1", "base", BackendKind::Hypervisor)
            .with_cpu_cores(2)
            .with_memory_gib(2)
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn bound_driver(tmp: &TempDir) -> HypervisorDriver {
        init_logging();
        tmp.child("images/base.ext4")
            .write_str("fake rootfs")
            .expect("failed to seed base image");

        let mut driver =
            HypervisorDriver::new(test_config(tmp), Arc::new(PortAllocator::new()));
        driver
            .bind(&template())
            .expect("bind should succeed in test");
        driver
    }

    #[tokio::test]
    async fn status_before_create_is_absent() {
        let tmp = TempDir::new().expect("tempdir");
        let driver = bound_driver(&tmp);

        let status = driver.status().await.expect("status should not error");
        assert_eq!(status.phase, Phase::Absent);
        assert!(!status.exists());
    }

    #[tokio::test]
    async fn create_copies_rootfs_and_assigns_identity() {
        let tmp = TempDir::new().expect("tempdir");
        let driver = bound_driver(&tmp);

        driver.create().await.expect("create should succeed");

        tmp.child("vms/berth-vm-1/rootfs.ext4")
            .assert("fake rootfs");

        let status = driver.status().await.expect("status after create");
        assert_eq!(status.phase, Phase::Stopped);
        assert!(status.id.starts_with("fc-"));
    }

    #[tokio::test]
    async fn create_is_idempotent_overwrite() {
        let tmp = TempDir::new().expect("tempdir");
        let driver = bound_driver(&tmp);

        driver.create().await.expect("first create");
        let first = driver.status().await.expect("status").id;

        driver.create().await.expect("second create");
        let second = driver.status().await.expect("status").id;

        // A fresh instance replaced the old one.
        assert_ne!(first, second);
        assert!(second.starts_with("fc-"));
    }

    #[tokio::test]
    async fn create_fails_without_base_image() {
        let tmp = TempDir::new().expect("tempdir");
        let mut driver =
            HypervisorDriver::new(test_config(&tmp), Arc::new(PortAllocator::new()));
        driver.bind(&template()).expect("bind");

        let result = driver.create().await;
        assert!(matches!(
            result,
            Err(LifecycleError::ImagePullFailed { .. })
        ));
    }

    #[tokio::test]
    async fn start_on_absent_is_invalid_state() {
        let tmp = TempDir::new().expect("tempdir");
        let driver = bound_driver(&tmp);

        let result = driver.start().await;
        assert!(matches!(
            result,
            Err(LifecycleError::InvalidState {
                phase: Phase::Absent,
                ..
            })
        ));

        // No instance appeared as a side effect.
        let status = driver.status().await.expect("status");
        assert_eq!(status.phase, Phase::Absent);
    }

    #[tokio::test]
    async fn start_without_hypervisor_is_backend_unavailable() {
        let tmp = TempDir::new().expect("tempdir");
        let driver = bound_driver(&tmp);
        driver.create().await.expect("create");

        let result = driver.start().await;
        assert!(matches!(
            result,
            Err(LifecycleError::BackendUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn stop_requires_running() {
        let tmp = TempDir::new().expect("tempdir");
        let driver = bound_driver(&tmp);
        driver.create().await.expect("create");

        let result = driver.stop().await;
        assert!(matches!(
            result,
            Err(LifecycleError::InvalidState {
                phase: Phase::Stopped,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn destroy_clears_state_and_identity() {
        let tmp = TempDir::new().expect("tempdir");
        let driver = bound_driver(&tmp);
        driver.create().await.expect("create");

        driver.destroy().await.expect("destroy");

        assert!(!tmp.path().join("vms/berth-vm-1").exists());
        let status = driver.status().await.expect("status after destroy");
        assert_eq!(status.phase, Phase::Absent);

        let again = driver.destroy().await;
        assert!(matches!(
            again,
            Err(LifecycleError::InvalidIdentity { .. })
        ));
    }

    #[tokio::test]
    async fn reboot_on_absent_is_invalid_identity() {
        let tmp = TempDir::new().expect("tempdir");
        let driver = bound_driver(&tmp);

        let result = driver.reboot().await;
        assert!(matches!(
            result,
            Err(LifecycleError::InvalidIdentity { .. })
        ));
    }

    #[tokio::test]
    async fn inject_requires_running() {
        let tmp = TempDir::new().expect("tempdir");
        let driver = bound_driver(&tmp);
        driver.create().await.expect("create");

        let result = driver.inject_access_credential("ssh-ed25519 AAA test").await;
        assert!(matches!(
            result,
            Err(LifecycleError::InvalidState {
                phase: Phase::Stopped,
                ..
            })
        ));
    }
}
