// ============================================================================
// File: src/backends/docker/mod.rs
// ----------------------------------------------------------------------------
// Container engine driver: lifecycle operations over the local engine API.
// ============================================================================

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

use crate::backends::InstanceDriver;
use crate::error::{LifecycleError, LifecycleResult};
use crate::ports::PortAllocator;
use crate::status::{AccessAddress, Phase, Status};
use crate::template::{BackendKind, Template};

mod api;
mod api_types;

use api_types::{CreateContainerRequest, EmptyObject, HostConfig, PortBinding};

const BACKEND: &str = "docker";

/// Prefix distinguishing instances managed here from unrelated containers.
const NAME_PREFIX: &str = "berth-";

const CREDENTIAL_DIR: &str = "/root/.ssh";
const CREDENTIAL_FILE: &str = "/root/.ssh/authorized_keys";

/// Container driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Engine API socket.
    pub socket_path: PathBuf,

    /// Engine API version prefix.
    pub api_version: String,

    /// Grace period granted before the engine force-kills on stop/restart.
    pub stop_grace: Duration,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/var/run/docker.sock"),
            api_version: "v1.41".to_string(),
            stop_grace: Duration::from_secs(3),
        }
    }
}

/// Driver for a Docker-compatible container engine on the local host.
///
/// The engine owns instance state; every operation re-queries it by the
/// bound container name instead of trusting anything remembered from a
/// previous call.
#[derive(Debug)]
pub struct DockerDriver {
    config: DockerConfig,
    allocator: Arc<PortAllocator>,
    bound: Option<Binding>,
}

#[derive(Debug)]
struct Binding {
    template: Template,
    container_name: String,
    host_port: u16,
}

/// Map an engine-reported container state onto the normalized phase.
///
/// Anything not explicitly recognized (including the engine's
/// `restarting` and `removing`) is surfaced as `Transitional` so callers
/// retry rather than misread an unknown state as terminal.
fn phase_from_state(state: &str) -> Phase {
    match state {
        "created" | "exited" | "dead" => Phase::Stopped,
        "running" => Phase::Running,
        "paused" => Phase::Paused,
        _ => Phase::Transitional,
    }
}

impl DockerDriver {
    /// Create an unbound driver against the given engine.
    pub fn new(config: DockerConfig, allocator: Arc<PortAllocator>) -> Self {
        Self {
            config,
            allocator,
            bound: None,
        }
    }

    fn binding(&self, operation: &'static str) -> LifecycleResult<&Binding> {
        self.bound
            .as_ref()
            .ok_or(LifecycleError::Unbound { operation })
    }

    fn unavailable(err: anyhow::Error) -> LifecycleError {
        LifecycleError::backend_unavailable(BACKEND, format!("{err:#}"))
    }

    async fn query_status(&self, binding: &Binding) -> LifecycleResult<Status> {
        let containers = api::list_containers_by_name(&self.config, &binding.container_name)
            .await
            .map_err(Self::unavailable)?;

        Ok(match containers.first() {
            Some(container) => {
                Status::existing(phase_from_state(&container.state), container.id.clone())
            }
            None => Status::absent(),
        })
    }

    fn create_request(&self, binding: &Binding) -> CreateContainerRequest {
        let template = &binding.template;
        let port_key = format!("{}/tcp", template.access_port);

        CreateContainerRequest {
            image: template.image.clone(),
            exposed_ports: HashMap::from([(port_key.clone(), EmptyObject {})]),
            host_config: HostConfig {
                memory: (template.memory_gib << 30) as i64,
                nano_cpus: i64::from(template.cpu_cores) * 1_000_000_000,
                port_bindings: HashMap::from([(
                    port_key,
                    vec![PortBinding {
                        host_port: binding.host_port.to_string(),
                    }],
                )]),
            },
        }
    }
}

#[async_trait]
impl InstanceDriver for DockerDriver {
    fn bind(&mut self, template: &Template) -> LifecycleResult<()> {
        if self.bound.is_some() {
            return Err(LifecycleError::internal(
                "driver is already bound to a template",
            ));
        }

        let host_port = self.allocator.claim()?;
        self.bound = Some(Binding {
            container_name: format!("{NAME_PREFIX}{}", template.name),
            template: template.clone(),
            host_port,
        });
        Ok(())
    }

    async fn status(&self) -> LifecycleResult<Status> {
        let binding = self.binding("query")?;
        self.query_status(binding).await
    }

    async fn create(&self) -> LifecycleResult<()> {
        let binding = self.binding("create")?;
        let template = &binding.template;

        let present = api::image_present(&self.config, &template.image)
            .await
            .map_err(Self::unavailable)?;

        if !present {
            info!("pulling image {} for instance {}", template.image, template.name);
            api::pull_image(&self.config, &template.image)
                .await
                .map_err(|e| LifecycleError::ImagePullFailed {
                    image: template.image.clone(),
                    reason: format!("{e:#}"),
                })?;
        }

        // Idempotent overwrite: a leftover container with the bound name is
        // replaced by one carrying the current template's quotas.
        let status = self.query_status(binding).await?;
        if status.exists() {
            info!(
                "removing pre-existing container {} for instance {}",
                status.id, template.name
            );
            api::remove_container(&self.config, &status.id)
                .await
                .map_err(Self::unavailable)?;
        }

        let request = self.create_request(binding);
        let id = api::create_container(&self.config, &binding.container_name, &request)
            .await
            .map_err(Self::unavailable)?;

        info!("container {} created for instance {}", id, template.name);
        Ok(())
    }

    async fn start(&self) -> LifecycleResult<()> {
        let binding = self.binding("start")?;
        let status = self.query_status(binding).await?;

        if status.phase != Phase::Stopped {
            return Err(LifecycleError::InvalidState {
                operation: "start",
                instance: binding.template.name.clone(),
                phase: status.phase,
            });
        }

        api::start_container(&self.config, &status.id)
            .await
            .map_err(Self::unavailable)?;

        info!("container {} started", status.id);
        Ok(())
    }

    async fn stop(&self) -> LifecycleResult<()> {
        let binding = self.binding("stop")?;
        let status = self.query_status(binding).await?;

        if status.phase != Phase::Running {
            return Err(LifecycleError::InvalidState {
                operation: "stop",
                instance: binding.template.name.clone(),
                phase: status.phase,
            });
        }

        api::stop_container(&self.config, &status.id, self.config.stop_grace.as_secs())
            .await
            .map_err(Self::unavailable)?;

        info!("container {} stopped", status.id);
        Ok(())
    }

    async fn reboot(&self) -> LifecycleResult<()> {
        let binding = self.binding("reboot")?;
        let status = self.query_status(binding).await?;

        if !status.exists() {
            return Err(LifecycleError::InvalidIdentity {
                operation: "reboot",
                instance: binding.template.name.clone(),
            });
        }

        api::restart_container(&self.config, &status.id, self.config.stop_grace.as_secs())
            .await
            .map_err(Self::unavailable)?;

        info!("container {} restarted", status.id);
        Ok(())
    }

    async fn destroy(&self) -> LifecycleResult<()> {
        let binding = self.binding("destroy")?;
        let status = self.query_status(binding).await?;

        if !status.exists() {
            return Err(LifecycleError::InvalidIdentity {
                operation: "destroy",
                instance: binding.template.name.clone(),
            });
        }

        api::remove_container(&self.config, &status.id)
            .await
            .map_err(Self::unavailable)?;

        self.allocator.release(binding.host_port);
        info!("container {} destroyed", status.id);
        Ok(())
    }

    async fn inject_access_credential(&self, credential: &str) -> LifecycleResult<()> {
        let binding = self.binding("inject credential into")?;
        let status = self.query_status(binding).await?;

        if status.phase != Phase::Running {
            return Err(LifecycleError::InvalidState {
                operation: "inject credential into",
                instance: binding.template.name.clone(),
                phase: status.phase,
            });
        }

        // The credential travels as a positional argument, never as shell
        // text: "$1" expands after parsing, so key material cannot change
        // the command.
        let script = format!(
            "mkdir -p {CREDENTIAL_DIR} && printf '%s\\n' \"$1\" > {CREDENTIAL_FILE} \
             && chmod 700 {CREDENTIAL_DIR} && chmod 600 {CREDENTIAL_FILE}"
        );
        let cmd = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            script,
            "inject".to_string(),
            credential.to_string(),
        ];

        let instance = binding.template.name.clone();
        let exit_code = api::exec(&self.config, &status.id, cmd)
            .await
            .map_err(|e| LifecycleError::CredentialInjectionFailed {
                instance: instance.clone(),
                reason: format!("{e:#}"),
            })?;

        if exit_code != 0 {
            return Err(LifecycleError::CredentialInjectionFailed {
                instance,
                reason: format!("remote command exited with status {exit_code}"),
            });
        }

        info!("access credential written into container {}", status.id);
        Ok(())
    }

    fn access_address(&self) -> LifecycleResult<AccessAddress> {
        let binding = self.binding("resolve access address for")?;

        // The engine socket is local, so published ports are reachable on
        // loopback regardless of the container's own network address.
        Ok(AccessAddress {
            host: "127.0.0.1".to_string(),
            port: binding.host_port,
        })
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::Container
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Template {
        Template::new("node-1", "alpine:3.18", BackendKind::Container)
            .with_cpu_cores(2)
            .with_memory_gib(1)
    }

    fn bound_driver() -> DockerDriver {
        let mut driver = DockerDriver::new(DockerConfig::default(), Arc::new(PortAllocator::new()));
        driver
            .bind(&template())
            .expect("bind should succeed in test");
        driver
    }

    #[test]
    fn state_mapping_is_exhaustive() {
        assert_eq!(phase_from_state("created"), Phase::Stopped);
        assert_eq!(phase_from_state("exited"), Phase::Stopped);
        assert_eq!(phase_from_state("dead"), Phase::Stopped);
        assert_eq!(phase_from_state("running"), Phase::Running);
        assert_eq!(phase_from_state("paused"), Phase::Paused);
        assert_eq!(phase_from_state("restarting"), Phase::Transitional);
        assert_eq!(phase_from_state("removing"), Phase::Transitional);
        assert_eq!(phase_from_state("some-future-state"), Phase::Transitional);
    }

    #[test]
    fn bind_claims_port_and_prefixes_name() {
        let driver = bound_driver();
        let binding = driver.bound.as_ref().expect("driver should be bound");

        assert_eq!(binding.container_name, "berth-node-1");
        let address = driver
            .access_address()
            .expect("bound driver has an address");
        assert_eq!(address.host, "127.0.0.1");
        assert_eq!(address.port, binding.host_port);
    }

    #[test]
    fn bind_twice_is_an_error() {
        let mut driver = bound_driver();
        assert!(driver.bind(&template()).is_err());
    }

    #[tokio::test]
    async fn operations_before_bind_are_rejected() {
        let driver = DockerDriver::new(DockerConfig::default(), Arc::new(PortAllocator::new()));

        assert!(matches!(
            driver.status().await,
            Err(LifecycleError::Unbound { .. })
        ));
        assert!(matches!(
            driver.create().await,
            Err(LifecycleError::Unbound { .. })
        ));
        assert!(matches!(
            driver.access_address(),
            Err(LifecycleError::Unbound { .. })
        ));
    }

    #[test]
    fn create_request_carries_quotas_and_binding() {
        let driver = bound_driver();
        let binding = driver.bound.as_ref().expect("driver should be bound");
        let request = driver.create_request(binding);

        assert_eq!(request.image, "alpine:3.18");
        assert_eq!(request.host_config.memory, 1 << 30);
        assert_eq!(request.host_config.nano_cpus, 2_000_000_000);

        let bindings = request
            .host_config
            .port_bindings
            .get("22/tcp")
            .expect("access port binding present");
        assert_eq!(bindings[0].host_port, binding.host_port.to_string());
    }
}
