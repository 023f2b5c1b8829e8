//! Wire types for the container engine REST API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Error envelope returned by the engine on failures.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    pub message: String,
}

/// Entry from `GET /containers/json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ContainerSummary {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    pub state: String,
}

/// Entry from `GET /images/json`. Only presence matters to the driver.
#[derive(Debug, Deserialize)]
pub(crate) struct ImageSummary {}

/// Marker for the engine's `{}` map values (exposed ports).
#[derive(Debug, Serialize)]
pub(crate) struct EmptyObject {}

/// Body of `POST /containers/create`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CreateContainerRequest {
    pub image: String,
    pub exposed_ports: HashMap<String, EmptyObject>,
    pub host_config: HostConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct HostConfig {
    /// Memory quota in bytes.
    pub memory: i64,
    /// CPU quota in units of 1e-9 cores.
    pub nano_cpus: i64,
    pub port_bindings: HashMap<String, Vec<PortBinding>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PortBinding {
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateContainerResponse {
    #[serde(rename = "Id")]
    pub id: String,
}

/// Body of `POST /containers/{id}/exec`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ExecCreateRequest {
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub cmd: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExecCreateResponse {
    #[serde(rename = "Id")]
    pub id: String,
}

/// Body of `POST /exec/{id}/start`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ExecStartRequest {
    pub detach: bool,
    pub tty: bool,
}

/// Response of `GET /exec/{id}/json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ExecInspectResponse {
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub running: bool,
}
