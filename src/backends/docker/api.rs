//! Typed endpoint wrappers for the container engine API.
//!
//! Thin layer over the Unix-socket transport: builds versioned paths and
//! query strings, decodes JSON, and turns engine error envelopes into
//! `anyhow` errors with context. Mapping onto the lifecycle taxonomy
//! happens in the driver.

use anyhow::{Context, Result, anyhow, bail};
use bytes::Bytes;
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::form_urlencoded;

use crate::backends::uds_http;

use super::DockerConfig;
use super::api_types::{
    ApiError, ContainerSummary, CreateContainerRequest, CreateContainerResponse,
    ExecCreateRequest, ExecCreateResponse, ExecInspectResponse, ExecStartRequest, ImageSummary,
};

/// Decode an engine error envelope, falling back to the raw body.
fn api_error(status: StatusCode, body: &Bytes) -> anyhow::Error {
    match serde_json::from_slice::<ApiError>(body) {
        Ok(envelope) => anyhow!("engine API error ({status}): {}", envelope.message),
        Err(_) => anyhow!(
            "engine API request failed with status {status}: {}",
            String::from_utf8_lossy(body)
        ),
    }
}

async fn get_json<T: DeserializeOwned>(config: &DockerConfig, path_and_query: &str) -> Result<T> {
    let (status, body) =
        uds_http::send(&config.socket_path, Method::GET, path_and_query, None).await?;

    if status != StatusCode::OK {
        return Err(api_error(status, &body));
    }

    serde_json::from_slice(&body).context("failed to decode engine API response")
}

async fn post<T: Serialize>(
    config: &DockerConfig,
    path_and_query: &str,
    body: Option<&T>,
) -> Result<(StatusCode, Bytes)> {
    let json_body = body
        .map(serde_json::to_vec)
        .transpose()
        .context("failed to serialize engine API request")?;

    uds_http::send(&config.socket_path, Method::POST, path_and_query, json_body).await
}

fn versioned(config: &DockerConfig, rest: &str) -> String {
    format!("{}/{}", config.api_version, rest)
}

/// List containers (in any state) whose name matches exactly.
///
/// The engine's name filter is a substring match, so the results are
/// narrowed to entries carrying the canonical `/{name}` entry.
pub(crate) async fn list_containers_by_name(
    config: &DockerConfig,
    name: &str,
) -> Result<Vec<ContainerSummary>> {
    let filters = serde_json::json!({ "name": [name] }).to_string();
    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("all", "true")
        .append_pair("filters", &filters)
        .finish();

    let containers: Vec<ContainerSummary> =
        get_json(config, &versioned(config, &format!("containers/json?{query}"))).await?;

    let canonical = format!("/{name}");
    Ok(containers
        .into_iter()
        .filter(|c| c.names.iter().any(|n| n == &canonical))
        .collect())
}

/// Whether an image matching the reference is present locally.
pub(crate) async fn image_present(config: &DockerConfig, reference: &str) -> Result<bool> {
    let filters = serde_json::json!({ "reference": [reference] }).to_string();
    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("filters", &filters)
        .finish();

    let images: Vec<ImageSummary> =
        get_json(config, &versioned(config, &format!("images/json?{query}"))).await?;
    Ok(!images.is_empty())
}

/// Pull an image from its registry.
///
/// The engine streams NDJSON progress with a 200 status even when the pull
/// fails mid-way, so the collected stream is scanned for error records.
pub(crate) async fn pull_image(config: &DockerConfig, reference: &str) -> Result<()> {
    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("fromImage", reference)
        .finish();

    let (status, body) = post::<()>(
        config,
        &versioned(config, &format!("images/create?{query}")),
        None,
    )
    .await?;

    if status != StatusCode::OK {
        return Err(api_error(status, &body));
    }

    for line in body.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
        if let Ok(record) = serde_json::from_slice::<serde_json::Value>(line)
            && let Some(error) = record.get("error").and_then(|e| e.as_str())
        {
            bail!("image pull reported an error: {error}");
        }
    }

    Ok(())
}

/// Create a container with the given name. Returns the engine identity.
pub(crate) async fn create_container(
    config: &DockerConfig,
    name: &str,
    request: &CreateContainerRequest,
) -> Result<String> {
    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("name", name)
        .finish();

    let (status, body) = post(
        config,
        &versioned(config, &format!("containers/create?{query}")),
        Some(request),
    )
    .await?;

    if status != StatusCode::CREATED {
        return Err(api_error(status, &body));
    }

    let response: CreateContainerResponse =
        serde_json::from_slice(&body).context("failed to decode container create response")?;
    Ok(response.id)
}

/// Start a created or stopped container.
pub(crate) async fn start_container(config: &DockerConfig, id: &str) -> Result<()> {
    let (status, body) = post::<()>(
        config,
        &versioned(config, &format!("containers/{id}/start")),
        None,
    )
    .await?;

    match status {
        StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED => Ok(()),
        _ => Err(api_error(status, &body)),
    }
}

/// Stop a running container, granting `grace_secs` before the engine kills it.
pub(crate) async fn stop_container(config: &DockerConfig, id: &str, grace_secs: u64) -> Result<()> {
    let (status, body) = post::<()>(
        config,
        &versioned(config, &format!("containers/{id}/stop?t={grace_secs}")),
        None,
    )
    .await?;

    match status {
        StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED => Ok(()),
        _ => Err(api_error(status, &body)),
    }
}

/// Restart a container, stopping it first if it is running.
pub(crate) async fn restart_container(
    config: &DockerConfig,
    id: &str,
    grace_secs: u64,
) -> Result<()> {
    let (status, body) = post::<()>(
        config,
        &versioned(config, &format!("containers/{id}/restart?t={grace_secs}")),
        None,
    )
    .await?;

    if status != StatusCode::NO_CONTENT {
        return Err(api_error(status, &body));
    }
    Ok(())
}

/// Force-remove a container.
pub(crate) async fn remove_container(config: &DockerConfig, id: &str) -> Result<()> {
    let (status, body) = uds_http::send(
        &config.socket_path,
        Method::DELETE,
        &versioned(config, &format!("containers/{id}?force=true")),
        None,
    )
    .await?;

    if !status.is_success() {
        return Err(api_error(status, &body));
    }
    Ok(())
}

/// Run a command inside a running container and return its exit code.
///
/// The command is an argv vector handed to the engine verbatim; nothing is
/// routed through a shell by this layer.
pub(crate) async fn exec(config: &DockerConfig, id: &str, cmd: Vec<String>) -> Result<i64> {
    let create_request = ExecCreateRequest {
        attach_stdout: true,
        attach_stderr: true,
        cmd,
    };

    let (status, body) = post(
        config,
        &versioned(config, &format!("containers/{id}/exec")),
        Some(&create_request),
    )
    .await?;

    if status != StatusCode::CREATED {
        return Err(api_error(status, &body));
    }

    let created: ExecCreateResponse =
        serde_json::from_slice(&body).context("failed to decode exec create response")?;

    let start_request = ExecStartRequest {
        detach: false,
        tty: false,
    };

    let (status, body) = post(
        config,
        &versioned(config, &format!("exec/{}/start", created.id)),
        Some(&start_request),
    )
    .await?;

    if !status.is_success() {
        return Err(api_error(status, &body));
    }

    let inspect: ExecInspectResponse = get_json(
        config,
        &versioned(config, &format!("exec/{}/json", created.id)),
    )
    .await?;

    if inspect.running {
        bail!("remote command still running after attached start returned");
    }

    inspect
        .exit_code
        .ok_or_else(|| anyhow!("exec finished without an exit code"))
}
