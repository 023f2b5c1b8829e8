//! Hypervisor API client for Unix socket communication.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use http::Method;
use serde::{Deserialize, Serialize};

use crate::backends::uds_http;

/// Guest kernel configuration (`PUT /boot-source`).
#[derive(Debug, Serialize)]
pub(crate) struct BootSource {
    pub kernel_image_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_args: Option<String>,
}

/// vCPU and memory sizing (`PUT /machine-config`).
#[derive(Debug, Serialize)]
pub(crate) struct MachineConfiguration {
    pub vcpu_count: u32,
    pub mem_size_mib: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smt: Option<bool>,
}

/// Block device attachment (`PUT /drives/{id}`).
#[derive(Debug, Serialize)]
pub(crate) struct Drive {
    pub drive_id: String,
    pub path_on_host: String,
    pub is_root_device: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_read_only: Option<bool>,
}

/// Guest NIC backed by a host tap device (`PUT /network-interfaces/{id}`).
#[derive(Debug, Serialize)]
pub(crate) struct NetworkInterface {
    pub iface_id: String,
    pub host_dev_name: String,
    pub guest_mac: String,
}

/// VM action trigger (`PUT /actions`).
#[derive(Debug, Serialize)]
pub(crate) struct InstanceActionInfo {
    pub action_type: String,
}

/// Error envelope returned by the hypervisor API.
#[derive(Debug, Deserialize)]
pub(crate) struct FaultMessage {
    pub fault_message: String,
}

/// Make a PUT request to the hypervisor API over its Unix socket.
pub(crate) async fn api_put<T: Serialize>(socket_path: &Path, path: &str, body: &T) -> Result<()> {
    let json_body = serde_json::to_vec(body).context("failed to serialize request body")?;

    let (status, body) = uds_http::send(socket_path, Method::PUT, path, Some(json_body)).await?;

    if status.is_success() {
        return Ok(());
    }

    if let Ok(fault) = serde_json::from_slice::<FaultMessage>(&body) {
        return Err(anyhow!(
            "hypervisor API error ({status}): {}",
            fault.fault_message
        ));
    }

    Err(anyhow!(
        "hypervisor API request failed with status {status}: {}",
        String::from_utf8_lossy(&body)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_types_use_hypervisor_field_names() {
        let boot = BootSource {
            kernel_image_path: "/var/lib/berth/vmlinux.bin".to_string(),
            boot_args: Some("console=ttyS0".to_string()),
        };
        let json = serde_json::to_value(&boot).expect("serialize boot source");
        assert_eq!(json["kernel_image_path"], "/var/lib/berth/vmlinux.bin");
        assert_eq!(json["boot_args"], "console=ttyS0");

        let machine = MachineConfiguration {
            vcpu_count: 2,
            mem_size_mib: 2048,
            smt: None,
        };
        let json = serde_json::to_value(&machine).expect("serialize machine config");
        assert_eq!(json["vcpu_count"], 2);
        assert_eq!(json["mem_size_mib"], 2048);
        assert!(json.get("smt").is_none());

        let nic = NetworkInterface {
            iface_id: "eth0".to_string(),
            host_dev_name: "tap0".to_string(),
            guest_mac: "AA:FC:00:00:00:01".to_string(),
        };
        let json = serde_json::to_value(&nic).expect("serialize network interface");
        assert_eq!(json["iface_id"], "eth0");
        assert_eq!(json["host_dev_name"], "tap0");
        assert_eq!(json["guest_mac"], "AA:FC:00:00:00:01");
    }
}
