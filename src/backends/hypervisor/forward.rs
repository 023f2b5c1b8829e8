//! Userspace forward of an instance's claimed host port to the guest.
//!
//! The guest's access service lives on the tap network, which is not
//! reachable from loopback. This proxy listens on the claimed host port
//! and relays each connection to the guest address, which is what makes
//! the driver's access address real for both SSH provisioning and the
//! instance's users. Lives for as long as the VM runs.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use log::{debug, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Running relay from `127.0.0.1:{host_port}` to the guest.
///
/// Dropping the handle tears the listener down; in-flight connections
/// finish on their own tasks.
#[derive(Debug)]
pub(crate) struct PortForward {
    accept_task: JoinHandle<()>,
}

impl PortForward {
    pub(crate) fn stop(&self) {
        self.accept_task.abort();
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Bind the host port and start relaying connections to `guest`.
pub(crate) async fn spawn(host_port: u16, guest: SocketAddr) -> Result<PortForward> {
    let listener = TcpListener::bind(("127.0.0.1", host_port))
        .await
        .with_context(|| format!("failed to bind host port {host_port} for forwarding"))?;

    let accept_task = tokio::spawn(async move {
        loop {
            let (mut inbound, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("port forward accept failed: {e}");
                    continue;
                }
            };

            tokio::spawn(async move {
                match TcpStream::connect(guest).await {
                    Ok(mut outbound) => {
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    }
                    Err(e) => {
                        debug!("guest connection for {peer} failed: {e}");
                    }
                }
            });
        }
    });

    Ok(PortForward { accept_task })
}
