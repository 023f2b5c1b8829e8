//! Minimal HTTP/1 client for backend APIs served over Unix sockets.
//!
//! Both the container engine and the hypervisor expose local REST APIs on
//! Unix sockets; this is the shared transport underneath their typed
//! clients. One connection per request; these APIs are low-traffic
//! control planes, not data paths.

use std::path::Path;

use anyhow::{Context, Result};
use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_client_sockets::{Backend, tokio::TokioBackend};
use log::error;

/// Send a request over the Unix socket and collect the full response body.
///
/// A JSON body, when present, is sent with the matching content type. The
/// body is collected to completion even for streamed responses (e.g. image
/// pull progress), which is what makes in-flight backend calls
/// non-cancellable.
pub(crate) async fn send(
    socket_path: &Path,
    method: Method,
    path_and_query: &str,
    json_body: Option<Vec<u8>>,
) -> Result<(StatusCode, Bytes)> {
    let io = TokioBackend::connect_to_unix_socket(socket_path)
        .await
        .with_context(|| {
            format!(
                "failed to connect to backend API socket {}",
                socket_path.display()
            )
        })?;

    let (mut send_request, conn) = hyper::client::conn::http1::handshake::<_, Full<Bytes>>(io)
        .await
        .context("failed to perform HTTP handshake")?;

    // Drive the connection until the response is done.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            error!("backend API connection error: {e}");
        }
    });

    let uri = format!("http://localhost/{}", path_and_query.trim_start_matches('/'));
    let builder = Request::builder()
        .method(method)
        .uri(&uri)
        .header("Host", "localhost")
        .header("Accept", "application/json");

    let request = match json_body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body))),
        None => builder.body(Full::new(Bytes::new())),
    }
    .context("failed to build HTTP request")?;

    let response = send_request
        .send_request(request)
        .await
        .context("failed to send API request")?;

    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .context("failed to read API response body")?
        .to_bytes();

    Ok((status, body))
}
