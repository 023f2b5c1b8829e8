//! SSH provisioning channel into a running micro-VM guest.

use std::io::Read;
use std::net::TcpStream;

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::info;
use ssh2::Session;

use super::config::{SshAuth, SshProvisioning};

const CREDENTIAL_DIR: &str = "/root/.ssh";
const CREDENTIAL_FILE: &str = "/root/.ssh/authorized_keys";

/// Write an access credential into the guest's authorized keys file.
///
/// The credential is base64-armored before it touches the remote command
/// line; the armored form cannot break out of its quoting, so untrusted
/// key material never reaches the shell as syntax.
pub(crate) fn write_access_credential(
    ssh: &SshProvisioning,
    host: &str,
    port: u16,
    credential: &str,
) -> Result<()> {
    let session = create_session(ssh, host, port)?;

    let encoded = STANDARD.encode(credential.as_bytes());
    let command = format!(
        "mkdir -p {CREDENTIAL_DIR} && printf '%s' '{encoded}' | base64 -d > {CREDENTIAL_FILE} \
         && chmod 700 {CREDENTIAL_DIR} && chmod 600 {CREDENTIAL_FILE}"
    );

    run_command(&session, &command)?;
    info!("access credential written into guest at {host}:{port}");
    Ok(())
}

/// Execute a command in the guest and fail on non-zero exit.
fn run_command(session: &Session, command: &str) -> Result<()> {
    let mut channel = session
        .channel_session()
        .context("failed to create SSH channel")?;

    channel.exec(command).context("failed to execute command")?;

    let mut output = String::new();
    channel
        .read_to_string(&mut output)
        .context("failed to read command output")?;

    channel
        .wait_close()
        .context("failed to wait for channel close")?;

    let exit_status = channel.exit_status().context("failed to get exit status")?;
    if exit_status != 0 {
        bail!("guest command exited with status {exit_status}: {output}");
    }

    Ok(())
}

/// Open an authenticated SSH session to the guest.
fn create_session(ssh: &SshProvisioning, host: &str, port: u16) -> Result<Session> {
    let tcp = TcpStream::connect((host, port))
        .with_context(|| format!("failed to connect to guest SSH at {host}:{port}"))?;

    let mut session = Session::new().context("failed to create SSH session")?;
    session.set_tcp_stream(tcp);
    session.handshake().context("SSH handshake failed")?;

    match &ssh.auth {
        SshAuth::Agent => {
            session
                .userauth_agent(&ssh.username)
                .context("SSH agent authentication failed")?;
        }
        SshAuth::Key(key_path) => {
            session
                .userauth_pubkey_file(&ssh.username, None, key_path, None)
                .context("SSH key authentication failed")?;
        }
        SshAuth::Password(password) => {
            session
                .userauth_password(&ssh.username, password)
                .context("SSH password authentication failed")?;
        }
    }

    if !session.authenticated() {
        return Err(anyhow!("SSH authentication failed"));
    }

    Ok(session)
}
