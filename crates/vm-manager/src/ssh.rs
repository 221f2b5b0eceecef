//! SSH connectivity used by `vmctl ssh` and the provisioning layer.
//! Built on `ssh2` (libssh2 bindings), matching the sync session API
//! `provision.rs` already programs against; async callers run connection
//! setup on a blocking thread.

use std::io::Read;
use std::net::TcpStream;
use std::path::Path;
use std::time::{Duration, Instant};

use ssh2::Session;
use tracing::debug;

use crate::error::{Result, VmError};
use crate::types::SshConfig;

/// Dial the guest's SSH port, retrying until `timeout` elapses. Guests
/// often answer the port before sshd has finished key generation, so a
/// handshake failure is retried just like a connection refusal.
pub async fn connect_with_retry(
    host: &str,
    port: u16,
    config: &SshConfig,
    timeout: Duration,
) -> Result<Session> {
    let host = host.to_string();
    let config = config.clone();
    tokio::task::spawn_blocking(move || connect_with_retry_blocking(&host, port, &config, timeout))
        .await
        .map_err(|e| VmError::Ssh(format!("ssh connect task panicked: {e}")))?
}

fn connect_with_retry_blocking(
    host: &str,
    port: u16,
    config: &SshConfig,
    timeout: Duration,
) -> Result<Session> {
    let deadline = Instant::now() + timeout;
    let mut last_err = None;

    while Instant::now() < deadline {
        match try_connect(host, port, config) {
            Ok(sess) => return Ok(sess),
            Err(e) => {
                debug!(host, port, error = %e, "ssh connect attempt failed, retrying");
                last_err = Some(e);
                std::thread::sleep(Duration::from_millis(500));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| VmError::Ssh("timed out connecting".into())))
}

fn try_connect(host: &str, port: u16, config: &SshConfig) -> Result<Session> {
    let tcp = TcpStream::connect((host, port)).map_err(|e| VmError::Ssh(e.to_string()))?;
    tcp.set_read_timeout(Some(Duration::from_secs(5)))
        .map_err(|e| VmError::Ssh(e.to_string()))?;

    let mut sess = Session::new().map_err(|e| VmError::Ssh(e.to_string()))?;
    sess.set_tcp_stream(tcp);
    sess.handshake().map_err(|e| VmError::Ssh(e.to_string()))?;

    if let Some(ref key_path) = config.private_key_path {
        sess.userauth_pubkey_file(&config.user, None, key_path, None)
            .map_err(|e| VmError::Ssh(format!("pubkey auth with {}: {e}", key_path.display())))?;
    } else if let Some(ref pem) = config.private_key_pem {
        sess.userauth_pubkey_memory(&config.user, None, pem, None)
            .map_err(|e| VmError::Ssh(format!("pubkey auth (in-memory key): {e}")))?;
    } else {
        return Err(VmError::Ssh("no private key configured".into()));
    }

    if !sess.authenticated() {
        return Err(VmError::Ssh("authentication failed".into()));
    }

    Ok(sess)
}

/// Run a command over an established session, returning (stdout, stderr, exit code).
pub fn exec(sess: &Session, command: &str) -> Result<(String, String, i32)> {
    let mut channel = sess.channel_session().map_err(|e| VmError::Ssh(e.to_string()))?;
    channel.exec(command).map_err(|e| VmError::Ssh(e.to_string()))?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(|e| VmError::Ssh(e.to_string()))?;

    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(|e| VmError::Ssh(e.to_string()))?;

    channel.wait_close().map_err(|e| VmError::Ssh(e.to_string()))?;
    let exit_code = channel.exit_status().map_err(|e| VmError::Ssh(e.to_string()))?;

    Ok((stdout, stderr, exit_code))
}

/// Upload a local file to `remote_path` over SCP.
pub fn upload(sess: &Session, local_path: &Path, remote_path: &Path) -> Result<()> {
    let mut local = std::fs::File::open(local_path)
        .map_err(|e| VmError::Ssh(format!("opening {}: {e}", local_path.display())))?;
    let metadata = local
        .metadata()
        .map_err(|e| VmError::Ssh(e.to_string()))?;

    let mut remote = sess
        .scp_send(remote_path, 0o644, metadata.len(), None)
        .map_err(|e| VmError::Ssh(format!("scp_send {}: {e}", remote_path.display())))?;

    std::io::copy(&mut local, &mut remote).map_err(|e| VmError::Ssh(e.to_string()))?;

    remote.send_eof().map_err(|e| VmError::Ssh(e.to_string()))?;
    remote.wait_eof().map_err(|e| VmError::Ssh(e.to_string()))?;
    remote.close().map_err(|e| VmError::Ssh(e.to_string()))?;
    remote.wait_close().map_err(|e| VmError::Ssh(e.to_string()))?;

    Ok(())
}
