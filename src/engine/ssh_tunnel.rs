//! SSH Tunnel
//!
//! Local port forwarding for databases reachable only through a bastion
//! host. An in-process ssh2 session forwards an ephemeral 127.0.0.1 port to
//! the remote database endpoint, so both password and key authentication
//! work without an external OpenSSH binary. Drivers never see the tunnel:
//! the connection manager rewrites host/port before handing them the config.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ssh2::Session;
use tracing::{debug, warn};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{SshAuth, SshTunnelConfig};

/// An active SSH tunnel. Closing (or dropping) stops the accept loop and
/// tears down the forwarding threads.
pub struct SshTunnel {
    local_port: u16,
    is_running: Arc<AtomicBool>,
}

impl SshTunnel {
    /// Opens an SSH tunnel forwarding a fresh local port to
    /// `remote_host:remote_port` as seen from the SSH server.
    ///
    /// The ssh2 handshake is blocking, so setup runs on the blocking pool.
    pub async fn open(
        config: &SshTunnelConfig,
        remote_host: &str,
        remote_port: u16,
    ) -> EngineResult<Self> {
        let config = config.clone();
        let remote_host = remote_host.to_string();

        tokio::task::spawn_blocking(move || Self::open_blocking(&config, &remote_host, remote_port))
            .await
            .map_err(|e| EngineError::ssh(format!("tunnel setup task failed: {e}")))?
    }

    fn open_blocking(
        config: &SshTunnelConfig,
        remote_host: &str,
        remote_port: u16,
    ) -> EngineResult<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let socket_addr = addr
            .parse()
            .or_else(|_| {
                use std::net::ToSocketAddrs;
                addr.to_socket_addrs()
                    .map_err(|e| EngineError::ssh(format!("cannot resolve SSH host {addr}: {e}")))?
                    .next()
                    .ok_or_else(|| EngineError::ssh(format!("SSH host {addr} resolved to nothing")))
            })?;

        let tcp = TcpStream::connect_timeout(
            &socket_addr,
            Duration::from_secs(u64::from(config.connect_timeout_secs)),
        )
        .map_err(|e| EngineError::ssh(format!("cannot reach SSH server {addr}: {e}")))?;

        let mut session = Session::new()
            .map_err(|e| EngineError::ssh(format!("SSH session init failed: {e}")))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| EngineError::ssh(format!("SSH handshake with {addr} failed: {e}")))?;

        match &config.auth {
            SshAuth::Password { password } => {
                session
                    .userauth_password(&config.username, password)
                    .map_err(|e| {
                        EngineError::auth_failed(format!("SSH password authentication failed: {e}"))
                    })?;
            }
            SshAuth::Key {
                private_key_path,
                passphrase,
            } => {
                session
                    .userauth_pubkey_file(
                        &config.username,
                        None,
                        Path::new(private_key_path),
                        passphrase.as_deref(),
                    )
                    .map_err(|e| {
                        EngineError::auth_failed(format!("SSH key authentication failed: {e}"))
                    })?;
            }
        }

        if !session.authenticated() {
            return Err(EngineError::auth_failed("SSH authentication was not accepted"));
        }

        let listener = TcpListener::bind("127.0.0.1:0")
            .map_err(|e| EngineError::ssh(format!("cannot bind local forward port: {e}")))?;
        let local_port = listener
            .local_addr()
            .map_err(|e| EngineError::ssh(format!("cannot read local forward port: {e}")))?
            .port();

        let is_running = Arc::new(AtomicBool::new(true));
        let session = Arc::new(session);

        // Accept loop: each accepted local connection gets its own forwarding
        // thread bridging the TCP socket and a direct-tcpip channel.
        {
            let is_running = Arc::clone(&is_running);
            let session = Arc::clone(&session);
            let remote_host = remote_host.to_string();
            // Waking the accept loop on shutdown is done by connecting to it;
            // a short timeout also bounds how long close() can lag.
            listener
                .set_nonblocking(false)
                .map_err(|e| EngineError::ssh(format!("listener setup failed: {e}")))?;

            std::thread::spawn(move || {
                for stream in listener.incoming() {
                    if !is_running.load(Ordering::SeqCst) {
                        break;
                    }
                    let local = match stream {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(error = %e, "tunnel accept failed");
                            continue;
                        }
                    };
                    let channel = match session.channel_direct_tcpip(&remote_host, remote_port, None)
                    {
                        Ok(c) => c,
                        Err(e) => {
                            warn!(error = %e, "direct-tcpip channel open failed");
                            continue;
                        }
                    };
                    let is_running = Arc::clone(&is_running);
                    std::thread::spawn(move || forward(local, channel, is_running));
                }
                debug!("tunnel accept loop stopped");
            });
        }

        debug!(local_port, remote_port, "SSH tunnel established");
        Ok(Self {
            local_port,
            is_running,
        })
    }

    /// Returns the local port drivers should connect to
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Returns the local address to use for the database connection
    pub fn local_addr(&self) -> String {
        format!("127.0.0.1:{}", self.local_port)
    }

    /// Closes the tunnel. Idempotent.
    pub fn close(&self) {
        if self.is_running.swap(false, Ordering::SeqCst) {
            // Wake the accept loop so it observes the stop flag.
            let _ = TcpStream::connect(("127.0.0.1", self.local_port));
        }
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pumps bytes both ways between the local socket and the SSH channel until
/// either side closes or the tunnel shuts down.
fn forward(mut local: TcpStream, mut channel: ssh2::Channel, is_running: Arc<AtomicBool>) {
    let _ = local.set_read_timeout(Some(Duration::from_millis(50)));
    let mut local_buf = [0u8; 16384];
    let mut remote_buf = [0u8; 16384];

    while is_running.load(Ordering::SeqCst) {
        let mut moved = false;

        match local.read(&mut local_buf) {
            Ok(0) => break,
            Ok(n) => {
                if channel.write_all(&local_buf[..n]).is_err() {
                    break;
                }
                moved = true;
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(_) => break,
        }

        match channel.read(&mut remote_buf) {
            Ok(0) => {
                if channel.eof() {
                    break;
                }
            }
            Ok(n) => {
                if local.write_all(&remote_buf[..n]).is_err() {
                    break;
                }
                moved = true;
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(_) => break,
        }

        if !moved {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    let _ = channel.close();
}
