//! SSH command execution and SFTP file transfer via `ssh2` (libssh2).

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::{ErrorCode, HashType, Session};
use tracing::{debug, info};

use opsmate_config::RemoteConfig;

use crate::error::RemoteError;
use crate::remote::{CommandOutput, Connector, RemoteSession};

/// libssh2 `LIBSSH2_FX_NO_SUCH_FILE`.
const SFTP_NO_SUCH_FILE: i32 = 2;
/// libssh2 `LIBSSH2_ERROR_TIMEOUT`.
const SESSION_TIMEOUT: i32 = -9;

/// Key-authenticated connector for the configured host.
#[derive(Debug, Clone)]
pub struct SshConnector {
    config: RemoteConfig,
}

impl SshConnector {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    fn open_tcp(&self) -> Result<TcpStream, RemoteError> {
        let addr = self.addr();
        let connect_err = |detail: String| RemoteError::Connect {
            addr: addr.clone(),
            detail,
        };
        let socket = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(|err| connect_err(err.to_string()))?
            .next()
            .ok_or_else(|| connect_err("host did not resolve".to_string()))?;

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let tcp = TcpStream::connect_timeout(&socket, timeout).map_err(|err| {
            if err.kind() == std::io::ErrorKind::TimedOut {
                RemoteError::Timeout(format!("connecting to {addr}"))
            } else {
                connect_err(err.to_string())
            }
        })?;
        Ok(tcp)
    }

    fn verify_host_key(&self, session: &Session) -> Result<(), RemoteError> {
        let observed = session
            .host_key_hash(HashType::Sha256)
            .map(hex)
            .unwrap_or_default();
        let expected = self.config.host_key_fingerprint.trim().to_ascii_lowercase();
        if expected.is_empty() {
            debug!(host = %self.config.host, fingerprint = %observed, "accepting host key");
            return Ok(());
        }
        if observed != expected {
            return Err(RemoteError::HostKey { expected, observed });
        }
        Ok(())
    }
}

impl Connector for SshConnector {
    fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let tcp = self.open_tcp()?;
        let mut session = Session::new().map_err(|err| RemoteError::Connect {
            addr: self.addr(),
            detail: err.to_string(),
        })?;
        session.set_tcp_stream(tcp);
        session.set_timeout(millis(self.config.connect_timeout_secs));
        session.handshake().map_err(|err| RemoteError::Connect {
            addr: self.addr(),
            detail: format!("handshake: {err}"),
        })?;

        self.verify_host_key(&session)?;

        let key_path = expand_home(&self.config.key_path);
        session
            .userauth_pubkey_file(&self.config.username, None, &key_path, None)
            .map_err(|err| RemoteError::Auth {
                user: self.config.username.clone(),
                detail: err.message().to_string(),
            })?;
        if !session.authenticated() {
            return Err(RemoteError::Auth {
                user: self.config.username.clone(),
                detail: "server rejected the key".to_string(),
            });
        }

        session.set_timeout(millis(self.config.command_timeout_secs));
        info!(addr = %self.addr(), user = %self.config.username, "ssh session opened");
        Ok(Box::new(SshSession { session }))
    }
}

struct SshSession {
    session: Session,
}

impl SshSession {
    fn sftp(&self) -> Result<ssh2::Sftp, RemoteError> {
        self.session
            .sftp()
            .map_err(|err| map_ssh_error(err, RemoteError::Transfer))
    }
}

impl RemoteSession for SshSession {
    fn exec(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        let channel_err = |err| map_ssh_error(err, RemoteError::Channel);
        let mut channel = self.session.channel_session().map_err(channel_err)?;
        channel.exec(command).map_err(channel_err)?;

        let mut stdout = Vec::new();
        channel
            .read_to_end(&mut stdout)
            .map_err(|err| map_io_error(err, RemoteError::Channel))?;
        let mut stderr = Vec::new();
        channel
            .stderr()
            .read_to_end(&mut stderr)
            .map_err(|err| map_io_error(err, RemoteError::Channel))?;

        channel.wait_close().map_err(channel_err)?;
        let exit_code = channel.exit_status().map_err(channel_err)?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            exit_code,
        })
    }

    fn ensure_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        let sftp = self.sftp()?;
        if sftp.stat(Path::new(path)).is_ok() {
            return Ok(());
        }
        sftp.mkdir(Path::new(path), 0o755)
            .map_err(|err| map_ssh_error(err, RemoteError::Transfer))
    }

    fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<(), RemoteError> {
        let sftp = self.sftp()?;
        let mut file = sftp
            .create(Path::new(path))
            .map_err(|err| map_ssh_error(err, RemoteError::Transfer))?;
        file.write_all(contents)
            .map_err(|err| map_io_error(err, RemoteError::Transfer))
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let sftp = self.sftp()?;
        let mut file = sftp.open(Path::new(path)).map_err(|err| {
            if matches!(err.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE)) {
                RemoteError::NotFound(path.to_string())
            } else {
                map_ssh_error(err, RemoteError::Transfer)
            }
        })?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|err| map_io_error(err, RemoteError::Transfer))?;
        Ok(contents)
    }
}

fn map_ssh_error(err: ssh2::Error, wrap: fn(String) -> RemoteError) -> RemoteError {
    match err.code() {
        ErrorCode::Session(SESSION_TIMEOUT) => RemoteError::Timeout(err.message().to_string()),
        _ => wrap(err.message().to_string()),
    }
}

fn map_io_error(err: std::io::Error, wrap: fn(String) -> RemoteError) -> RemoteError {
    match err.kind() {
        std::io::ErrorKind::TimedOut => RemoteError::Timeout(err.to_string()),
        _ => wrap(err.to_string()),
    }
}

fn millis(secs: u64) -> u32 {
    u32::try_from(secs.saturating_mul(1000)).unwrap_or(u32::MAX)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        assert_eq!(expand_home("/keys/id"), PathBuf::from("/keys/id"));
        assert_eq!(expand_home("keys/~/id"), PathBuf::from("keys/~/id"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand_home("~/.ssh/id"), PathBuf::from(home).join(".ssh/id"));
        }
    }

    #[test]
    fn hex_is_lowercase_and_padded() {
        assert_eq!(hex(&[0x00, 0x0f, 0xab]), "000fab");
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(15), 15_000);
        assert_eq!(millis(u64::MAX), u32::MAX);
    }

    #[test]
    fn unreachable_host_fails_with_connection_error() {
        let connector = SshConnector::new(RemoteConfig {
            host: "127.0.0.1".into(),
            port: 9,
            connect_timeout_secs: 2,
            ..RemoteConfig::default()
        });
        let err = connector.connect().err().unwrap();
        assert!(
            matches!(err, RemoteError::Connect { .. } | RemoteError::Timeout(_)),
            "{err:?}"
        );
    }
}
