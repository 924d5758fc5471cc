//! Transport seam between the executor and the remote host.
//!
//! Both traits are blocking; the executor drives them from
//! `tokio::task::spawn_blocking`.

use crate::error::RemoteError;

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr when present, otherwise stdout.  Used for failure details.
    pub fn error_text(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// One authenticated session.  Dropping it disconnects.
pub trait RemoteSession: Send {
    /// Run a fixed command string.  Output is trimmed and lossily decoded.
    fn exec(&mut self, command: &str) -> Result<CommandOutput, RemoteError>;

    /// Create `path` as a directory when it does not exist yet.
    fn ensure_dir(&mut self, path: &str) -> Result<(), RemoteError>;

    /// Create or truncate `path` over the file-transfer channel.
    fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<(), RemoteError>;

    /// Read `path` over the file-transfer channel.  Missing files are
    /// reported as [`RemoteError::NotFound`].
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Opens a fresh session per tool invocation.  No pooling.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError>;
}
