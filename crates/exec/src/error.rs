use thiserror::Error;

use opsmate_tools::ToolErrorKind;

/// Transport-level failure talking to the remote host.
///
/// Never leaves this crate as an error: the executor turns it into a
/// [`opsmate_tools::ToolOutcome`] at its boundary.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("could not connect to {addr}: {detail}")]
    Connect { addr: String, detail: String },
    #[error("authentication as '{user}' failed: {detail}")]
    Auth { user: String, detail: String },
    #[error("host key mismatch (expected {expected}, got {observed})")]
    HostKey { expected: String, observed: String },
    #[error("remote operation timed out: {0}")]
    Timeout(String),
    #[error("no such file: {0}")]
    NotFound(String),
    #[error("remote command channel failed: {0}")]
    Channel(String),
    #[error("file transfer failed: {0}")]
    Transfer(String),
}

impl RemoteError {
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            RemoteError::Connect { .. } | RemoteError::Auth { .. } | RemoteError::HostKey { .. } => {
                ToolErrorKind::Connection
            }
            RemoteError::Timeout(_) => ToolErrorKind::Timeout,
            RemoteError::NotFound(_) => ToolErrorKind::NotFound,
            RemoteError::Channel(_) => ToolErrorKind::CommandFailed,
            RemoteError::Transfer(_) => ToolErrorKind::Transfer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_family_maps_to_connection_kind() {
        let err = RemoteError::Connect {
            addr: "10.0.0.1:22".into(),
            detail: "refused".into(),
        };
        assert_eq!(err.kind(), ToolErrorKind::Connection);
        assert_eq!(err.to_string(), "could not connect to 10.0.0.1:22: refused");
        let err = RemoteError::Auth {
            user: "ops".into(),
            detail: "key rejected".into(),
        };
        assert_eq!(err.kind(), ToolErrorKind::Connection);
    }

    #[test]
    fn other_variants_map_to_their_kind() {
        assert_eq!(RemoteError::Timeout("exec".into()).kind(), ToolErrorKind::Timeout);
        assert_eq!(RemoteError::NotFound("/x".into()).kind(), ToolErrorKind::NotFound);
        assert_eq!(RemoteError::Channel("eof".into()).kind(), ToolErrorKind::CommandFailed);
        assert_eq!(RemoteError::Transfer("eof".into()).kind(), ToolErrorKind::Transfer);
    }
}
