//! Typed result of a single tool invocation.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// The remote host could not be reached or authentication failed.
    Connection,
    Timeout,
    /// The remote user lacks permission; `detail` carries the remediation.
    PermissionDenied,
    NotFound,
    /// The command ran but exited non-zero.
    CommandFailed,
    InvalidInput,
    /// SFTP open/read/write failed.
    Transfer,
    /// A meta-action or otherwise non-runnable action reached the executor.
    NotExecutable,
}

impl ToolErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorKind::Connection => "connection",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::PermissionDenied => "permission_denied",
            ToolErrorKind::NotFound => "not_found",
            ToolErrorKind::CommandFailed => "command_failed",
            ToolErrorKind::InvalidInput => "invalid_input",
            ToolErrorKind::Transfer => "transfer",
            ToolErrorKind::NotExecutable => "not_executable",
        }
    }
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Success or failure is carried by the variant, never by the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok { text: String },
    Error { kind: ToolErrorKind, detail: String },
}

impl ToolOutcome {
    pub fn ok(text: impl Into<String>) -> Self {
        ToolOutcome::Ok { text: text.into() }
    }

    pub fn error(kind: ToolErrorKind, detail: impl Into<String>) -> Self {
        ToolOutcome::Error {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ToolOutcome::Ok { .. })
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match self {
            ToolOutcome::Ok { .. } => None,
            ToolOutcome::Error { kind, .. } => Some(*kind),
        }
    }

    /// Short status label for logs and tool-run records.
    pub fn status_label(&self) -> &'static str {
        if self.is_ok() { "ok" } else { "error" }
    }

    /// Human-oriented rendering handed to the formatter.
    ///
    /// Permission, not-found and not-executable details are already complete
    /// sentences; other failures get an `Error:` prefix.
    pub fn text(&self) -> String {
        match self {
            ToolOutcome::Ok { text } => text.clone(),
            ToolOutcome::Error { kind, detail } => match kind {
                ToolErrorKind::PermissionDenied
                | ToolErrorKind::NotFound
                | ToolErrorKind::NotExecutable => detail.clone(),
                _ => format!("Error: {detail}"),
            },
        }
    }
}
