//! Remote tool implementations.  One function per executable action kind,
//! each a fixed command string or a file-transfer call over an open session.

use std::fmt;

use tracing::{debug, warn};

use opsmate_tools::{ToolErrorKind, ToolOutcome};

use crate::error::RemoteError;
use crate::remote::RemoteSession;

const NGINX_LOG_DIR: &str = "/var/log/nginx";
const CPU_COMMAND: &str =
    "top -bn1 | grep 'Cpu(s)' | awk '{print $2+$4\"%\"}' || cat /proc/loadavg";

/// Per-invocation facts the tools need about the remote side.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub workdir: String,
    pub username: String,
    pub lines_max: u32,
}

type ToolResult = Result<ToolOutcome, RemoteError>;

impl From<RemoteError> for ToolOutcome {
    fn from(err: RemoteError) -> Self {
        ToolOutcome::error(err.kind(), err.to_string())
    }
}

// ── Metrics ──────────────────────────────────────────────────────────────────

/// One `df -h` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskUsage {
    pub filesystem: String,
    pub total: String,
    pub used: String,
    pub free: String,
    pub use_percent: String,
}

impl DiskUsage {
    /// Parse the whitespace-separated row; `None` with fewer than five fields.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        Some(Self {
            filesystem: fields.next()?.to_string(),
            total: fields.next()?.to_string(),
            used: fields.next()?.to_string(),
            free: fields.next()?.to_string(),
            use_percent: fields.next()?.to_string(),
        })
    }
}

impl fmt::Display for DiskUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Filesystem: {}\nTotal: {}  Used: {}  Free: {}  Use%: {}",
            self.filesystem, self.total, self.used, self.free, self.use_percent
        )
    }
}

pub fn disk_free(session: &mut dyn RemoteSession) -> ToolResult {
    let out = session.exec("df -h / | tail -1")?;
    if !out.success() {
        return Ok(command_failed(out.error_text()));
    }
    let text = match DiskUsage::parse(&out.stdout) {
        Some(usage) => usage.to_string(),
        None => out.stdout,
    };
    Ok(ToolOutcome::ok(text))
}

pub fn ram_usage(session: &mut dyn RemoteSession) -> ToolResult {
    let out = session.exec("free -h")?;
    if !out.success() {
        return Ok(command_failed(out.error_text()));
    }
    Ok(ToolOutcome::ok(out.stdout))
}

pub fn cpu_usage(session: &mut dyn RemoteSession) -> ToolResult {
    let out = session.exec(CPU_COMMAND)?;
    if !out.success() {
        return Ok(command_failed(out.error_text()));
    }
    if out.stdout.is_empty() {
        return Ok(ToolOutcome::ok("Unable to read CPU usage."));
    }
    Ok(ToolOutcome::ok(out.stdout))
}

/// `uptime -p` is missing on some busybox hosts; fall back to plain `uptime`.
pub fn uptime(session: &mut dyn RemoteSession) -> ToolResult {
    let mut out = session.exec("uptime -p && uptime")?;
    if !out.success() {
        debug!(code = out.exit_code, "uptime -p failed, retrying plain uptime");
        out = session.exec("uptime")?;
    }
    if out.stdout.is_empty() {
        return Ok(command_failed(&out.stderr));
    }
    Ok(ToolOutcome::ok(out.stdout))
}

// ── Logs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NginxLog {
    Error,
    Access,
}

impl NginxLog {
    fn name(self) -> &'static str {
        match self {
            NginxLog::Error => "error",
            NginxLog::Access => "access",
        }
    }

    pub fn path(self) -> String {
        format!("{NGINX_LOG_DIR}/{}.log", self.name())
    }
}

pub fn tail_nginx(
    session: &mut dyn RemoteSession,
    ctx: &ToolContext,
    log: NginxLog,
    lines: u32,
) -> ToolResult {
    let lines = lines.clamp(1, ctx.lines_max.max(1));
    let out = session.exec(&format!("tail -n {lines} {} 2>&1", log.path()))?;

    let denied = out.stdout.contains("Permission denied") || out.stderr.contains("Permission denied");
    // Error logs quote "No such file" for missing assets; only a failed tail means the log is gone.
    if !denied && !out.success() && out.error_text().contains("No such file") {
        return Ok(ToolOutcome::error(
            ToolErrorKind::NotFound,
            format!("Nginx {} log not found at {}.", log.name(), log.path()),
        ));
    }
    if denied || out.exit_code == 1 {
        warn!(log = log.name(), user = %ctx.username, "nginx log not readable");
        return Ok(ToolOutcome::error(
            ToolErrorKind::PermissionDenied,
            permission_hint(log, &ctx.username),
        ));
    }
    if !out.success() {
        return Ok(command_failed(out.error_text()));
    }
    if out.stdout.is_empty() {
        return Ok(ToolOutcome::ok(match log {
            NginxLog::Error => "Nginx error log is empty.",
            NginxLog::Access => "Nginx access log is empty.",
        }));
    }
    Ok(ToolOutcome::ok(out.stdout))
}

pub fn permission_hint(log: NginxLog, username: &str) -> String {
    format!(
        "I can't read the nginx {} log due to file permissions.\n\
         To fix this, the server admin can run:\n  \
         `sudo usermod -aG adm {username}`\n\
         Then log out and back in.",
        log.name()
    )
}

// ── Workspace ────────────────────────────────────────────────────────────────

pub fn list_workspace(session: &mut dyn RemoteSession, ctx: &ToolContext) -> ToolResult {
    let out = session.exec(&format!("ls -lh {} 2>&1", shell_quote(&ctx.workdir)))?;
    if !out.success() {
        return Ok(ToolOutcome::error(
            ToolErrorKind::CommandFailed,
            format!("listing workspace: {}", out.error_text()),
        ));
    }
    if out.stdout.is_empty() {
        return Ok(ToolOutcome::ok("Workspace is empty."));
    }
    Ok(ToolOutcome::ok(out.stdout))
}

pub fn create_file(
    session: &mut dyn RemoteSession,
    ctx: &ToolContext,
    filename: &str,
    content: &str,
) -> ToolResult {
    let Some(name) = sanitize_filename(filename) else {
        return Ok(invalid_filename());
    };
    session.ensure_dir(&ctx.workdir)?;
    session.write_file(&workspace_path(&ctx.workdir, &name), content.as_bytes())?;
    Ok(ToolOutcome::ok(format!(
        "File '{filename}' created successfully in workspace."
    )))
}

pub fn read_file(session: &mut dyn RemoteSession, ctx: &ToolContext, filename: &str) -> ToolResult {
    let Some(name) = sanitize_filename(filename) else {
        return Ok(invalid_filename());
    };
    let bytes = match session.read_file(&workspace_path(&ctx.workdir, &name)) {
        Ok(bytes) => bytes,
        Err(RemoteError::NotFound(_)) => {
            return Ok(ToolOutcome::error(
                ToolErrorKind::NotFound,
                format!("File '{filename}' not found in workspace."),
            ));
        }
        Err(err) => return Err(err),
    };
    if bytes.is_empty() {
        return Ok(ToolOutcome::ok("(File is empty)"));
    }
    Ok(ToolOutcome::ok(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Reduce a requested name to one path component: every `..` is removed and
/// only the last `/`-separated segment is kept.  `None` when nothing is left.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let cleaned = filename.replace("..", "");
    let base = cleaned.rsplit('/').next().unwrap_or_default().trim();
    if base.is_empty() {
        None
    } else {
        Some(base.to_string())
    }
}

/// Single-quote for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn workspace_path(workdir: &str, name: &str) -> String {
    format!("{}/{name}", workdir.trim_end_matches('/'))
}

fn invalid_filename() -> ToolOutcome {
    ToolOutcome::error(ToolErrorKind::InvalidInput, "Invalid filename.")
}

fn command_failed(detail: &str) -> ToolOutcome {
    ToolOutcome::error(ToolErrorKind::CommandFailed, detail)
}
