pub mod builtins;
pub mod error;
pub mod policy;
pub mod remote;
pub mod ssh;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use opsmate_config::{PolicyConfig, RemoteConfig};
use opsmate_tools::{Action, ToolErrorKind, ToolOutcome};

use builtins::{NginxLog, ToolContext};

pub use error::RemoteError;
pub use remote::{CommandOutput, Connector, RemoteSession};
pub use ssh::SshConnector;

// ── Remote Executor ──────────────────────────────────────────────────────────

/// Runs policy-approved actions on the remote host.
///
/// Every call opens its own session through the [`Connector`] and drops it
/// before returning.  Blocking transport work runs on the blocking pool and
/// the whole invocation is bounded by a deadline derived from the connect and
/// command timeouts.
pub struct RemoteExecutor<C: Connector> {
    connector: Arc<C>,
    ctx: ToolContext,
    deadline: Duration,
}

impl<C: Connector> RemoteExecutor<C> {
    pub fn new(connector: C, remote: &RemoteConfig, policy: &PolicyConfig) -> Self {
        // Uptime may issue a second command after the first one fails.
        let secs = remote
            .connect_timeout_secs
            .saturating_add(remote.command_timeout_secs.saturating_mul(2));
        Self {
            connector: Arc::new(connector),
            ctx: ToolContext {
                workdir: remote.workdir.clone(),
                username: remote.username.clone(),
                lines_max: policy.lines_max,
            },
            deadline: Duration::from_secs(secs.max(1)),
        }
    }

    /// Override the overall per-invocation deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Execute one action.  Never fails: every error becomes an
    /// [`ToolOutcome::Error`] with a classified kind.
    pub async fn execute(&self, action: &Action) -> ToolOutcome {
        if action.is_meta() {
            return ToolOutcome::error(
                ToolErrorKind::NotExecutable,
                format!("Unknown tool: {}", action.kind()),
            );
        }

        let kind = action.kind();
        info!(tool = %kind, "executing remote tool");

        let connector = Arc::clone(&self.connector);
        let ctx = self.ctx.clone();
        let action = action.clone();
        let task = tokio::task::spawn_blocking(move || run_action(connector.as_ref(), &ctx, &action));

        let outcome = match tokio::time::timeout(self.deadline, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => ToolOutcome::error(
                ToolErrorKind::CommandFailed,
                format!("tool task failed: {join_err}"),
            ),
            Err(_) => ToolOutcome::error(
                ToolErrorKind::Timeout,
                format!("{kind} did not finish within {}s", self.deadline.as_secs()),
            ),
        };

        match outcome.error_kind() {
            None => info!(tool = %kind, "remote tool finished"),
            Some(error_kind) => warn!(tool = %kind, %error_kind, "remote tool failed"),
        }
        outcome
    }
}

fn run_action(connector: &dyn Connector, ctx: &ToolContext, action: &Action) -> ToolOutcome {
    let mut session = match connector.connect() {
        Ok(session) => session,
        Err(err) => return err.into(),
    };
    let session = session.as_mut();

    let result = match action {
        Action::GetDiskFree => builtins::disk_free(session),
        Action::GetRamUsage => builtins::ram_usage(session),
        Action::GetCpuUsage => builtins::cpu_usage(session),
        Action::GetUptime => builtins::uptime(session),
        Action::TailNginxError { lines } => builtins::tail_nginx(session, ctx, NginxLog::Error, *lines),
        Action::TailNginxAccess { lines } => {
            builtins::tail_nginx(session, ctx, NginxLog::Access, *lines)
        }
        Action::ListWorkspaceFiles => builtins::list_workspace(session, ctx),
        Action::CreateTextFile { filename, content } => {
            builtins::create_file(session, ctx, filename, content)
        }
        Action::ReadTextFile { filename } => builtins::read_file(session, ctx, filename),
        Action::AskClarification { .. } | Action::Refuse { .. } => {
            return ToolOutcome::error(
                ToolErrorKind::NotExecutable,
                format!("Unknown tool: {}", action.kind()),
            );
        }
    };
    result.unwrap_or_else(ToolOutcome::from)
}
