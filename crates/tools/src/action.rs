//! The closed action vocabulary shared by router, policy and executor.
//!
//! Two shapes exist on purpose:
//!
//! * [`ProposedAction`] is what crosses the classifier boundary: a JSON object
//!   with an `action` name and loosely-typed parameters.  Nothing about it is
//!   trusted.
//! * [`Action`] is the typed sum produced by the policy validator.  Holding an
//!   `Action` means the kind is allowlisted and its parameters are normalized.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── ActionKind ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    GetDiskFree,
    GetRamUsage,
    GetCpuUsage,
    GetUptime,
    TailNginxError,
    TailNginxAccess,
    ListWorkspaceFiles,
    CreateTextFile,
    ReadTextFile,
    AskClarification,
    Refuse,
}

impl ActionKind {
    pub const ALL: [ActionKind; 11] = [
        ActionKind::GetDiskFree,
        ActionKind::GetRamUsage,
        ActionKind::GetCpuUsage,
        ActionKind::GetUptime,
        ActionKind::TailNginxError,
        ActionKind::TailNginxAccess,
        ActionKind::ListWorkspaceFiles,
        ActionKind::CreateTextFile,
        ActionKind::ReadTextFile,
        ActionKind::AskClarification,
        ActionKind::Refuse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::GetDiskFree => "get_disk_free",
            ActionKind::GetRamUsage => "get_ram_usage",
            ActionKind::GetCpuUsage => "get_cpu_usage",
            ActionKind::GetUptime => "get_uptime",
            ActionKind::TailNginxError => "tail_nginx_error",
            ActionKind::TailNginxAccess => "tail_nginx_access",
            ActionKind::ListWorkspaceFiles => "list_workspace_files",
            ActionKind::CreateTextFile => "create_text_file",
            ActionKind::ReadTextFile => "read_text_file",
            ActionKind::AskClarification => "ask_clarification",
            ActionKind::Refuse => "refuse",
        }
    }

    /// Allowlist lookup.  Exact, case-sensitive match on the wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Meta-actions end the turn without touching the remote host.
    pub fn is_meta(self) -> bool {
        matches!(self, ActionKind::AskClarification | ActionKind::Refuse)
    }

    pub fn is_log_tail(self) -> bool {
        matches!(self, ActionKind::TailNginxError | ActionKind::TailNginxAccess)
    }

    pub fn is_file(self) -> bool {
        matches!(self, ActionKind::CreateTextFile | ActionKind::ReadTextFile)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ProposedAction ───────────────────────────────────────────────────────────

/// An unvalidated `{"action": "...", ...params}` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    #[serde(default)]
    pub action: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ProposedAction {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn clarification(question: impl Into<String>) -> Self {
        Self::new(ActionKind::AskClarification.as_str()).with("question", question.into())
    }

    pub fn refusal(reason: impl Into<String>) -> Self {
        Self::new(ActionKind::Refuse.as_str()).with("reason", reason.into())
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// String parameter, or `None` when missing or not a string.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

impl From<Action> for ProposedAction {
    fn from(action: Action) -> Self {
        let kind = action.kind();
        let base = ProposedAction::new(kind.as_str());
        match action {
            Action::TailNginxError { lines } | Action::TailNginxAccess { lines } => {
                base.with("lines", lines)
            }
            Action::CreateTextFile { filename, content } => {
                base.with("filename", filename).with("content", content)
            }
            Action::ReadTextFile { filename } => base.with("filename", filename),
            Action::AskClarification { question } => base.with("question", question),
            Action::Refuse { reason } => base.with("reason", reason),
            Action::GetDiskFree
            | Action::GetRamUsage
            | Action::GetCpuUsage
            | Action::GetUptime
            | Action::ListWorkspaceFiles => base,
        }
    }
}

// ── Action ───────────────────────────────────────────────────────────────────

/// A policy-approved action.  Each variant carries exactly its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    GetDiskFree,
    GetRamUsage,
    GetCpuUsage,
    GetUptime,
    TailNginxError { lines: u32 },
    TailNginxAccess { lines: u32 },
    ListWorkspaceFiles,
    CreateTextFile { filename: String, content: String },
    ReadTextFile { filename: String },
    AskClarification { question: String },
    Refuse { reason: String },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::GetDiskFree => ActionKind::GetDiskFree,
            Action::GetRamUsage => ActionKind::GetRamUsage,
            Action::GetCpuUsage => ActionKind::GetCpuUsage,
            Action::GetUptime => ActionKind::GetUptime,
            Action::TailNginxError { .. } => ActionKind::TailNginxError,
            Action::TailNginxAccess { .. } => ActionKind::TailNginxAccess,
            Action::ListWorkspaceFiles => ActionKind::ListWorkspaceFiles,
            Action::CreateTextFile { .. } => ActionKind::CreateTextFile,
            Action::ReadTextFile { .. } => ActionKind::ReadTextFile,
            Action::AskClarification { .. } => ActionKind::AskClarification,
            Action::Refuse { .. } => ActionKind::Refuse,
        }
    }

    pub fn is_meta(&self) -> bool {
        self.kind().is_meta()
    }

    pub fn refuse(reason: impl Into<String>) -> Self {
        Action::Refuse {
            reason: reason.into(),
        }
    }

    pub fn clarify(question: impl Into<String>) -> Self {
        Action::AskClarification {
            question: question.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_accepts_every_wire_name_and_nothing_else() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActionKind::parse("run_shell"), None);
        assert_eq!(ActionKind::parse("GET_DISK_FREE"), None);
        assert_eq!(ActionKind::parse(""), None);
    }

    #[test]
    fn kind_classification() {
        assert!(ActionKind::Refuse.is_meta());
        assert!(ActionKind::AskClarification.is_meta());
        assert!(!ActionKind::GetUptime.is_meta());
        assert!(ActionKind::TailNginxAccess.is_log_tail());
        assert!(!ActionKind::ReadTextFile.is_log_tail());
        assert!(ActionKind::CreateTextFile.is_file());
        assert!(!ActionKind::ListWorkspaceFiles.is_file());
    }

    #[test]
    fn proposed_action_parses_loose_wire_json() {
        let proposed: ProposedAction =
            serde_json::from_value(json!({"action": "tail_nginx_error", "lines": "abc"})).unwrap();
        assert_eq!(proposed.action, "tail_nginx_error");
        assert_eq!(proposed.param("lines"), Some(&json!("abc")));
        assert_eq!(proposed.str_param("lines"), Some("abc"));
    }

    #[test]
    fn proposed_action_without_name_defaults_to_empty() {
        let proposed: ProposedAction = serde_json::from_value(json!({"lines": 3})).unwrap();
        assert_eq!(proposed.action, "");
    }

    #[test]
    fn action_serializes_with_action_tag() {
        let value = serde_json::to_value(Action::TailNginxAccess { lines: 80 }).unwrap();
        assert_eq!(value, json!({"action": "tail_nginx_access", "lines": 80}));
        let value = serde_json::to_value(Action::GetDiskFree).unwrap();
        assert_eq!(value, json!({"action": "get_disk_free"}));
    }

    #[test]
    fn typed_action_renders_to_matching_wire_form() {
        let action = Action::CreateTextFile {
            filename: "note.txt".into(),
            content: "hello world".into(),
        };
        let proposed = ProposedAction::from(action.clone());
        assert_eq!(
            serde_json::to_value(&proposed).unwrap(),
            serde_json::to_value(&action).unwrap()
        );
    }

    #[test]
    fn clarification_and_refusal_constructors() {
        let q = ProposedAction::clarification("Which log?");
        assert_eq!(q.action, "ask_clarification");
        assert_eq!(q.str_param("question"), Some("Which log?"));
        let r = ProposedAction::refusal("no");
        assert_eq!(r.action, "refuse");
        assert_eq!(r.str_param("reason"), Some("no"));
    }
}
