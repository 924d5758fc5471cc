pub mod action;
pub mod outcome;

pub use action::{Action, ActionKind, ProposedAction};
pub use outcome::{ToolErrorKind, ToolOutcome};

use serde::{Deserialize, Serialize};

// ── Vocabulary specs ─────────────────────────────────────────────────────────

/// JSON-friendly type hint for an action parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Integer,
}

/// Rich metadata about an action kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Whether the action leaves the remote host unchanged.
    pub read_only: bool,
    /// `"metrics"`, `"logs"`, `"workspace"` or `"meta"`.
    pub group: String,
    /// Example wire objects, one JSON object per entry.
    pub examples: Vec<String>,
}

/// Describes a single parameter that an action accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub required: bool,
    #[serde(default)]
    pub param_type: ParamType,
    /// Default value expressed as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ToolParam {
    /// Required string parameter.
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
            param_type: ParamType::String,
            default: None,
        }
    }

    /// Optional integer parameter with a default.
    pub fn integer(
        name: impl Into<String>,
        description: impl Into<String>,
        default: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
            param_type: ParamType::Integer,
            default: Some(default.into()),
        }
    }
}

/// Static description of one action kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
    #[serde(default)]
    pub metadata: ToolMetadata,
}

impl ActionKind {
    pub fn spec(self) -> ToolSpec {
        let (description, params, group, examples): (&str, Vec<ToolParam>, &str, &[&str]) =
            match self {
                ActionKind::GetDiskFree => (
                    "Free and used space on the root filesystem.",
                    vec![],
                    "metrics",
                    &[r#"{"action":"get_disk_free"}"#],
                ),
                ActionKind::GetRamUsage => (
                    "Memory usage summary.",
                    vec![],
                    "metrics",
                    &[r#"{"action":"get_ram_usage"}"#],
                ),
                ActionKind::GetCpuUsage => (
                    "Current CPU utilisation.",
                    vec![],
                    "metrics",
                    &[r#"{"action":"get_cpu_usage"}"#],
                ),
                ActionKind::GetUptime => (
                    "How long the server has been running, plus load averages.",
                    vec![],
                    "metrics",
                    &[r#"{"action":"get_uptime"}"#],
                ),
                ActionKind::TailNginxError => (
                    "Last lines of the nginx error log.",
                    vec![ToolParam::integer("lines", "Number of lines (1-200)", "50")],
                    "logs",
                    &[r#"{"action":"tail_nginx_error","lines":50}"#],
                ),
                ActionKind::TailNginxAccess => (
                    "Last lines of the nginx access log (site visits).",
                    vec![ToolParam::integer("lines", "Number of lines (1-200)", "50")],
                    "logs",
                    &[r#"{"action":"tail_nginx_access","lines":80}"#],
                ),
                ActionKind::ListWorkspaceFiles => (
                    "List the files in the workspace directory.",
                    vec![],
                    "workspace",
                    &[r#"{"action":"list_workspace_files"}"#],
                ),
                ActionKind::CreateTextFile => (
                    "Create or overwrite a text file in the workspace.",
                    vec![
                        ToolParam::required("filename", "Plain file name, no directories"),
                        ToolParam::required("content", "Text to write"),
                    ],
                    "workspace",
                    &[r#"{"action":"create_text_file","filename":"note.txt","content":"hello world"}"#],
                ),
                ActionKind::ReadTextFile => (
                    "Read a text file from the workspace.",
                    vec![ToolParam::required("filename", "Plain file name, no directories")],
                    "workspace",
                    &[r#"{"action":"read_text_file","filename":"note.txt"}"#],
                ),
                ActionKind::AskClarification => (
                    "Ask the user a follow-up question instead of acting.",
                    vec![ToolParam::required("question", "Question for the user")],
                    "meta",
                    &[r#"{"action":"ask_clarification","question":"Do you want nginx error log or access log (visits)?"}"#],
                ),
                ActionKind::Refuse => (
                    "Decline the request.",
                    vec![ToolParam::required("reason", "Why the request is declined")],
                    "meta",
                    &[r#"{"action":"refuse","reason":"Destructive actions are disabled for safety."}"#],
                ),
            };

        ToolSpec {
            name: self.as_str().to_string(),
            description: description.to_string(),
            params,
            metadata: ToolMetadata {
                read_only: self != ActionKind::CreateTextFile,
                group: group.to_string(),
                examples: examples.iter().map(|e| (*e).to_string()).collect(),
            },
        }
    }
}

/// Specs for the whole vocabulary, in canonical order.
pub fn vocabulary() -> Vec<ToolSpec> {
    ActionKind::ALL.into_iter().map(ActionKind::spec).collect()
}
