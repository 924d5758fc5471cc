//! Safety policy: validates every proposed action before execution.
//!
//! The router is not a safety boundary: its output comes from a keyword
//! table or a language model.  [`check`] re-validates every proposal against
//! the user's original wording and returns a typed [`Action`] that is either
//! approved (possibly with normalized parameters) or rewritten into a
//! refusal.  The function is pure: same input, same output, no state.

use serde_json::Value;
use tracing::{debug, warn};

use opsmate_config::PolicyConfig;
use opsmate_tools::{Action, ActionKind, ProposedAction};

pub const DESTRUCTIVE_REASON: &str =
    "Destructive actions (delete, stop, restart, remove, etc.) are disabled for safety.";
pub const FORBIDDEN_PATH_REASON: &str = "Access to that path is not allowed for security reasons.";

const DEFAULT_FILENAME: &str = "note.txt";
const DEFAULT_QUESTION: &str = "Could you clarify?";
const DEFAULT_REASON: &str = "This action is not allowed.";

/// Validate with the built-in policy tables.
pub fn check(proposed: &ProposedAction, user_text: &str) -> Action {
    check_with(&PolicyConfig::default(), proposed, user_text)
}

/// Validate with explicit policy tables.
///
/// Rules, first hit wins:
/// 1. unknown action name → refuse
/// 2. destructive wording in `user_text` on a non-meta action → refuse
/// 3. forbidden, traversing or absolute filename on a file action → refuse
/// 4. log tails get `lines` clamped into `[1, lines_max]`
pub fn check_with(policy: &PolicyConfig, proposed: &ProposedAction, user_text: &str) -> Action {
    let Some(kind) = ActionKind::parse(&proposed.action) else {
        warn!(tool = %proposed.action, "policy: unknown tool refused");
        return Action::refuse(format!(
            "Tool '{}' is not available. I can only use approved tools.",
            proposed.action
        ));
    };

    if !kind.is_meta() && has_destructive_intent(policy, user_text) {
        warn!(tool = %kind, "policy: destructive wording refused");
        return Action::refuse(DESTRUCTIVE_REASON);
    }

    if kind.is_file() {
        if let Some(filename) = proposed.str_param("filename") {
            if is_forbidden_path(policy, filename) {
                warn!(tool = %kind, filename, "policy: forbidden path refused");
                return Action::refuse(FORBIDDEN_PATH_REASON);
            }
        }
    }

    let action = build_action(policy, kind, proposed);
    debug!(?action, "policy: approved");
    action
}

/// Case-insensitive substring screen over the user's wording.
pub fn has_destructive_intent(policy: &PolicyConfig, user_text: &str) -> bool {
    let lowered = user_text.to_lowercase();
    policy
        .destructive_keywords
        .iter()
        .any(|keyword| lowered.contains(keyword.as_str()))
}

/// Heuristic filename screen.  Not canonicalizing: encoded sequences and
/// symlinks inside the workspace are not detected here.
pub fn is_forbidden_path(policy: &PolicyConfig, filename: &str) -> bool {
    filename.contains("..")
        || filename.starts_with('/')
        || policy
            .forbidden_paths
            .iter()
            .any(|forbidden| filename.contains(forbidden.as_str()))
}

/// Normalize a `lines` value.  Never rejects.
pub fn clamp_lines(policy: &PolicyConfig, value: Option<&Value>) -> u32 {
    let max = u64::from(policy.lines_max);
    match value.and_then(Value::as_u64) {
        Some(0) | None => policy.lines_default,
        Some(n) if n > max => policy.lines_max,
        Some(n) => n as u32,
    }
}

fn build_action(policy: &PolicyConfig, kind: ActionKind, proposed: &ProposedAction) -> Action {
    let text = |key: &str, fallback: &str| {
        proposed
            .str_param(key)
            .map(ToString::to_string)
            .unwrap_or_else(|| fallback.to_string())
    };

    match kind {
        ActionKind::GetDiskFree => Action::GetDiskFree,
        ActionKind::GetRamUsage => Action::GetRamUsage,
        ActionKind::GetCpuUsage => Action::GetCpuUsage,
        ActionKind::GetUptime => Action::GetUptime,
        ActionKind::TailNginxError => Action::TailNginxError {
            lines: clamp_lines(policy, proposed.param("lines")),
        },
        ActionKind::TailNginxAccess => Action::TailNginxAccess {
            lines: clamp_lines(policy, proposed.param("lines")),
        },
        ActionKind::ListWorkspaceFiles => Action::ListWorkspaceFiles,
        ActionKind::CreateTextFile => Action::CreateTextFile {
            filename: text("filename", DEFAULT_FILENAME),
            content: text("content", ""),
        },
        ActionKind::ReadTextFile => Action::ReadTextFile {
            filename: text("filename", ""),
        },
        ActionKind::AskClarification => Action::AskClarification {
            question: text("question", DEFAULT_QUESTION),
        },
        ActionKind::Refuse => Action::Refuse {
            reason: text("reason", DEFAULT_REASON),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tail_error(lines: Value) -> ProposedAction {
        ProposedAction::new("tail_nginx_error").with("lines", lines)
    }

    fn lines_of(action: &Action) -> u32 {
        match action {
            Action::TailNginxError { lines } | Action::TailNginxAccess { lines } => *lines,
            other => panic!("expected a log tail, got {other:?}"),
        }
    }

    fn is_refusal(action: &Action) -> bool {
        matches!(action, Action::Refuse { .. })
    }

    // ── Allowlist ──────────────────────────────────────────────────────────

    #[test]
    fn unknown_tool_is_refused_regardless_of_text() {
        for text in ["", "how much disk space is left", "please run it"] {
            let action = check(&ProposedAction::new("run_shell"), text);
            assert_eq!(
                action,
                Action::refuse("Tool 'run_shell' is not available. I can only use approved tools.")
            );
        }
    }

    #[test]
    fn missing_tool_name_is_refused() {
        let proposed: ProposedAction = serde_json::from_value(json!({"lines": 5})).unwrap();
        assert!(is_refusal(&check(&proposed, "show logs")));
    }

    // ── Destructive wording ────────────────────────────────────────────────

    #[test]
    fn destructive_wording_overrides_benign_action() {
        let action = check(&ProposedAction::new("get_disk_free"), "please delete the access log");
        assert_eq!(action, Action::refuse(DESTRUCTIVE_REASON));
    }

    #[test]
    fn destructive_screen_is_case_insensitive() {
        let action = check(&ProposedAction::new("get_uptime"), "REBOOT the box and tell me uptime");
        assert!(is_refusal(&action));
    }

    #[test]
    fn destructive_screen_matches_substrings() {
        // "rm" inside "inform" trips the screen.
        let action = check(&ProposedAction::new("get_ram_usage"), "inform me about memory");
        assert!(is_refusal(&action));
    }

    #[test]
    fn meta_actions_pass_destructive_screen() {
        let clarify = ProposedAction::clarification("Which file do you mean?");
        assert_eq!(
            check(&clarify, "delete my file"),
            Action::clarify("Which file do you mean?")
        );
        let refuse = ProposedAction::refusal("Nope.");
        assert_eq!(check(&refuse, "kill nginx"), Action::refuse("Nope."));
    }

    // ── Path screen ────────────────────────────────────────────────────────

    #[test]
    fn forbidden_filenames_are_refused() {
        for filename in [
            ".env",
            "config/.env.local",
            "id_rsa",
            "backup_id_ed25519.pub",
            "../notes.txt",
            "a/../../b",
            "/etc/hostname",
            "authorized_keys",
            "known_hosts",
            "~/.ssh/config",
        ] {
            let read = ProposedAction::new("read_text_file").with("filename", filename);
            assert_eq!(check(&read, "show me that file"), Action::refuse(FORBIDDEN_PATH_REASON), "{filename}");
            let write = ProposedAction::new("create_text_file")
                .with("filename", filename)
                .with("content", "x");
            assert!(is_refusal(&check(&write, "write that file")), "{filename}");
        }
    }

    #[test]
    fn plain_workspace_filenames_pass() {
        let read = ProposedAction::new("read_text_file").with("filename", "notes.txt");
        assert_eq!(
            check(&read, "open notes"),
            Action::ReadTextFile {
                filename: "notes.txt".into()
            }
        );
    }

    #[test]
    fn path_screen_only_applies_to_file_actions() {
        let proposed = ProposedAction::new("get_uptime").with("filename", ".env");
        assert_eq!(check(&proposed, "uptime please"), Action::GetUptime);
    }

    #[test]
    fn missing_file_parameters_take_defaults() {
        let create = check(&ProposedAction::new("create_text_file"), "make a note");
        assert_eq!(
            create,
            Action::CreateTextFile {
                filename: "note.txt".into(),
                content: String::new()
            }
        );
        let read = check(&ProposedAction::new("read_text_file"), "open it");
        assert_eq!(read, Action::ReadTextFile { filename: String::new() });
    }

    // ── Line clamping ──────────────────────────────────────────────────────

    #[test]
    fn invalid_line_counts_clamp_to_default() {
        for value in [json!(0), json!(-5), json!("abc"), Value::Null, json!(12.5), json!(true)] {
            let action = check(&tail_error(value.clone()), "show nginx errors");
            assert_eq!(lines_of(&action), 20, "{value}");
        }
        let missing = check(&ProposedAction::new("tail_nginx_access"), "show nginx access");
        assert_eq!(lines_of(&missing), 20);
    }

    #[test]
    fn oversized_line_counts_clamp_to_max() {
        for value in [json!(201), json!(5000), json!(u64::MAX)] {
            assert_eq!(lines_of(&check(&tail_error(value), "errors")), 200);
        }
    }

    #[test]
    fn in_range_line_counts_pass_through() {
        for n in [1u32, 20, 50, 199, 200] {
            assert_eq!(lines_of(&check(&tail_error(json!(n)), "errors")), n);
        }
    }

    #[test]
    fn custom_policy_tables_are_respected() {
        let policy = PolicyConfig {
            destructive_keywords: vec!["nuke".into()],
            lines_default: 10,
            lines_max: 40,
            ..PolicyConfig::default()
        };
        assert_eq!(
            check_with(&policy, &ProposedAction::new("get_disk_free"), "delete stuff"),
            Action::GetDiskFree
        );
        assert!(is_refusal(&check_with(&policy, &ProposedAction::new("get_disk_free"), "nuke it")));
        assert_eq!(lines_of(&check_with(&policy, &tail_error(json!(0)), "x")), 10);
        assert_eq!(lines_of(&check_with(&policy, &tail_error(json!(99)), "x")), 40);
    }

    // ── Idempotence ────────────────────────────────────────────────────────

    #[test]
    fn second_pass_over_output_is_a_no_op() {
        let cases = [
            (ProposedAction::new("get_cpu_usage"), "cpu?"),
            (tail_error(json!("abc")), "nginx error"),
            (tail_error(json!(900)), "nginx error"),
            (ProposedAction::new("create_text_file").with("filename", "a.txt"), "make a.txt"),
            (ProposedAction::new("read_text_file").with("filename", ".env"), "read .env"),
            (ProposedAction::new("format_disk"), "format disk"),
            (ProposedAction::new("get_disk_free"), "delete the logs"),
            (ProposedAction::clarification("Which log?"), "show me the nginx log"),
        ];
        for (proposed, text) in cases {
            let first = check(&proposed, text);
            let second = check(&ProposedAction::from(first.clone()), text);
            assert_eq!(first, second, "{proposed:?} / {text}");
        }
    }

    #[test]
    fn repeated_calls_are_deterministic() {
        let proposed = ProposedAction::new("read_text_file").with("filename", "id_rsa");
        let a = check(&proposed, "read my key");
        let b = check(&proposed, "read my key");
        assert_eq!(a, b);
    }
}
