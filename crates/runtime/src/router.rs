//! Intent router: free text in, one proposed action out.
//!
//! A keyword table answers the common phrasings without a model call.
//! Everything else goes to the classifier, whose reply is parsed leniently.
//! The router is not trusted: its output always passes through the policy.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use opsmate_config::RouterConfig;
use opsmate_llm::{ChatClient, ChatMessage, Role, extract_json_output};
use opsmate_tools::{ActionKind, ProposedAction, vocabulary};

pub const UNPARSEABLE_QUESTION: &str = "I didn't understand that. Could you rephrase?";
pub const CREATE_FILE_QUESTION: &str = "What should the new file be named and contain?";
pub const READ_FILE_QUESTION: &str = "Which workspace file should I read?";

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("static regex"));

pub struct IntentRouter<C: ChatClient> {
    client: Arc<C>,
    config: RouterConfig,
    timeout: Duration,
    system_prompt: String,
}

impl<C: ChatClient> IntentRouter<C> {
    pub fn new(client: Arc<C>, config: RouterConfig, timeout: Duration) -> Self {
        Self {
            client,
            config,
            timeout,
            system_prompt: router_system_prompt(),
        }
    }

    /// Classify `user_text`.  Never fails: classifier errors, timeouts and
    /// unparseable replies all become a clarification request.
    ///
    /// `history` holds prior turns only; the current message is appended
    /// here.
    pub async fn route(&self, user_text: &str, history: &[ChatMessage]) -> ProposedAction {
        if let Some(action) = fallback_action(user_text, self.config.log_lines) {
            info!(action = %action.action, "router: keyword match");
            return action;
        }

        let messages = self.build_messages(user_text, history);
        let reply = match tokio::time::timeout(self.timeout, self.client.chat(&messages, 0.0)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                warn!(error = %err, "router: classifier failed");
                return ProposedAction::clarification(UNPARSEABLE_QUESTION);
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "router: classifier timed out");
                return ProposedAction::clarification(UNPARSEABLE_QUESTION);
            }
        };
        debug!(raw = %reply, "router: classifier reply");

        let action = parse_reply(&reply);
        info!(action = %action.action, "router: classified");
        action
    }

    fn build_messages(&self, user_text: &str, history: &[ChatMessage]) -> Vec<ChatMessage> {
        let dialogue: Vec<&ChatMessage> = history
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .collect();
        let skip = dialogue.len().saturating_sub(self.config.history_window);

        let mut messages = Vec::with_capacity(self.config.history_window + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(dialogue[skip..].iter().map(|m| (*m).clone()));
        messages.push(ChatMessage::user(user_text));
        messages
    }
}

/// Keyword classifier.  Ordered rules, first match wins; `None` when no rule
/// applies.
pub fn fallback_action(user_text: &str, log_lines: u32) -> Option<ProposedAction> {
    let normalized = user_text.to_lowercase();
    let tokens: HashSet<&str> = WORD.find_iter(&normalized).map(|m| m.as_str()).collect();
    let any = |words: &[&str]| words.iter().any(|w| tokens.contains(w));

    let action = if normalized.contains("nginx") && normalized.contains("error") {
        ProposedAction::new(ActionKind::TailNginxError.as_str()).with("lines", log_lines)
    } else if normalized.contains("nginx") && normalized.contains("access") {
        ProposedAction::new(ActionKind::TailNginxAccess.as_str()).with("lines", log_lines)
    } else if any(&["cpu", "processor"]) {
        ProposedAction::new(ActionKind::GetCpuUsage.as_str())
    } else if any(&["ram", "memory"]) {
        ProposedAction::new(ActionKind::GetRamUsage.as_str())
    } else if any(&["disk", "storage", "space"]) {
        ProposedAction::new(ActionKind::GetDiskFree.as_str())
    } else if any(&["uptime", "running"]) {
        ProposedAction::new(ActionKind::GetUptime.as_str())
    } else if normalized.contains("workspace") && any(&["files", "list"]) {
        ProposedAction::new(ActionKind::ListWorkspaceFiles.as_str())
    } else if tokens.contains("create") && tokens.contains("file") {
        ProposedAction::clarification(CREATE_FILE_QUESTION)
    } else if tokens.contains("read") && tokens.contains("file") {
        ProposedAction::clarification(READ_FILE_QUESTION)
    } else {
        return None;
    };
    Some(action)
}

/// Lenient parse of a classifier reply.  Anything that is not an object with
/// a string `action` becomes a clarification request.
pub fn parse_reply(reply: &str) -> ProposedAction {
    let parsed = extract_json_output::<Value>(reply)
        .filter(|value| value.get("action").is_some_and(Value::is_string))
        .and_then(|value| serde_json::from_value::<ProposedAction>(value).ok());
    match parsed {
        Some(action) => action,
        None => {
            warn!("router: unparseable classifier reply");
            ProposedAction::clarification(UNPARSEABLE_QUESTION)
        }
    }
}

/// System prompt listing the vocabulary, the routing rules and one JSON
/// example per action.
pub fn router_system_prompt() -> String {
    let specs = vocabulary();
    let names = specs
        .iter()
        .map(|spec| spec.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let examples = specs
        .iter()
        .flat_map(|spec| spec.metadata.examples.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are an action router for a safe Ops Assistant. The user is non-technical.\n\
         You MUST output ONLY valid JSON and nothing else. No explanation, no markdown, \
         no text before or after.\n\n\
         Choose exactly one action from:\n{names}\n\n\
         Rules:\n\
         - Never output Linux commands.\n\
         - If user asks \"nginx log\" without specifying error or access: ask_clarification.\n\
         - For file creation: if user says \"home\", use workdir. Choose a safe filename from context.\n\
         - If content for file is missing: ask_clarification asking what to write inside.\n\
         - If user asks for delete/remove/stop/restart/kill/format/cleanup: output refuse.\n\
         - Never allow paths outside workdir. Never allow secrets, SSH keys, .env files.\n\
         - For nginx log questions, use lines=50 by default unless user specifies.\n\n\
         Output examples (JSON only):\n{examples}"
    )
}
