//! Turns tool output, clarifications and refusals into the user-facing reply.

use std::time::Duration;

use opsmate_llm::{ChatClient, ChatMessage};
use opsmate_tools::ActionKind;

use crate::best_effort;

const FORMATTER_PROMPT: &str = "You are a friendly Ops Assistant helping a non-technical user.
You are given raw output from a server tool. Your job is to:
1. Explain results in plain English, short and clear.
2. Show key numbers with proper units (GB, MB, %, etc.).
3. For nginx logs: briefly summarize what you see, highlight the last 3-5 relevant lines.
4. Never dump raw command output without explanation.
5. Be warm and helpful. Use bullet points or bold for clarity.
6. If there's an error or permission issue, explain it simply and suggest a fix.
7. Keep answers concise, no more than 150 words unless log analysis requires more.";

const CAPABILITIES: &str = "I can help you with: checking disk, RAM, CPU, uptime, nginx logs, \
and managing files in the workspace.";

const TITLE_MAX_CHARS: usize = 100;
const TITLE_FALLBACK_CHARS: usize = 60;

/// Friendly rendering of a tool result.  Falls back to the raw text in a
/// code fence when the model is unavailable.
pub async fn format_tool_result(
    client: &dyn ChatClient,
    kind: ActionKind,
    raw: &str,
    user_text: &str,
    timeout: Duration,
) -> String {
    let messages = [
        ChatMessage::system(FORMATTER_PROMPT),
        ChatMessage::user(format!(
            "The user asked: \"{user_text}\"\n\n\
             Tool used: {kind}\n\
             Raw output:\n{raw}\n\n\
             Please write a friendly, clear response for this non-technical user."
        )),
    ];
    match best_effort("format", timeout, client.chat(&messages, 0.3)).await {
        Some(reply) if !reply.trim().is_empty() => reply,
        _ => raw_fallback(raw),
    }
}

pub fn raw_fallback(raw: &str) -> String {
    format!("Here's the raw result:\n\n```\n{raw}\n```")
}

pub fn format_clarification(question: &str) -> String {
    question.to_string()
}

pub fn format_refusal(reason: &str) -> String {
    format!("I'm sorry, I can't do that. {reason}\n\n{CAPABILITIES}")
}

/// A 3-5 word title for a conversation's first message.
pub async fn generate_title(client: &dyn ChatClient, first_message: &str, timeout: Duration) -> String {
    let messages = [ChatMessage::user(format!(
        "Create a short (3-5 words) title for a chat that starts with: '{first_message}'. \
         Output ONLY the title, no quotes, no extra text."
    ))];
    let title = best_effort("title", timeout, client.chat(&messages, 0.3))
        .await
        .map(|raw| clean_title(&raw))
        .unwrap_or_default();
    if title.is_empty() {
        first_message.chars().take(TITLE_FALLBACK_CHARS).collect()
    } else {
        title
    }
}

fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .chars()
        .take(TITLE_MAX_CHARS)
        .collect()
}
