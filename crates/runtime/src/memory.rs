//! Conversation context assembly and rolling summarization.

use std::time::Duration;

use tracing::{debug, info};

use opsmate_config::MemoryConfig;
use opsmate_llm::{ChatClient, ChatMessage};

use crate::best_effort;
use crate::store::TurnRecord;

const SUMMARIZER_PROMPT: &str = "You are a concise summarizer. Summarize the following chat \
history into 2-4 bullet points capturing the key facts and actions taken. Be brief.";

/// Characters kept from each turn when rendering history for the summarizer.
const SUMMARY_CLIP: usize = 300;

/// Summary (as a system turn) followed by the last `config.context_messages`
/// turns.
pub fn build_context(
    summary: Option<&str>,
    turns: &[TurnRecord],
    config: &MemoryConfig,
) -> Vec<ChatMessage> {
    let mut context = Vec::with_capacity(config.context_messages + 1);
    if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
        context.push(ChatMessage::system(format!(
            "Previous conversation summary:\n{summary}"
        )));
    }
    let skip = turns.len().saturating_sub(config.context_messages);
    context.extend(turns[skip..].iter().map(TurnRecord::to_message));
    context
}

/// `ROLE: text` lines for every turn except the most recent `keep_recent`.
/// `None` when nothing is old enough.
pub fn summary_input(turns: &[TurnRecord], keep_recent: usize) -> Option<String> {
    let older = &turns[..turns.len().saturating_sub(keep_recent)];
    if older.is_empty() {
        return None;
    }
    let text = older
        .iter()
        .map(|turn| {
            let clipped: String = turn.content.chars().take(SUMMARY_CLIP).collect();
            format!("{}: {clipped}", turn.role.as_str().to_uppercase())
        })
        .collect::<Vec<_>>()
        .join("\n");
    Some(text)
}

/// Summarize older turns once the conversation reaches the threshold.
///
/// Best-effort: classifier failures and timeouts yield `None` and the
/// previous summary stays in place.
pub async fn maybe_summarize(
    client: &dyn ChatClient,
    turns: &[TurnRecord],
    config: &MemoryConfig,
    timeout: Duration,
) -> Option<String> {
    if turns.len() < config.summarize_threshold {
        return None;
    }
    let history = summary_input(turns, config.summarize_keep_recent)?;
    debug!(turns = turns.len(), "summarizing older turns");

    let messages = [ChatMessage::system(SUMMARIZER_PROMPT), ChatMessage::user(history)];
    let summary = best_effort("summarize", timeout, client.chat(&messages, 0.2)).await?;
    let summary = summary.trim().to_string();
    if summary.is_empty() {
        return None;
    }
    info!(chars = summary.len(), "conversation summary updated");
    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedChat;
    use opsmate_llm::Role;

    fn turns(n: usize) -> Vec<TurnRecord> {
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                TurnRecord::new(role, format!("turn {i}"))
            })
            .collect()
    }

    #[test]
    fn context_without_summary_is_last_n_turns() {
        let config = MemoryConfig::default();
        let context = build_context(None, &turns(25), &config);
        assert_eq!(context.len(), 20);
        assert_eq!(context[0].content, "turn 5");
        assert_eq!(context[19].content, "turn 24");
    }

    #[test]
    fn summary_leads_as_system_turn() {
        let config = MemoryConfig {
            context_messages: 2,
            ..MemoryConfig::default()
        };
        let context = build_context(Some("- checked disk"), &turns(5), &config);
        assert_eq!(context.len(), 3);
        assert_eq!(context[0].role, Role::System);
        assert_eq!(context[0].content, "Previous conversation summary:\n- checked disk");
        assert_eq!(context[1].content, "turn 3");
    }

    #[test]
    fn blank_summary_is_ignored() {
        let context = build_context(Some("  "), &turns(1), &MemoryConfig::default());
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].role, Role::User);
    }

    #[test]
    fn summary_input_clips_and_labels_turns() {
        let mut history = turns(3);
        history[0].content = "a".repeat(500);
        let text = summary_input(&history, 1).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("USER: {}", "a".repeat(300)));
        assert_eq!(lines[1], "ASSISTANT: turn 1");
        assert_eq!(summary_input(&history, 3), None);
    }

    #[tokio::test]
    async fn below_threshold_never_calls_model() {
        let chat = ScriptedChat::new(["unused"]);
        let out = maybe_summarize(&chat, &turns(19), &MemoryConfig::default(), Duration::from_secs(1)).await;
        assert_eq!(out, None);
        assert!(chat.calls().is_empty());
    }

    #[tokio::test]
    async fn at_threshold_summarizes_older_turns() {
        let chat = ScriptedChat::new(["- user checked disk\n- user checked ram"]);
        let out = maybe_summarize(&chat, &turns(20), &MemoryConfig::default(), Duration::from_secs(1)).await;
        assert_eq!(out.as_deref(), Some("- user checked disk\n- user checked ram"));

        let calls = chat.calls();
        assert_eq!(calls.len(), 1);
        let (messages, temperature) = &calls[0];
        assert_eq!(*temperature, 0.2);
        assert_eq!(messages[1].content.lines().count(), 10);
        assert!(messages[1].content.ends_with("ASSISTANT: turn 9"));
    }

    #[tokio::test]
    async fn summarizer_failure_is_swallowed() {
        let chat = ScriptedChat::failing();
        let out = maybe_summarize(&chat, &turns(30), &MemoryConfig::default(), Duration::from_secs(1)).await;
        assert_eq!(out, None);
    }
}
