//! One conversational turn, end to end:
//! persist → title → context → summarize → route → policy → execute/format →
//! persist.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use opsmate_config::{AppConfig, MemoryConfig, PolicyConfig};
use opsmate_exec::{Connector, RemoteExecutor, policy};
use opsmate_llm::{ChatClient, Role};
use opsmate_tools::{Action, ProposedAction, ToolOutcome};

use crate::formatter;
use crate::memory;
use crate::router::IntentRouter;
use crate::store::{ConversationStore, ToolRun, TurnRecord};

/// What a turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub conversation_id: String,
    pub title: String,
    /// The policy-approved action (possibly rewritten into a refusal).
    pub action: Action,
    /// Present only when the action reached the executor.
    pub outcome: Option<ToolOutcome>,
    pub text: String,
}

/// Routed and checked action for a message, without executing anything.
#[derive(Debug, Clone, Serialize)]
pub struct RoutePreview {
    pub proposed: ProposedAction,
    pub approved: Action,
}

pub struct Pipeline<C: ChatClient, K: Connector> {
    client: Arc<C>,
    router: IntentRouter<C>,
    executor: RemoteExecutor<K>,
    store: ConversationStore,
    policy: PolicyConfig,
    memory: MemoryConfig,
    llm_timeout: Duration,
}

impl<C: ChatClient, K: Connector> Pipeline<C, K> {
    pub fn new(config: &AppConfig, client: C, connector: K) -> Self {
        let client = Arc::new(client);
        let llm_timeout = Duration::from_secs(config.llm.request_timeout_secs.max(1));
        Self {
            router: IntentRouter::new(Arc::clone(&client), config.router.clone(), llm_timeout),
            executor: RemoteExecutor::new(connector, &config.remote, &config.policy),
            store: ConversationStore::new(&config.storage.data_dir),
            policy: config.policy.clone(),
            memory: config.memory.clone(),
            llm_timeout,
            client,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Route and check `user_text` without history and without execution.
    pub async fn preview(&self, user_text: &str) -> RoutePreview {
        let proposed = self.router.route(user_text, &[]).await;
        let approved = policy::check_with(&self.policy, &proposed, user_text);
        RoutePreview { proposed, approved }
    }

    /// Handle one user message.
    ///
    /// An unknown or missing `conversation_id` starts a new conversation.
    /// Empty input is rejected before anything is persisted.
    pub async fn handle_turn(&self, conversation_id: Option<&str>, user_text: &str) -> Result<TurnReply> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            bail!("empty message");
        }

        let mut meta = match conversation_id {
            Some(id) => match self.store.get(id)? {
                Some(meta) => meta,
                None => {
                    warn!(conversation = id, "unknown conversation, starting a new one");
                    self.store.create()?
                }
            },
            None => self.store.create()?,
        };
        let id = meta.id.clone();

        let prior = self.store.load_turns(&id)?;
        self.store.append_turn(&id, Role::User, user_text)?;
        info!(conversation = %id, "turn started");

        if !prior.iter().any(|turn| turn.role == Role::User) {
            let title = formatter::generate_title(self.client.as_ref(), user_text, self.llm_timeout).await;
            meta = self.store.set_title(&id, &title)?;
        }

        let history = memory::build_context(meta.summary.as_deref(), &prior, &self.memory);

        let mut turns = prior;
        turns.push(TurnRecord::new(Role::User, user_text));
        if let Some(summary) =
            memory::maybe_summarize(self.client.as_ref(), &turns, &self.memory, self.llm_timeout).await
        {
            meta = self.store.set_summary(&id, &summary)?;
        }

        let proposed = self.router.route(user_text, &history).await;
        let action = policy::check_with(&self.policy, &proposed, user_text);
        info!(conversation = %id, action = %action.kind(), "action approved");

        let (outcome, text) = match &action {
            Action::AskClarification { question } => (None, formatter::format_clarification(question)),
            Action::Refuse { reason } => (None, formatter::format_refusal(reason)),
            executable => {
                let outcome = self.executor.execute(executable).await;
                let input = serde_json::to_value(executable)?;
                let run = ToolRun::new(&id, executable.kind().as_str(), input, &outcome);
                if let Err(err) = self.store.append_tool_run(&run) {
                    warn!(error = %err, "failed to record tool run");
                }
                let text = formatter::format_tool_result(
                    self.client.as_ref(),
                    executable.kind(),
                    &outcome.text(),
                    user_text,
                    self.llm_timeout,
                )
                .await;
                (Some(outcome), text)
            }
        };

        self.store.append_turn(&id, Role::Assistant, &text)?;
        info!(conversation = %id, "turn finished");

        Ok(TurnReply {
            conversation_id: id,
            title: meta.title,
            action,
            outcome,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use opsmate_config::StorageConfig;
    use opsmate_exec::{CommandOutput, RemoteError, RemoteSession};
    use opsmate_llm::ChatMessage;
    use opsmate_tools::ToolErrorKind;

    use super::*;
    use crate::router::UNPARSEABLE_QUESTION;
    use crate::testing::ScriptedChat;

    /// Remote host that answers `df` and records every command it sees.
    #[derive(Clone, Default)]
    struct RecordingConnector {
        commands: Arc<Mutex<Vec<String>>>,
    }

    struct RecordingSession {
        commands: Arc<Mutex<Vec<String>>>,
    }

    impl Connector for RecordingConnector {
        fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
            Ok(Box::new(RecordingSession {
                commands: Arc::clone(&self.commands),
            }))
        }
    }

    impl RemoteSession for RecordingSession {
        fn exec(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
            self.commands.lock().unwrap().push(command.to_string());
            let stdout = if command.starts_with("df") {
                "/dev/sda1 50G 20G 28G 42% /"
            } else {
                ""
            };
            Ok(CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: 0,
            })
        }

        fn ensure_dir(&mut self, _path: &str) -> Result<(), RemoteError> {
            Ok(())
        }

        fn write_file(&mut self, _path: &str, _contents: &[u8]) -> Result<(), RemoteError> {
            Ok(())
        }

        fn read_file(&mut self, path: &str) -> Result<Vec<u8>, RemoteError> {
            self.commands.lock().unwrap().push(format!("get {path}"));
            Err(RemoteError::NotFound(path.to_string()))
        }
    }

    /// Model that answers by prompt: title, router, formatter, summarizer.
    fn scripted_model(router_reply: &'static str) -> ScriptedChat {
        ScriptedChat::responding(move |messages: &[ChatMessage]| {
            let system = messages
                .first()
                .filter(|m| m.role == Role::System)
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            let reply = if system.starts_with("You are an action router") {
                router_reply
            } else if system.starts_with("You are a friendly Ops Assistant") {
                "Friendly summary of the result."
            } else if system.starts_with("You are a concise summarizer") {
                "- earlier chat"
            } else {
                "Server Check"
            };
            Ok(reply.to_string())
        })
    }

    fn pipeline(
        dir: &tempfile::TempDir,
        chat: ScriptedChat,
    ) -> (Pipeline<ScriptedChat, RecordingConnector>, RecordingConnector) {
        let config = AppConfig {
            storage: StorageConfig {
                data_dir: dir.path().display().to_string(),
            },
            ..AppConfig::default()
        };
        let connector = RecordingConnector::default();
        (Pipeline::new(&config, chat, connector.clone()), connector)
    }

    #[tokio::test]
    async fn disk_question_runs_tool_and_formats() {
        let dir = tempfile::TempDir::new().unwrap();
        let (pipeline, connector) = pipeline(&dir, scripted_model("{}"));

        let reply = pipeline.handle_turn(None, "how much disk space is left").await.unwrap();
        assert_eq!(reply.action, Action::GetDiskFree);
        assert_eq!(reply.title, "Server Check");
        assert_eq!(reply.text, "Friendly summary of the result.");
        assert!(reply.outcome.as_ref().is_some_and(ToolOutcome::is_ok));
        assert_eq!(*connector.commands.lock().unwrap(), vec!["df -h / | tail -1"]);

        let turns = pipeline.store().load_turns(&reply.conversation_id).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role, Role::Assistant);
        let runs = pipeline.store().tool_runs(&reply.conversation_id).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].tool_name, "get_disk_free");
        assert_eq!(runs[0].status, "ok");
    }

    #[tokio::test]
    async fn destructive_request_is_refused_without_execution() {
        let dir = tempfile::TempDir::new().unwrap();
        let (pipeline, connector) = pipeline(&dir, scripted_model(r#"{"action":"get_disk_free"}"#));

        let reply = pipeline
            .handle_turn(None, "please delete the old backups")
            .await
            .unwrap();
        assert!(matches!(reply.action, Action::Refuse { .. }));
        assert!(reply.outcome.is_none());
        assert!(reply.text.starts_with("I'm sorry, I can't do that."));
        assert!(connector.commands.lock().unwrap().is_empty());
        assert!(pipeline.store().tool_runs(&reply.conversation_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn ambiguous_request_returns_question_verbatim() {
        let dir = tempfile::TempDir::new().unwrap();
        let (pipeline, connector) = pipeline(
            &dir,
            scripted_model(r#"{"action":"ask_clarification","question":"Do you want nginx error log or access log (visits)?"}"#),
        );

        let reply = pipeline.handle_turn(None, "show me the nginx log").await.unwrap();
        assert_eq!(reply.text, "Do you want nginx error log or access log (visits)?");
        assert!(reply.outcome.is_none());
        assert!(connector.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn forbidden_read_is_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        let (pipeline, connector) = pipeline(
            &dir,
            scripted_model(r#"{"action":"read_text_file","filename":".env"}"#),
        );

        let reply = pipeline.handle_turn(None, "show me what's in .env").await.unwrap();
        assert_eq!(reply.action, Action::refuse(policy::FORBIDDEN_PATH_REASON));
        assert!(connector.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unparseable_classifier_reply_asks_to_rephrase() {
        let dir = tempfile::TempDir::new().unwrap();
        let (pipeline, _) = pipeline(&dir, scripted_model("I think you want uptime"));
        let reply = pipeline.handle_turn(None, "hmm?").await.unwrap();
        assert_eq!(reply.text, UNPARSEABLE_QUESTION);
    }

    #[tokio::test]
    async fn failed_tool_is_recorded_as_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let (pipeline, _) = pipeline(
            &dir,
            scripted_model(r#"{"action":"read_text_file","filename":"todo.txt"}"#),
        );
        let reply = pipeline.handle_turn(None, "open todo.txt for me").await.unwrap();
        let outcome = reply.outcome.unwrap();
        assert_eq!(outcome.error_kind(), Some(ToolErrorKind::NotFound));
        let runs = pipeline.store().tool_runs(&reply.conversation_id).unwrap();
        assert_eq!(runs[0].status, "error");
        assert_eq!(runs[0].output, "File 'todo.txt' not found in workspace.");
    }

    #[tokio::test]
    async fn empty_input_is_rejected_before_persisting() {
        let dir = tempfile::TempDir::new().unwrap();
        let (pipeline, _) = pipeline(&dir, scripted_model("{}"));
        assert!(pipeline.handle_turn(None, "   ").await.is_err());
        assert!(pipeline.store().list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn follow_up_turn_reuses_conversation_and_keeps_title() {
        let dir = tempfile::TempDir::new().unwrap();
        let (pipeline, _) = pipeline(&dir, scripted_model(r#"{"action":"get_uptime"}"#));
        let first = pipeline.handle_turn(None, "how much memory is used").await.unwrap();
        pipeline
            .store()
            .set_title(&first.conversation_id, "Memory Check")
            .unwrap();

        let second = pipeline
            .handle_turn(Some(&first.conversation_id), "and the cpu?")
            .await
            .unwrap();
        assert_eq!(second.conversation_id, first.conversation_id);
        assert_eq!(second.title, "Memory Check");
        assert_eq!(pipeline.store().load_turns(&first.conversation_id).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn unknown_conversation_starts_fresh() {
        let dir = tempfile::TempDir::new().unwrap();
        let (pipeline, _) = pipeline(&dir, scripted_model("{}"));
        let reply = pipeline
            .handle_turn(Some("00000000-0000-0000-0000-000000000000"), "uptime?")
            .await
            .unwrap();
        assert_ne!(reply.conversation_id, "00000000-0000-0000-0000-000000000000");
        assert_eq!(pipeline.store().list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn long_conversation_gets_summary() {
        let dir = tempfile::TempDir::new().unwrap();
        let (pipeline, _) = pipeline(&dir, scripted_model("{}"));
        let meta = pipeline.store().create().unwrap();
        for i in 0..19 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            pipeline.store().append_turn(&meta.id, role, &format!("turn {i}")).unwrap();
        }
        pipeline.handle_turn(Some(&meta.id), "uptime please").await.unwrap();
        let loaded = pipeline.store().get(&meta.id).unwrap().unwrap();
        assert_eq!(loaded.summary.as_deref(), Some("- earlier chat"));
    }

    #[tokio::test]
    async fn preview_never_executes() {
        let dir = tempfile::TempDir::new().unwrap();
        let (pipeline, connector) = pipeline(&dir, scripted_model(r#"{"action":"run_shell"}"#));
        let preview = pipeline.preview("do the thing").await;
        assert_eq!(preview.proposed.action, "run_shell");
        assert!(matches!(preview.approved, Action::Refuse { .. }));
        assert!(connector.commands.lock().unwrap().is_empty());
    }
}
