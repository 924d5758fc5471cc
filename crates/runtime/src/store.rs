//! Conversation persistence: a JSONL transcript, a metadata file and an
//! append-only tool-run log per conversation.
//!
//! ```text
//! <data_dir>/conversations/
//!   <id>.jsonl             TurnRecord per line
//!   <id>.meta.json         ConversationMeta
//!   <id>.tool_runs.jsonl   ToolRun per line
//! ```

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use opsmate_llm::{ChatMessage, Role};
use opsmate_tools::ToolOutcome;

pub const DEFAULT_TITLE: &str = "New Chat";
/// Tool output persisted per run is cut to this many characters.
pub const TOOL_OUTPUT_LIMIT: usize = 5000;

// ── Records ──────────────────────────────────────────────────────────────────

/// A single turn persisted to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TurnRecord {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit record of one executed tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRun {
    pub id: Uuid,
    pub conversation_id: String,
    pub tool_name: String,
    /// The approved action as sent to the executor.
    pub input: Value,
    pub output: String,
    /// `ok` or `error`.
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl ToolRun {
    pub fn new(conversation_id: &str, tool_name: &str, input: Value, outcome: &ToolOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            tool_name: tool_name.to_string(),
            input,
            output: outcome.text().chars().take(TOOL_OUTPUT_LIMIT).collect(),
            status: outcome.status_label().to_string(),
            created_at: Utc::now(),
        }
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

/// File-backed conversation store.  Every operation opens and closes its own
/// files; nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    root: PathBuf,
}

impl ConversationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn conversations_dir(&self) -> PathBuf {
        self.root.join("conversations")
    }

    fn transcript_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.conversations_dir().join(format!("{id}.jsonl")))
    }

    fn meta_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.conversations_dir().join(format!("{id}.meta.json")))
    }

    fn tool_runs_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.conversations_dir().join(format!("{id}.tool_runs.jsonl")))
    }

    pub fn create(&self) -> Result<ConversationMeta> {
        let now = Utc::now();
        let meta = ConversationMeta {
            id: Uuid::new_v4().to_string(),
            title: DEFAULT_TITLE.to_string(),
            summary: None,
            created_at: now,
            updated_at: now,
        };
        self.write_meta(&meta)?;
        Ok(meta)
    }

    /// Metadata for `id`, or `None` when the conversation does not exist.
    pub fn get(&self, id: &str) -> Result<Option<ConversationMeta>> {
        if Uuid::parse_str(id).is_err() {
            return Ok(None);
        }
        let path = self.meta_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("read conversation meta {}", path.display()))?;
        let meta = serde_json::from_str(&raw)
            .with_context(|| format!("parse conversation meta {}", path.display()))?;
        Ok(Some(meta))
    }

    /// All conversations, most recently updated first.  Unreadable metadata
    /// files are skipped.
    pub fn list(&self) -> Result<Vec<ConversationMeta>> {
        let dir = self.conversations_dir();
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut metas: Vec<ConversationMeta> = fs::read_dir(&dir)
            .with_context(|| format!("read {}", dir.display()))?
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                let name = path.file_name()?.to_str()?;
                if !name.ends_with(".meta.json") {
                    return None;
                }
                serde_json::from_str(&fs::read_to_string(&path).ok()?).ok()
            })
            .collect();
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(metas)
    }

    /// Every turn of `id` in insertion order.  Blank or malformed lines are
    /// skipped.
    pub fn load_turns(&self, id: &str) -> Result<Vec<TurnRecord>> {
        let path = self.transcript_path(id)?;
        if !path.exists() {
            return Ok(vec![]);
        }
        let file = fs::File::open(&path)
            .with_context(|| format!("open transcript {}", path.display()))?;
        let turns = BufReader::new(file)
            .lines()
            .filter_map(|line| {
                let line = line.ok()?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    return None;
                }
                serde_json::from_str(trimmed).ok()
            })
            .collect();
        Ok(turns)
    }

    /// Append one turn and bump `updated_at`.
    pub fn append_turn(&self, id: &str, role: Role, content: &str) -> Result<TurnRecord> {
        let mut meta = self.require(id)?;
        let record = TurnRecord::new(role, content);
        append_json_line(&self.transcript_path(id)?, &record)?;
        meta.updated_at = record.timestamp;
        self.write_meta(&meta)?;
        Ok(record)
    }

    pub fn set_title(&self, id: &str, title: &str) -> Result<ConversationMeta> {
        let mut meta = self.require(id)?;
        meta.title = title.to_string();
        self.write_meta(&meta)?;
        Ok(meta)
    }

    pub fn set_summary(&self, id: &str, summary: &str) -> Result<ConversationMeta> {
        let mut meta = self.require(id)?;
        meta.summary = Some(summary.to_string());
        self.write_meta(&meta)?;
        Ok(meta)
    }

    /// Remove a conversation with its transcript and tool runs.  Returns
    /// `false` when it did not exist.
    pub fn delete(&self, id: &str) -> Result<bool> {
        if self.get(id)?.is_none() {
            return Ok(false);
        }
        for path in [
            self.transcript_path(id)?,
            self.tool_runs_path(id)?,
            self.meta_path(id)?,
        ] {
            if path.exists() {
                fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            }
        }
        Ok(true)
    }

    /// Record a run under its conversation, which must exist.
    pub fn append_tool_run(&self, run: &ToolRun) -> Result<()> {
        self.require(&run.conversation_id)?;
        append_json_line(&self.tool_runs_path(&run.conversation_id)?, run)
    }

    pub fn tool_runs(&self, conversation_id: &str) -> Result<Vec<ToolRun>> {
        let path = self.tool_runs_path(conversation_id)?;
        if !path.exists() {
            return Ok(vec![]);
        }
        let file = fs::File::open(&path).with_context(|| format!("open {}", path.display()))?;
        let runs = BufReader::new(file)
            .lines()
            .filter_map(|line| serde_json::from_str::<ToolRun>(line.ok()?.trim()).ok())
            .collect();
        Ok(runs)
    }

    fn require(&self, id: &str) -> Result<ConversationMeta> {
        self.get(id)?
            .with_context(|| format!("conversation {id} not found"))
    }

    /// Write metadata through a `.tmp` sibling and rename over the original.
    fn write_meta(&self, meta: &ConversationMeta) -> Result<()> {
        let path = self.meta_path(&meta.id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(meta).context("serialize ConversationMeta")?;
        fs::write(&tmp, body).with_context(|| format!("write {}", tmp.display()))?;
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(err).with_context(|| format!("replace {}", path.display()));
        }
        Ok(())
    }
}

fn validate_id(id: &str) -> Result<()> {
    if Uuid::parse_str(id).is_err() {
        bail!("invalid conversation id '{id}'");
    }
    Ok(())
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let line = serde_json::to_string(value).context("serialize record")?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    writeln!(file, "{line}")?;
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────
