use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ── Remote host ──────────────────────────────────────────────────────────────

/// The single host every tool runs against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Private key used for public-key authentication.
    pub key_path: String,
    /// The workspace directory file tools are confined to.
    pub workdir: String,
    /// Expected SHA-256 host key fingerprint (hex).  Empty accepts any key.
    pub host_key_fingerprint: String,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 22,
            username: "ops".to_string(),
            key_path: "~/.ssh/id_ed25519".to_string(),
            workdir: "/home/ops/ops_workspace".to_string(),
            host_key_fingerprint: String::new(),
            connect_timeout_secs: 15,
            command_timeout_secs: 30,
        }
    }
}

// ── LLM ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL for the Ollama API.  Overridden by `OLLAMA_BASE_URL`.
    pub ollama_base_url: String,
    pub ollama_model: String,
    /// Upper bound for a single classification / formatting call.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_model: "qwen2.5-coder:0.5b".to_string(),
            request_timeout_secs: 60,
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Number of most-recent turns handed to the classifier.
    pub history_window: usize,
    /// Line count the keyword classifier proposes for log tails.
    pub log_lines: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            history_window: 6,
            log_lines: 50,
        }
    }
}

// ── Policy ───────────────────────────────────────────────────────────────────

/// Tables consulted by the policy validator.
///
/// The defaults are the hardened baseline; overriding them in TOML replaces
/// the whole list, it does not merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub destructive_keywords: Vec<String>,
    pub forbidden_paths: Vec<String>,
    pub lines_default: u32,
    pub lines_max: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            destructive_keywords: [
                "delete", "remove", "rm", "drop", "wipe", "format", "stop", "restart",
                "reboot", "shutdown", "kill", "pkill", "clean", "purge", "uninstall",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            forbidden_paths: [
                "~/.ssh",
                "/etc/shadow",
                ".env",
                "id_rsa",
                "id_ed25519",
                "/root",
                "/etc/passwd",
                "authorized_keys",
                "known_hosts",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            lines_default: 20,
            lines_max: 200,
        }
    }
}

// ── Memory ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Turns included in the context handed to the router.
    pub context_messages: usize,
    /// Conversation length at which older turns get summarized.
    pub summarize_threshold: usize,
    /// Turns left out of the summary (they stay verbatim in context).
    pub summarize_keep_recent: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            context_messages: 20,
            summarize_threshold: 20,
            summarize_keep_recent: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: ".opsmate".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub llm: LlmConfig,
    pub router: RouterConfig,
    pub policy: PolicyConfig,
    pub memory: MemoryConfig,
    pub storage: StorageConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load from a TOML file (missing file = defaults) and apply environment
    /// overrides on top.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)
                .with_context(|| format!("parse config file {}", path.display()))?;
        }
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `SSH_*`, `OLLAMA_*` and memory overrides.  Empty values are
    /// ignored; non-numeric values for numeric keys are an error.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("SSH_HOST") {
            self.remote.host = value;
        }
        if let Some(value) = get("SSH_PORT") {
            self.remote.port = value
                .trim()
                .parse()
                .with_context(|| format!("SSH_PORT must be a port number, got '{value}'"))?;
        }
        if let Some(value) = get("SSH_USER") {
            self.remote.username = value;
        }
        if let Some(value) = get("SSH_KEY_PATH") {
            self.remote.key_path = value;
        }
        if let Some(value) = get("SSH_WORKDIR") {
            self.remote.workdir = value;
        }
        if let Some(value) = get("OLLAMA_BASE_URL") {
            self.llm.ollama_base_url = value;
        }
        if let Some(value) = get("OLLAMA_MODEL") {
            self.llm.ollama_model = value;
        }
        if let Some(value) = get("CONTEXT_MESSAGES") {
            self.memory.context_messages = value
                .trim()
                .parse()
                .with_context(|| format!("CONTEXT_MESSAGES must be an integer, got '{value}'"))?;
        }
        if let Some(value) = get("SUMMARIZE_THRESHOLD") {
            self.memory.summarize_threshold = value.trim().parse().with_context(|| {
                format!("SUMMARIZE_THRESHOLD must be an integer, got '{value}'")
            })?;
        }
        Ok(())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serialize config")
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
