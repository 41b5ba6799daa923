//! Configuration loading and persistence.
//!
//! Reads `config.json` from the config directory and layers `BOTSTER_*`
//! environment variables on top. The API token is never written to disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::constants;
use crate::terminal::DEFAULT_SCROLLBACK_LINES;

const CONFIG_FILE: &str = "config.json";

/// Configuration for the botster hub.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// URL of the botster server.
    pub server_url: String,
    /// API token - NOT serialized to disk.
    #[serde(skip)]
    pub token: String,
    /// Interval in seconds between server polls.
    pub poll_interval: u64,
    /// Timeout in seconds before an idle agent is stopped.
    pub agent_timeout: u64,
    /// Maximum number of concurrent agent sessions.
    pub max_sessions: usize,
    /// Base directory for creating worktrees.
    pub worktree_base: PathBuf,
    /// User-chosen hub name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_name: Option<String>,
    /// Explicit hub identifier. Derived from the repository when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_id: Option<String>,
    /// Command each agent's CLI PTY runs.
    pub agent_command: String,
    /// Raw output chunks kept per PTY.
    pub raw_buffer_chunks: usize,
    /// Terminal history lines kept per PTY.
    pub scrollback_lines: usize,
    /// Seconds a relayed tunnel request may take.
    pub tunnel_request_timeout: u64,
    /// Never talk to the control plane (`BOTSTER_OFFLINE_MODE`).
    #[serde(skip)]
    pub offline: bool,
}

impl Default for Config {
    fn default() -> Self {
        // Worktree base: in test mode use project tmp/, otherwise use home directory
        let worktree_base = if crate::env::is_any_test() {
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/botster-sessions")
        } else {
            dirs::home_dir().map_or_else(
                || PathBuf::from("botster-sessions"),
                |h| h.join("botster-sessions"),
            )
        };

        Self {
            server_url: "https://trybotster.com".to_string(),
            token: String::new(),
            poll_interval: constants::DEFAULT_POLL_INTERVAL_SECS,
            agent_timeout: 3600,
            max_sessions: 20,
            worktree_base,
            hub_name: None,
            hub_id: None,
            agent_command: "bash".to_string(),
            raw_buffer_chunks: constants::DEFAULT_RAW_BUFFER_CHUNKS,
            scrollback_lines: DEFAULT_SCROLLBACK_LINES,
            tunnel_request_timeout: constants::TUNNEL_REQUEST_TIMEOUT.as_secs(),
            offline: false,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `BOTSTER_CONFIG_DIR` env var: explicit override
    /// 2. `BOTSTER_ENV=test` / `system_test`: `tmp/botster-test` in the crate
    /// 3. Default: platform config dir (`~/.config/botster` on Linux)
    ///
    /// # Errors
    ///
    /// Fails if no config directory can be determined or created.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("BOTSTER_CONFIG_DIR") {
            PathBuf::from(dir)
        } else if crate::env::is_any_test() {
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/botster-test")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("botster")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    ///
    /// # Errors
    ///
    /// Fails only if the config directory cannot be determined.
    pub fn load() -> Result<Self> {
        let dir = Self::config_dir()?;
        let mut config = Self::load_from_dir(&dir).unwrap_or_else(|e| {
            log::debug!("Using default config: {e}");
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read `config.json` from `dir` without applying overrides.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing or is not valid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `BOTSTER_*` overrides from `lookup`.
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = lookup("BOTSTER_SERVER_URL") {
            self.server_url = server_url;
        }

        // Token from env var (for CI/CD)
        if let Some(token) = lookup("BOTSTER_TOKEN").or_else(|| lookup("BOTSTER_API_KEY")) {
            self.token = token;
        }

        if let Some(worktree_base) = lookup("BOTSTER_WORKTREE_BASE") {
            self.worktree_base = PathBuf::from(worktree_base);
        }

        if let Some(interval) = lookup("BOTSTER_POLL_INTERVAL").and_then(|v| v.parse().ok()) {
            self.poll_interval = interval;
        }

        if let Some(max) = lookup("BOTSTER_MAX_SESSIONS").and_then(|v| v.parse().ok()) {
            self.max_sessions = max;
        }

        if let Some(timeout) = lookup("BOTSTER_AGENT_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.agent_timeout = timeout;
        }

        if let Some(command) = lookup("BOTSTER_AGENT_COMMAND") {
            self.agent_command = command;
        }

        if let Some(hub_id) = lookup("BOTSTER_HUB_ID").filter(|id| !id.is_empty()) {
            self.hub_id = Some(hub_id);
        }

        if let Some(offline) = lookup("BOTSTER_OFFLINE_MODE") {
            self.offline = matches!(offline.as_str(), "1" | "true" | "yes");
        }
    }

    /// Persists the current configuration to disk.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to_dir(&Self::config_dir()?)
    }

    /// Write `config.json` into `dir` with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written.
    pub fn save_to_dir(&self, dir: &Path) -> Result<()> {
        let config_path = dir.join(CONFIG_FILE);
        fs::write(&config_path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Get the API token for authentication.
    #[must_use]
    pub fn get_api_key(&self) -> &str {
        &self.token
    }

    /// Check if we have a valid authentication token.
    /// Only returns true if the token has the expected `btstr_` prefix.
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.token.starts_with("btstr_")
    }

    /// Poll interval as a `Duration`.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// Idle time after which an agent is closed.
    #[must_use]
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout)
    }

    /// Tunnel request ceiling as a `Duration`.
    #[must_use]
    pub fn tunnel_request_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_request_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server_url, "https://trybotster.com");
        assert_eq!(config.poll_interval, 5);
        assert_eq!(config.max_sessions, 20);
        assert_eq!(config.agent_timeout, 3600);
        assert_eq!(config.agent_command, "bash");
        assert_eq!(config.raw_buffer_chunks, 1_000);
        assert_eq!(config.scrollback_lines, 10_000);
        assert_eq!(config.tunnel_request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_config_serialization_excludes_token() {
        let mut config = Config::default();
        config.token = "secret_token".to_string();
        let json = serde_json::to_string(&config).unwrap();

        assert!(!json.contains("secret_token"));
        assert!(!json.contains("token\""));
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"server_url": "http://localhost:3000", "max_sessions": 3}"#,
        )
        .unwrap();

        let config = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.server_url, "http://localhost:3000");
        assert_eq!(config.max_sessions, 3);
        assert_eq!(config.poll_interval, 5);
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.hub_name = Some("laptop".to_string());
        config.token = "btstr_secret".to_string();
        config.save_to_dir(dir.path()).unwrap();

        let loaded = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(loaded.hub_name.as_deref(), Some("laptop"));
        assert!(loaded.token.is_empty());
    }

    #[test]
    fn test_missing_config_file_errors() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load_from_dir(dir.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("BOTSTER_SERVER_URL", "http://127.0.0.1:9999"),
            ("BOTSTER_API_KEY", "btstr_from_api_key"),
            ("BOTSTER_POLL_INTERVAL", "12"),
            ("BOTSTER_MAX_SESSIONS", "not-a-number"),
            ("BOTSTER_AGENT_COMMAND", "claude --dangerously-skip-permissions"),
            ("BOTSTER_HUB_ID", "hub-123"),
            ("BOTSTER_OFFLINE_MODE", "1"),
        ]));

        assert_eq!(config.server_url, "http://127.0.0.1:9999");
        assert_eq!(config.token, "btstr_from_api_key");
        assert_eq!(config.poll_interval, 12);
        assert_eq!(config.max_sessions, 20);
        assert_eq!(config.agent_command, "claude --dangerously-skip-permissions");
        assert_eq!(config.hub_id.as_deref(), Some("hub-123"));
        assert!(config.offline);
    }

    #[test]
    fn test_token_env_takes_precedence_over_api_key() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("BOTSTER_TOKEN", "btstr_token"),
            ("BOTSTER_API_KEY", "btstr_api_key"),
        ]));
        assert_eq!(config.token, "btstr_token");
    }

    #[test]
    fn test_has_token() {
        let mut config = Config::default();
        assert!(!config.has_token());

        config.token = "btstr_token123".to_string();
        assert!(config.has_token());

        config.token = "invalid_token".to_string();
        assert!(!config.has_token());
    }
}
