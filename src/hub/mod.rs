//! Hub - Central orchestrator for agent management.
//!
//! The Hub owns the agent registry, the tunnel manager, and the timers for
//! polling and heartbeats. Front ends (a TUI, a remote UI, the headless
//! binary) drive it with [`HubAction`]s and a periodic [`Hub::tick()`].
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────┐
//!            │        Hub           │
//!            │  - Agent registry    │
//!            │  - Tick loop         │
//!            │  - Selection/scroll  │
//!            └──────────┬───────────┘
//!                       │
//!        ┌──────────────┼──────────────┐
//!        │              │              │
//!        ▼              ▼              ▼
//!     Agents         Server          Tunnel
//!  (PTY readers)  (HTTP polling)  (WebSocket task)
//! ```
//!
//! `tick()` is cooperative and never touches agent I/O beyond non-blocking
//! checks; PTY output is pumped by each session's reader thread and the
//! tunnel runs on the hub's tokio runtime.
//!
//! # Usage
//!
//! ```ignore
//! let mut hub = Hub::new(Config::load()?)?;
//! hub.setup()?;
//! while !hub.should_quit() {
//!     hub.tick();
//!     std::thread::sleep(TICK_INTERVAL);
//! }
//! hub.shutdown();
//! ```

// Rust guideline compliant 2026-02

pub mod actions;
pub mod lifecycle;
pub mod polling;
pub mod registration;
pub mod state;
pub mod worktree;

pub use actions::HubAction;
pub use lifecycle::{SpawnRequest, SpawnResult};
pub use registration::RetryPolicy;
pub use state::{HubState, SharedHubState};
pub use worktree::{DirectoryProvisioner, WorktreeProvisioner};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use crate::agent::{Agent, ScrollEvent, ScrollState};
use crate::config::Config;
use crate::server::types::{AgentHeartbeatInfo, NotificationPayload};
use crate::server::ParsedMessage;
use crate::terminal::StyledLine;
use crate::tunnel::{TunnelConfig, TunnelManager, TunnelStatus};

/// Generate a stable hub_identifier from a repo path.
///
/// Uses SHA256 hash of the absolute path to ensure the same repo
/// always gets the same hub_id, even across restarts.
#[must_use]
pub fn hub_id_for_repo(repo_path: &Path) -> String {
    let canonical = repo_path
        .canonicalize()
        .unwrap_or_else(|_| repo_path.to_path_buf());

    let hash = Sha256::digest(canonical.to_string_lossy().as_bytes());

    // Use first 16 bytes as hex (32 chars) - enough uniqueness, shorter than UUID
    hash[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Repository name for polling: `BOTSTER_REPO` or the directory name.
fn detect_repo_name(repo_path: &Path) -> String {
    std::env::var("BOTSTER_REPO")
        .ok()
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| {
            if crate::env::is_any_test() {
                return "test/repo".to_string();
            }
            repo_path
                .file_name()
                .map_or_else(|| "local/repo".to_string(), |n| {
                    format!("local/{}", n.to_string_lossy())
                })
        })
}

/// Central orchestrator for the botster-hub.
pub struct Hub {
    // === Core State ===
    state: SharedHubState,
    /// Application configuration.
    pub config: Config,
    client: Client,
    provisioner: Box<dyn WorktreeProvisioner>,

    // === Identity ===
    hub_identifier: String,
    repo_path: PathBuf,
    repo_name: String,

    // === Tunnel ===
    tunnel_manager: Arc<TunnelManager>,
    tunnel_task: Option<JoinHandle<Result<()>>>,
    tunnel_error: Option<String>,
    retry_policy: RetryPolicy,
    tokio_runtime: tokio::runtime::Runtime,

    // === Control Flags ===
    quit: bool,
    polling_enabled: bool,
    polling: polling::PollingState,

    // === Display ===
    terminal_dims: (u16, u16),
    selected: Option<String>,
    scroll: ScrollState,
    last_scroll_event: Option<ScrollEvent>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("state", &self.state)
            .field("hub_identifier", &self.hub_identifier)
            .field("repo_name", &self.repo_name)
            .field("tunnel_status", &self.tunnel_manager.get_status())
            .field("quit", &self.quit)
            .field("polling_enabled", &self.polling_enabled)
            .field("terminal_dims", &self.terminal_dims)
            .field("selected", &self.selected)
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Create a hub for the repository in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory is unavailable or the
    /// runtime or HTTP client cannot be created.
    pub fn new(config: Config) -> Result<Self> {
        let repo_path = std::env::current_dir().context("Failed to read current directory")?;
        let repo_name = detect_repo_name(&repo_path);
        Self::with_repo(config, repo_path, repo_name)
    }

    /// Create a hub for an explicit repository.
    ///
    /// # Errors
    ///
    /// Returns an error if the tokio runtime or HTTP client cannot be created.
    pub fn with_repo(config: Config, repo_path: PathBuf, repo_name: String) -> Result<Self> {
        let tokio_runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
        let client = polling::build_client()?;

        // Stable hub_identifier: config/env > repo path
        let hub_identifier = config
            .hub_id
            .clone()
            .unwrap_or_else(|| hub_id_for_repo(&repo_path));
        log::info!(
            "Hub identifier: {}...",
            hub_identifier.chars().take(8).collect::<String>()
        );

        let tunnel_manager = Arc::new(TunnelManager::new(TunnelConfig::from_config(
            &config,
            &hub_identifier,
        )));

        let heartbeat = crate::env::Environment::current().heartbeat_interval();

        Ok(Self {
            state: HubState::shared(),
            client,
            provisioner: Box::new(DirectoryProvisioner::new(config.worktree_base.clone())),
            hub_identifier,
            repo_path,
            repo_name,
            tunnel_manager,
            tunnel_task: None,
            tunnel_error: None,
            retry_policy: RetryPolicy::default(),
            tokio_runtime,
            quit: false,
            polling_enabled: true,
            polling: polling::PollingState::new(config.poll_interval(), heartbeat),
            terminal_dims: (24, 80),
            selected: None,
            scroll: ScrollState::new(),
            last_scroll_event: None,
            config,
        })
    }

    /// Use a different worktree source.
    #[must_use]
    pub fn with_provisioner(mut self, provisioner: Box<dyn WorktreeProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    /// Use a different tunnel retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Prepare the worktree base and start the tunnel.
    ///
    /// # Errors
    ///
    /// Fails if the worktree base directory cannot be created.
    pub fn setup(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.config.worktree_base).with_context(|| {
            format!(
                "Failed to create worktree base {}",
                self.config.worktree_base.display()
            )
        })?;
        log::info!(
            "Hub ready for {} ({})",
            self.repo_name,
            self.repo_path.display()
        );
        self.start_tunnel();
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Identifier used in every control-plane URL and the tunnel channel.
    #[must_use]
    pub fn hub_identifier(&self) -> &str {
        &self.hub_identifier
    }

    /// Repository this hub serves.
    #[must_use]
    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    /// Shared handle to the agent registry.
    #[must_use]
    pub fn state(&self) -> SharedHubState {
        Arc::clone(&self.state)
    }

    /// The tunnel manager.
    #[must_use]
    pub fn tunnel_manager(&self) -> &Arc<TunnelManager> {
        &self.tunnel_manager
    }

    /// Current tunnel connection status.
    #[must_use]
    pub fn tunnel_status(&self) -> TunnelStatus {
        self.tunnel_manager.get_status()
    }

    /// Why the tunnel gave up, once it has.
    #[must_use]
    pub fn tunnel_error(&self) -> Option<&str> {
        self.tunnel_error.as_deref()
    }

    /// Get the number of active agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.state.lock().expect("hub state lock poisoned").agent_count()
    }

    /// Session keys in creation order.
    #[must_use]
    pub fn agent_keys(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("hub state lock poisoned")
            .agent_keys()
            .to_vec()
    }

    /// Get the current terminal dimensions.
    #[must_use]
    pub fn terminal_dims(&self) -> (u16, u16) {
        self.terminal_dims
    }

    /// Check if the hub should quit.
    #[must_use]
    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// Request the hub to quit.
    pub fn request_quit(&mut self) {
        self.quit = true;
    }

    /// Toggle server polling on/off.
    pub fn toggle_polling(&mut self) {
        self.polling_enabled = !self.polling_enabled;
    }

    /// Check if polling is enabled.
    #[must_use]
    pub fn is_polling_enabled(&self) -> bool {
        self.polling_enabled
    }

    /// Handle a hub action. See [`actions::dispatch()`].
    pub fn handle_action(&mut self, action: HubAction) {
        actions::dispatch(self, action);
    }

    // =========================================================================
    // Agent Lifecycle
    // =========================================================================

    /// Spawn an agent for `request`.
    ///
    /// The first agent spawned becomes the selection.
    ///
    /// # Errors
    ///
    /// See [`lifecycle::spawn_agent`].
    pub fn spawn_agent(&mut self, request: &SpawnRequest) -> Result<SpawnResult> {
        let ctx = lifecycle::SpawnContext {
            state: &self.state,
            config: &self.config,
            provisioner: self.provisioner.as_ref(),
            tunnel: Some(self.tunnel_manager.as_ref()),
            dims: self.terminal_dims,
        };
        let result = lifecycle::spawn_agent(&ctx, request)?;
        if self.selected.is_none() {
            if let SpawnResult::Spawned { session_key, .. } = &result {
                self.select_by_key(session_key);
            }
        }
        Ok(result)
    }

    /// Close an agent. Returns `false` if it was not registered.
    ///
    /// A closed selected agent moves the selection to the next agent.
    pub fn close_agent(&mut self, session_key: &str, delete_worktree: bool) -> bool {
        let next = self.selection_without(session_key);

        let closed = lifecycle::close_agent(
            &self.state,
            self.provisioner.as_ref(),
            Some(self.tunnel_manager.as_ref()),
            session_key,
            delete_worktree,
        );
        if closed && self.selected.as_deref() == Some(session_key) {
            self.selected = next;
            self.reset_scroll();
        }
        closed
    }

    /// Selection to fall back to once `session_key` is gone.
    fn selection_without(&self, session_key: &str) -> Option<String> {
        if self.selected.as_deref() != Some(session_key) {
            return self.selected.clone();
        }
        self.state
            .lock()
            .expect("hub state lock poisoned")
            .next_key(Some(session_key))
            .filter(|k| k != session_key)
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Session key of the selected agent.
    #[must_use]
    pub fn selected_key(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Select the next agent, wrapping.
    pub fn select_next(&mut self) {
        let next = self
            .state
            .lock()
            .expect("hub state lock poisoned")
            .next_key(self.selected.as_deref());
        self.set_selected(next);
    }

    /// Select the previous agent, wrapping.
    pub fn select_previous(&mut self) {
        let previous = self
            .state
            .lock()
            .expect("hub state lock poisoned")
            .previous_key(self.selected.as_deref());
        self.set_selected(previous);
    }

    /// Select by 1-based position. Out-of-range indexes are ignored.
    pub fn select_by_index(&mut self, index: usize) {
        let key = index.checked_sub(1).and_then(|i| {
            self.state
                .lock()
                .expect("hub state lock poisoned")
                .agent_keys()
                .get(i)
                .cloned()
        });
        if key.is_some() {
            self.set_selected(key);
        }
    }

    /// Select an agent by session key. Returns `false` if it is unknown.
    pub fn select_by_key(&mut self, session_key: &str) -> bool {
        let exists = self
            .state
            .lock()
            .expect("hub state lock poisoned")
            .contains(session_key);
        if exists {
            self.set_selected(Some(session_key.to_string()));
        }
        exists
    }

    fn set_selected(&mut self, key: Option<String>) {
        if key.is_some() {
            self.selected = key;
        }
        // Every switch starts live
        self.reset_scroll();
    }

    /// Run `f` on the selected agent.
    pub fn with_selected_agent<R>(&self, f: impl FnOnce(&Agent) -> R) -> Option<R> {
        let key = self.selected.as_deref()?;
        let state = self.state.lock().expect("hub state lock poisoned");
        state.get_agent(key).map(f)
    }

    /// Run `f` on the selected agent mutably.
    pub fn with_selected_agent_mut<R>(&self, f: impl FnOnce(&mut Agent) -> R) -> Option<R> {
        let key = self.selected.as_deref()?;
        let mut state = self.state.lock().expect("hub state lock poisoned");
        state.get_agent_mut(key).map(f)
    }

    // =========================================================================
    // Input, Resize & Display
    // =========================================================================

    /// Forward keystrokes to the selected agent's active PTY.
    ///
    /// Dropped while in scroll mode.
    pub fn send_input(&mut self, data: &[u8]) {
        if !self.scroll.routes_keys_to_pty() {
            log::debug!("Scroll mode: not forwarding {} bytes", data.len());
            return;
        }
        let result = self.with_selected_agent(|agent| agent.write_input(data));
        match result {
            Some(Err(e)) => log::warn!("Failed to send input: {e}"),
            None => log::debug!("No agent selected for input"),
            Some(Ok(())) => {}
        }
    }

    /// Resize every agent to the new terminal size.
    pub fn resize(&mut self, rows: u16, cols: u16) {
        self.terminal_dims = (rows, cols);
        let state = self.state.lock().expect("hub state lock poisoned");
        for (key, agent) in state.agents() {
            if let Err(e) = agent.resize(rows, cols) {
                log::warn!("Failed to resize agent {key}: {e}");
            }
        }
    }

    /// History size of the selected agent's active PTY.
    #[must_use]
    pub fn selected_scrollback_count(&self) -> usize {
        self.with_selected_agent(Agent::scrollback_count)
            .unwrap_or(0)
    }

    /// Lines to draw for the selected agent, honoring scroll mode.
    #[must_use]
    pub fn selected_display_lines(&self) -> Option<Vec<StyledLine>> {
        let offset = self.scroll.offset();
        self.with_selected_agent(|agent| agent.get_display_lines(offset))
    }

    /// Screen hash of the selected agent, for redraw skipping.
    #[must_use]
    pub fn selected_screen_hash(&self) -> Option<u64> {
        self.with_selected_agent(Agent::get_screen_hash)
    }

    /// Live/scroll state of the display.
    #[must_use]
    pub fn scroll_state(&self) -> ScrollState {
        self.scroll
    }

    /// Take the most recent scroll event, if any.
    pub fn take_scroll_event(&mut self) -> Option<ScrollEvent> {
        self.last_scroll_event.take()
    }

    /// Apply a scroll operation and remember its event.
    pub fn apply_scroll(&mut self, op: impl FnOnce(&mut ScrollState) -> Option<ScrollEvent>) {
        if let Some(event) = op(&mut self.scroll) {
            self.last_scroll_event = Some(event);
        }
    }

    /// Return to live mode.
    pub fn reset_scroll(&mut self) {
        self.apply_scroll(ScrollState::exit);
    }

    // =========================================================================
    // Tunnel
    // =========================================================================

    /// Start the tunnel task. Returns `false` when it was not started.
    ///
    /// Skipped in offline mode, without a token, or when already running.
    pub fn start_tunnel(&mut self) -> bool {
        if self.config.offline {
            log::info!("[Tunnel] Offline mode, not connecting");
            return false;
        }
        if !self.config.has_token() {
            log::warn!("[Tunnel] No API token configured, not connecting");
            return false;
        }
        if self.tunnel_task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        self.tunnel_error = None;
        self.tunnel_task = Some(self.tokio_runtime.spawn(registration::run_tunnel(
            Arc::clone(&self.tunnel_manager),
            self.retry_policy,
        )));
        true
    }

    /// Collect the tunnel task's result once it has finished.
    fn check_tunnel(&mut self) {
        if !self.tunnel_task.as_ref().is_some_and(JoinHandle::is_finished) {
            return;
        }
        let Some(task) = self.tunnel_task.take() else {
            return;
        };
        match self.tokio_runtime.block_on(task) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::error!("[Tunnel] {e:#}");
                self.tunnel_error = Some(format!("{e:#}"));
            }
            Err(e) => {
                log::error!("[Tunnel] Task failed: {e}");
                self.tunnel_error = Some(e.to_string());
            }
        }
    }

    // =========================================================================
    // Event Loop
    // =========================================================================

    /// Perform periodic tasks. Non-blocking apart from control-plane HTTP.
    ///
    /// Order: tunnel result, agent status and idle reaping, polling,
    /// heartbeat, notification forwarding.
    pub fn tick(&mut self) {
        self.check_tunnel();
        self.refresh_agents();
        self.poll_messages();
        self.send_heartbeat_if_due();
        self.forward_agent_notifications();
    }

    /// Update agent statuses and close idle agents.
    fn refresh_agents(&mut self) {
        let timeout = self.config.agent_timeout();
        let idle: Vec<String> = {
            let mut state = self.state.lock().expect("hub state lock poisoned");
            state
                .agents_mut()
                .filter_map(|(key, agent)| {
                    agent.refresh_status();
                    (!timeout.is_zero() && agent.idle_for() >= timeout).then(|| key.clone())
                })
                .collect()
        };

        for key in idle {
            log::info!("Agent {key} idle for over {timeout:?}, closing");
            let next = self.selection_without(&key);
            let detached =
                lifecycle::detach_agent(&self.state, Some(self.tunnel_manager.as_ref()), &key);
            if let Some(agent) = detached {
                lifecycle::close_in_background(agent);
                if self.selected.as_deref() == Some(key.as_str()) {
                    self.selected = next;
                    self.reset_scroll();
                }
            }
        }
    }

    fn polling_config(&self) -> polling::PollingConfig<'_> {
        polling::PollingConfig {
            client: &self.client,
            server_url: &self.config.server_url,
            api_key: self.config.get_api_key(),
            hub_identifier: &self.hub_identifier,
        }
    }

    fn skip_polling(&self) -> bool {
        polling::should_skip_polling(self.quit, self.polling_enabled, self.config.offline)
    }

    /// Poll the server for new messages and process them.
    pub fn poll_messages(&mut self) {
        if self.skip_polling() || !self.polling.should_poll() {
            return;
        }
        self.polling.mark_polled();

        let messages = polling::poll_messages(&self.polling_config(), &self.repo_name);
        for msg in &messages {
            let parsed = ParsedMessage::from_message_data(msg);
            if self.process_message(&parsed) {
                polling::acknowledge_message(&self.polling_config(), msg.id);
            }
        }
    }

    /// Build the spawn request a message describes.
    fn request_for(&self, parsed: &ParsedMessage) -> Option<SpawnRequest> {
        Some(SpawnRequest {
            repo: parsed.repo.clone().unwrap_or_else(|| self.repo_name.clone()),
            issue_number: parsed.issue_number,
            branch_name: parsed.branch()?,
            prompt: Some(parsed.task_description()),
            invocation_url: parsed.invocation_url.clone(),
        })
    }

    /// Route one polled message. Returns `true` when it can be acknowledged.
    ///
    /// Cleanup closes the agent; a mention for a running agent is typed
    /// into its CLI; anything else spawns an agent.
    pub fn process_message(&mut self, parsed: &ParsedMessage) -> bool {
        let Some(request) = self.request_for(parsed) else {
            log::warn!(
                "Message {} has neither issue nor branch, dropping",
                parsed.message_id
            );
            return true;
        };
        let session_key = request.session_key();

        if parsed.is_cleanup() {
            log::info!("Cleanup requested for {session_key}");
            self.close_agent(&session_key, true);
            return true;
        }

        let notified = {
            let state = self.state.lock().expect("hub state lock poisoned");
            state.get_agent(&session_key).map(|agent| {
                log::info!("Agent {session_key} exists, sending notification");
                let text = format!("{}\r", parsed.format_notification());
                agent.write_input_to_cli(text.as_bytes())
            })
        };
        match notified {
            Some(Ok(())) => return true,
            Some(Err(e)) => {
                log::error!("Failed to send notification to agent: {e}");
                return true;
            }
            None => {}
        }

        match self.spawn_agent(&request) {
            Ok(_) => true,
            Err(e) => {
                // Left unacknowledged so a later poll retries
                log::error!("Failed to process message {}: {e:#}", parsed.message_id);
                false
            }
        }
    }

    /// Send heartbeat to server if due.
    pub fn send_heartbeat_if_due(&mut self) {
        if self.skip_polling() || !self.polling.should_heartbeat() {
            return;
        }
        self.polling.mark_heartbeat_sent();

        let agents: Vec<AgentHeartbeatInfo> = {
            let state = self.state.lock().expect("hub state lock poisoned");
            state
                .agents()
                .map(|(key, agent)| AgentHeartbeatInfo {
                    session_key: key.clone(),
                    last_invocation_url: agent.last_invocation_url.clone(),
                    status: agent.status.to_string(),
                    tunnel_port: agent.tunnel_port,
                })
                .collect()
        };

        polling::send_heartbeat(
            &self.polling_config(),
            &self.repo_name,
            self.config.hub_name.as_deref(),
            agents,
        );
    }

    /// Poll agents for terminal notifications and send them to the server.
    ///
    /// When agents emit notifications (OSC 9, OSC 777), the server turns
    /// them into comments on the originating issue.
    fn forward_agent_notifications(&mut self) {
        let payloads: Vec<NotificationPayload> = {
            let state = self.state.lock().expect("hub state lock poisoned");
            state
                .agents()
                .flat_map(|(key, agent)| {
                    agent.poll_notifications().into_iter().map(move |n| {
                        log::info!("Agent {key} sent {} notification: {}", n.kind(), n.message());
                        NotificationPayload {
                            repo: agent.repo.clone(),
                            issue_number: agent.issue_number,
                            invocation_url: agent.last_invocation_url.clone(),
                            notification_type: "question_asked".to_string(),
                            message: Some(n.message()).filter(|m| !m.is_empty()),
                        }
                    })
                })
                .collect()
        };

        if self.config.offline {
            return;
        }

        let config = self.polling_config();
        for payload in payloads {
            if payload.issue_number.is_none() && payload.invocation_url.is_none() {
                continue;
            }
            if let Err(e) = polling::send_agent_notification(&config, &payload) {
                log::error!("Failed to send notification to server: {e}");
            }
        }
    }

    /// Stop the tunnel and close every agent.
    ///
    /// Worktrees are preserved. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.quit = true;
        if let Some(task) = self.tunnel_task.take() {
            task.abort();
        }

        let agents = self.state.lock().expect("hub state lock poisoned").drain();
        if !agents.is_empty() {
            log::info!("Shutting down {} agent(s)", agents.len());
        }
        for mut agent in agents {
            self.tunnel_manager.unregister_agent(&agent.session_key());
            agent.close();
        }
        self.selected = None;
        self.reset_scroll();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn offline_hub(temp: &TempDir) -> Hub {
        let config = Config {
            worktree_base: temp.path().to_path_buf(),
            agent_command: "cat".to_string(),
            hub_id: Some("hub-test".to_string()),
            offline: true,
            ..Config::default()
        };
        Hub::with_repo(config, temp.path().to_path_buf(), "owner/repo".to_string()).unwrap()
    }

    fn issue(n: u32) -> SpawnRequest {
        SpawnRequest {
            repo: "owner/repo".to_string(),
            issue_number: Some(n),
            branch_name: format!("botster-issue-{n}"),
            ..SpawnRequest::default()
        }
    }

    #[test]
    fn test_hub_id_for_repo_is_stable() {
        let temp = TempDir::new().unwrap();
        let a = hub_id_for_repo(temp.path());
        let b = hub_id_for_repo(temp.path());
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let other = TempDir::new().unwrap();
        assert_ne!(a, hub_id_for_repo(other.path()));
    }

    #[test]
    fn test_offline_hub_does_not_start_tunnel() {
        let temp = TempDir::new().unwrap();
        let mut hub = offline_hub(&temp);
        hub.setup().unwrap();
        assert_eq!(hub.hub_identifier(), "hub-test");
        assert!(!hub.start_tunnel());
        assert_eq!(hub.tunnel_status(), TunnelStatus::Disconnected);
        assert!(hub.tunnel_error().is_none());
        hub.tick();
    }

    #[test]
    fn test_selection_follows_registry() {
        let temp = TempDir::new().unwrap();
        let mut hub = offline_hub(&temp);

        hub.spawn_agent(&issue(1)).unwrap();
        hub.spawn_agent(&issue(2)).unwrap();
        assert_eq!(hub.selected_key(), Some("owner-repo-1"));

        hub.handle_action(HubAction::SelectNext);
        assert_eq!(hub.selected_key(), Some("owner-repo-2"));
        hub.handle_action(HubAction::SelectNext);
        assert_eq!(hub.selected_key(), Some("owner-repo-1"));
        hub.handle_action(HubAction::SelectPrevious);
        assert_eq!(hub.selected_key(), Some("owner-repo-2"));
        hub.handle_action(HubAction::SelectByIndex(1));
        assert_eq!(hub.selected_key(), Some("owner-repo-1"));
        hub.handle_action(HubAction::SelectByIndex(9));
        assert_eq!(hub.selected_key(), Some("owner-repo-1"));

        hub.handle_action(HubAction::CloseAgent {
            session_key: "owner-repo-1".to_string(),
            delete_worktree: false,
        });
        assert_eq!(hub.selected_key(), Some("owner-repo-2"));
        assert_eq!(hub.agent_keys(), ["owner-repo-2"]);

        hub.shutdown();
        assert_eq!(hub.agent_count(), 0);
        assert_eq!(hub.selected_key(), None);
    }

    #[test]
    fn test_switching_agents_resets_scroll() {
        let temp = TempDir::new().unwrap();
        let mut hub = offline_hub(&temp);
        hub.spawn_agent(&issue(1)).unwrap();
        hub.spawn_agent(&issue(2)).unwrap();

        // Pretend there is history to scroll through
        hub.apply_scroll(|scroll| scroll.up(5, 100));
        assert!(hub.scroll_state().is_scrolling());
        assert_eq!(
            hub.take_scroll_event(),
            Some(ScrollEvent::ModeChanged { scrolling: true })
        );

        hub.handle_action(HubAction::SelectNext);
        assert_eq!(hub.scroll_state().offset(), 0);
        assert_eq!(
            hub.take_scroll_event(),
            Some(ScrollEvent::ModeChanged { scrolling: false })
        );
        hub.shutdown();
    }

    #[test]
    fn test_scroll_without_history_stays_live() {
        let temp = TempDir::new().unwrap();
        let mut hub = offline_hub(&temp);
        hub.spawn_agent(&issue(1)).unwrap();

        hub.handle_action(HubAction::PageUp);
        assert!(!hub.scroll_state().is_scrolling());
        assert!(hub.take_scroll_event().is_none());
        hub.shutdown();
    }

    #[test]
    fn test_resize_applies_to_agents() {
        let temp = TempDir::new().unwrap();
        let mut hub = offline_hub(&temp);
        hub.spawn_agent(&issue(1)).unwrap();

        hub.handle_action(HubAction::Resize { rows: 30, cols: 100 });
        assert_eq!(hub.terminal_dims(), (30, 100));
        let size = hub.with_selected_agent(Agent::get_pty_size).unwrap();
        assert_eq!(size, (30, 100));
        let lines = hub.selected_display_lines().unwrap();
        assert_eq!(lines.len(), 30);
        hub.shutdown();
    }

    #[test]
    fn test_cleanup_message_closes_agent() {
        let temp = TempDir::new().unwrap();
        let mut hub = offline_hub(&temp);
        hub.spawn_agent(&issue(4)).unwrap();

        let cleanup = ParsedMessage::from_message_data(&crate::server::MessageData {
            id: 1,
            event_type: "agent_cleanup".to_string(),
            payload: serde_json::json!({"repo": "owner/repo", "issue_number": 4}),
        });
        assert!(hub.process_message(&cleanup));
        assert_eq!(hub.agent_count(), 0);
    }

    #[test]
    fn test_message_spawns_then_notifies() {
        let temp = TempDir::new().unwrap();
        let mut hub = offline_hub(&temp);
        let message = ParsedMessage::from_message_data(&crate::server::MessageData {
            id: 2,
            event_type: "issue_comment".to_string(),
            payload: serde_json::json!({"issue_number": 8, "prompt": "Add tests"}),
        });

        assert!(hub.process_message(&message));
        assert_eq!(hub.agent_keys(), ["owner-repo-8"]);

        // Second mention goes to the running agent instead of spawning
        assert!(hub.process_message(&message));
        assert_eq!(hub.agent_count(), 1);
        hub.shutdown();
    }

    #[test]
    fn test_idle_agents_are_reaped_without_blocking_tick() {
        let temp = TempDir::new().unwrap();
        let mut hub = offline_hub(&temp);
        hub.config.agent_timeout = 1;
        hub.spawn_agent(&issue(1)).unwrap();
        hub.spawn_agent(&issue(2)).unwrap();
        assert_eq!(hub.selected_key(), Some("owner-repo-1"));

        std::thread::sleep(std::time::Duration::from_millis(1100));
        let started = std::time::Instant::now();
        hub.tick();

        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert_eq!(hub.agent_count(), 0);
        assert_eq!(hub.selected_key(), None);
    }

    #[test]
    fn test_quit_action() {
        let temp = TempDir::new().unwrap();
        let mut hub = offline_hub(&temp);
        assert!(!hub.should_quit());
        hub.handle_action(HubAction::TogglePolling);
        assert!(!hub.is_polling_enabled());
        hub.handle_action(HubAction::Quit);
        assert!(hub.should_quit());
    }
}
