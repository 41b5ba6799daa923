//! Agent management for the botster-hub.
//!
//! Each agent runs in its own git worktree with a PTY session for the CLI
//! process and optionally a second one for a dev server.
//!
//! # Architecture
//!
//! ```text
//! Agent
//! +-- cli_pty: PtySession (runs main agent process)
//! +-- server_pty: Option<PtySession> (runs dev server)
//! +-- active_view: PtyView (which one display and input target)
//! ```
//!
//! Agents are agnostic: they spawn whatever command the hub is configured
//! with and never interpret its output beyond OSC notifications.
//!
//! # Submodules
//!
//! - [`notification`]: Terminal notification detection (OSC 9, OSC 777)
//! - [`pty`]: PTY session management
//! - [`scroll`]: Live/scroll display mode
//! - [`spawn`]: PTY spawning and the reader thread

// Rust guideline compliant 2026-02

pub mod notification;
pub mod pty;
pub mod scroll;
pub mod spawn;

pub use notification::{detect_notifications, AgentNotification, AgentStatus};
pub use pty::PtySession;
pub use scroll::{ScrollEvent, ScrollState};
pub use spawn::PtySpawnConfig;

use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::constants;
use crate::terminal::{StyledLine, DEFAULT_SCROLLBACK_LINES};

/// Which PTY an operation targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PtyView {
    /// CLI view - shows main agent process output.
    #[default]
    Cli,
    /// Server view - shows dev server output.
    Server,
}

impl std::fmt::Display for PtyView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PtyView::Cli => write!(f, "cli"),
            PtyView::Server => write!(f, "server"),
        }
    }
}

/// Stable key correlating work on `repo` with its agent, tunnel port, and
/// remote UI.
///
/// Format: `{repo-safe}-{issue_number}` or `{repo-safe}-{branch-name}`,
/// with `/` replaced by `-` in both repo and branch.
#[must_use]
pub fn session_key_for(repo: &str, issue_number: Option<u32>, branch_name: &str) -> String {
    let repo_safe = repo.replace('/', "-");
    match issue_number {
        Some(issue) => format!("{repo_safe}-{issue}"),
        None => format!("{repo_safe}-{}", branch_name.replace('/', "-")),
    }
}

/// Ring buffer capacities for an agent's PTY sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCapacities {
    /// Raw output chunks kept for streaming.
    pub raw_chunks: usize,
    /// Terminal history lines.
    pub scrollback_lines: usize,
}

impl Default for BufferCapacities {
    fn default() -> Self {
        Self {
            raw_chunks: constants::DEFAULT_RAW_BUFFER_CHUNKS,
            scrollback_lines: DEFAULT_SCROLLBACK_LINES,
        }
    }
}

/// An agent running in a git worktree.
///
/// Each agent has:
/// - A unique ID and a session key
/// - A CLI PTY running the main agent process
/// - An optional server PTY for the dev server
///
/// The agent exclusively owns its PTY sessions; nothing else writes to
/// their file descriptors.
pub struct Agent {
    /// Unique identifier for this agent instance.
    pub id: uuid::Uuid,
    /// Repository name in "owner/repo" format.
    pub repo: String,
    /// Issue number if working on a specific issue.
    pub issue_number: Option<u32>,
    /// Git branch name.
    pub branch_name: String,
    /// Path to the git worktree directory.
    pub worktree_path: PathBuf,
    /// When this agent was created.
    pub start_time: chrono::DateTime<chrono::Utc>,
    /// Current execution status.
    pub status: AgentStatus,
    /// URL where this agent was last invoked from.
    pub last_invocation_url: Option<String>,
    /// Port for HTTP tunnel forwarding.
    pub tunnel_port: Option<u16>,

    /// Primary PTY (CLI - runs main agent process).
    ///
    /// Always exists. Check `cli_pty.is_spawned()` to see if a process is running.
    pub cli_pty: PtySession,

    /// Secondary PTY (Server - runs dev server).
    pub server_pty: Option<PtySession>,

    active_view: PtyView,
    capacities: BufferCapacities,
    closed: bool,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("repo", &self.repo)
            .field("issue_number", &self.issue_number)
            .field("branch_name", &self.branch_name)
            .field("worktree_path", &self.worktree_path)
            .field("status", &self.status)
            .field("active_view", &self.active_view)
            .finish_non_exhaustive()
    }
}

/// Default PTY dimensions used when no specific dimensions are provided.
const DEFAULT_PTY_ROWS: u16 = 24;
const DEFAULT_PTY_COLS: u16 = 80;

impl Agent {
    /// Creates a new agent with default PTY dimensions (24x80).
    #[must_use]
    pub fn new(
        id: uuid::Uuid,
        repo: String,
        issue_number: Option<u32>,
        branch_name: String,
        worktree_path: PathBuf,
    ) -> Self {
        Self::new_with_dims(
            id,
            repo,
            issue_number,
            branch_name,
            worktree_path,
            (DEFAULT_PTY_ROWS, DEFAULT_PTY_COLS),
        )
    }

    /// Creates a new agent with specific PTY dimensions (rows, cols).
    #[must_use]
    pub fn new_with_dims(
        id: uuid::Uuid,
        repo: String,
        issue_number: Option<u32>,
        branch_name: String,
        worktree_path: PathBuf,
        terminal_dims: (u16, u16),
    ) -> Self {
        let capacities = BufferCapacities::default();
        let (rows, cols) = terminal_dims;
        Self {
            id,
            repo,
            issue_number,
            branch_name,
            worktree_path,
            start_time: chrono::Utc::now(),
            status: AgentStatus::Initializing,
            last_invocation_url: None,
            tunnel_port: None,
            cli_pty: PtySession::with_capacities(
                rows,
                cols,
                capacities.raw_chunks,
                capacities.scrollback_lines,
            ),
            server_pty: None,
            active_view: PtyView::Cli,
            capacities,
            closed: false,
        }
    }

    /// Use different buffer capacities for this agent's PTY sessions.
    ///
    /// Only meaningful before anything is spawned: the CLI session is
    /// recreated at its current dimensions.
    #[must_use]
    pub fn with_buffer_capacities(mut self, capacities: BufferCapacities) -> Self {
        let (rows, cols) = self.cli_pty.dimensions();
        self.cli_pty = PtySession::with_capacities(
            rows,
            cols,
            capacities.raw_chunks,
            capacities.scrollback_lines,
        );
        self.capacities = capacities;
        self
    }

    /// Stable key correlating this agent with its tunnel port and remote UI.
    ///
    /// See [`session_key_for`].
    #[must_use]
    pub fn session_key(&self) -> String {
        session_key_for(&self.repo, self.issue_number, &self.branch_name)
    }

    // =========================================================================
    // PTY Access
    // =========================================================================

    /// Get the PTY session for the specified view.
    ///
    /// Falls back to CLI PTY if Server view is requested but server_pty is None.
    #[must_use]
    pub fn get_pty(&self, view: PtyView) -> &PtySession {
        match view {
            PtyView::Cli => &self.cli_pty,
            PtyView::Server => self.server_pty.as_ref().unwrap_or(&self.cli_pty),
        }
    }

    /// The PTY currently selected for display and input.
    #[must_use]
    pub fn get_active_pty(&self) -> &PtySession {
        self.get_pty(self.active_view)
    }

    /// Which view is active.
    #[must_use]
    pub fn active_view(&self) -> PtyView {
        self.active_view
    }

    /// Check if server PTY is available.
    #[must_use]
    pub fn has_server_pty(&self) -> bool {
        self.server_pty.is_some()
    }

    /// Flip between CLI and Server views.
    ///
    /// No-op without a server PTY, so the active view always exists.
    pub fn toggle_pty_view(&mut self) -> PtyView {
        if self.server_pty.is_some() {
            self.active_view = match self.active_view {
                PtyView::Cli => PtyView::Server,
                PtyView::Server => PtyView::Cli,
            };
        }
        self.active_view
    }

    /// Get the current PTY size (rows, cols).
    #[must_use]
    pub fn get_pty_size(&self) -> (u16, u16) {
        self.cli_pty.dimensions()
    }

    // =========================================================================
    // Resize Operations
    // =========================================================================

    /// Resize every PTY session and its engine.
    ///
    /// All sessions are attempted even if one fails.
    ///
    /// # Errors
    ///
    /// Returns the first resize failure. That session keeps its old size.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        let cli = self.cli_pty.resize(rows, cols);
        let server = self
            .server_pty
            .as_ref()
            .map_or(Ok(()), |pty| pty.resize(rows, cols));
        cli.and(server)
    }

    // =========================================================================
    // Input/Output
    // =========================================================================

    /// Write input to the active PTY.
    ///
    /// # Errors
    ///
    /// Returns an error if no process has been spawned yet or the write fails.
    pub fn write_input(&self, input: &[u8]) -> Result<()> {
        self.get_active_pty().write_input(input)
    }

    /// Write input to the CLI PTY regardless of the active view.
    ///
    /// # Errors
    ///
    /// Returns an error if the CLI process is not running or the write fails.
    pub fn write_input_to_cli(&self, input: &[u8]) -> Result<()> {
        self.cli_pty.write_input(input)
    }

    /// Take buffered raw output of the active PTY.
    #[must_use]
    pub fn drain_raw_output(&self) -> Vec<u8> {
        self.get_active_pty().drain_raw_output()
    }

    // =========================================================================
    // Lifecycle & Spawn
    // =========================================================================

    /// Spawn the CLI process in the worktree.
    ///
    /// On success the status becomes `Running`. On failure it is unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if PTY creation or command spawn fails.
    #[allow(
        clippy::implicit_hasher,
        reason = "internal API doesn't need hasher generalization"
    )]
    pub fn spawn(&mut self, command: &str, env: &HashMap<String, String>) -> Result<()> {
        self.spawn_with_config(PtySpawnConfig {
            worktree_path: self.worktree_path.clone(),
            command: command.to_string(),
            env: env.clone(),
            detect_notifications: true,
            ..PtySpawnConfig::default()
        })
    }

    /// Spawn the CLI process with full control over the spawn parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent is closed or the spawn fails.
    pub fn spawn_with_config(&mut self, config: PtySpawnConfig) -> Result<()> {
        if self.closed {
            bail!("Agent {} is closed", self.session_key());
        }
        log::info!(
            "Spawning agent for {}: command={}, worktree={}",
            self.issue_number.map_or_else(
                || format!("{}/{}", self.repo, self.branch_name),
                |num| format!("{}#{num}", self.repo),
            ),
            config.command,
            config.worktree_path.display()
        );

        self.cli_pty.spawn(config)?;
        self.status = AgentStatus::Running;
        Ok(())
    }

    /// Spawn a server PTY running the dev server on `port`.
    ///
    /// `PORT` is exported to the process and `tunnel_port` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if a server is already running or the spawn fails.
    #[allow(
        clippy::implicit_hasher,
        reason = "internal API doesn't need hasher generalization"
    )]
    pub fn spawn_server(
        &mut self,
        command: &str,
        env: &HashMap<String, String>,
        port: u16,
    ) -> Result<()> {
        if self.closed {
            bail!("Agent {} is closed", self.session_key());
        }
        if self.server_pty.is_some() {
            bail!("Agent {} already has a server PTY", self.session_key());
        }

        let (rows, cols) = self.cli_pty.dimensions();
        let mut server_pty = PtySession::with_capacities(
            rows,
            cols,
            self.capacities.raw_chunks,
            self.capacities.scrollback_lines,
        );

        let mut env = env.clone();
        env.insert("PORT".to_string(), port.to_string());

        server_pty.spawn(PtySpawnConfig {
            worktree_path: self.worktree_path.clone(),
            command: command.to_string(),
            env,
            port: Some(port),
            ..PtySpawnConfig::default()
        })?;

        log::info!("Agent {} server PTY started on port {port}", self.session_key());
        self.server_pty = Some(server_pty);
        self.tunnel_port = Some(port);
        Ok(())
    }

    /// Non-blocking check whether the CLI process has exited.
    ///
    /// Moves `Running` to `Completed` (exit code 0) or `Failed`. Returns
    /// true when the status changed.
    pub fn refresh_status(&mut self) -> bool {
        if self.status != AgentStatus::Running {
            return false;
        }
        let Some(exit) = self.cli_pty.try_wait() else {
            return false;
        };

        self.status = if exit.success() {
            AgentStatus::Completed
        } else {
            AgentStatus::Failed(format!("exit code {}", exit.exit_code()))
        };
        log::info!("Agent {} is now {}", self.session_key(), self.status);
        true
    }

    /// Check if the dev server accepts connections on the tunnel port.
    #[must_use]
    pub fn is_server_running(&self) -> bool {
        let Some(port) = self.tunnel_port else {
            return false;
        };
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        TcpStream::connect_timeout(&addr, constants::SERVER_PROBE_TIMEOUT).is_ok()
    }

    /// Kill every process and release the PTYs.
    ///
    /// Idempotent. Waiting on each child is bounded.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        log::info!("Closing agent {}", self.session_key());

        if let Some(server_pty) = self.server_pty.as_mut() {
            server_pty.close();
        }
        self.cli_pty.close();
        self.active_view = PtyView::Cli;
    }

    /// True once [`close()`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // =========================================================================
    // Metadata & Info
    // =========================================================================

    /// Get how long this agent has been running.
    #[must_use]
    pub fn age(&self) -> Duration {
        chrono::Utc::now()
            .signed_duration_since(self.start_time)
            .to_std()
            .unwrap_or_default()
    }

    /// Most recent PTY activity across sessions (ms since epoch).
    #[must_use]
    pub fn last_activity_ms(&self) -> i64 {
        let server = self
            .server_pty
            .as_ref()
            .map_or(i64::MIN, PtySession::last_activity_ms);
        self.cli_pty.last_activity_ms().max(server)
    }

    /// Time since the last PTY output or input.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        let idle_ms = spawn::now_ms().saturating_sub(self.last_activity_ms());
        Duration::from_millis(u64::try_from(idle_ms).unwrap_or(0))
    }

    /// Poll for pending notifications from the CLI PTY (non-blocking).
    #[must_use]
    pub fn poll_notifications(&self) -> Vec<AgentNotification> {
        self.cli_pty.poll_notifications()
    }

    // =========================================================================
    // Display
    // =========================================================================

    /// Current screen of the active PTY.
    #[must_use]
    pub fn get_screen(&self) -> Vec<StyledLine> {
        self.get_active_pty().screen()
    }

    /// Current screen of the active PTY as ANSI.
    #[must_use]
    pub fn get_screen_as_ansi(&self) -> Vec<u8> {
        self.get_active_pty().screen_as_ansi()
    }

    /// Content hash of the active PTY's screen.
    #[must_use]
    pub fn get_screen_hash(&self) -> u64 {
        self.get_active_pty().content_hash()
    }

    /// Up to `limit` history lines ending `offset` lines before the newest.
    #[must_use]
    pub fn get_scrollback(&self, offset: usize, limit: usize) -> Vec<StyledLine> {
        self.get_active_pty().scrollback_lines(offset, limit)
    }

    /// Number of history lines in the active PTY.
    #[must_use]
    pub fn scrollback_count(&self) -> usize {
        self.get_active_pty().scrollback_count()
    }

    /// What a view scrolled `offset` lines above live shows.
    ///
    /// `offset == 0` is the live screen.
    #[must_use]
    pub fn get_display_lines(&self, offset: usize) -> Vec<StyledLine> {
        let pty = self.get_active_pty();
        let screen = pty.screen();
        if offset == 0 {
            return screen;
        }
        let offset = offset.min(pty.scrollback_count());
        let (history_offset, limit) = scroll::history_request(offset, screen.len());
        scroll::compose_window(pty.scrollback_lines(history_offset, limit), &screen, offset)
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        // PtySession's Drop would also close, but this keeps the log line.
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_agent(temp_dir: &TempDir) -> Agent {
        Agent::new(
            uuid::Uuid::new_v4(),
            "test/repo".to_string(),
            Some(1),
            "issue-1".to_string(),
            temp_dir.path().to_path_buf(),
        )
    }

    #[test]
    fn test_agent_creation() {
        let temp_dir = TempDir::new().unwrap();
        let agent = test_agent(&temp_dir);

        assert_eq!(agent.repo, "test/repo");
        assert_eq!(agent.issue_number, Some(1));
        assert_eq!(agent.branch_name, "issue-1");
        assert_eq!(agent.status, AgentStatus::Initializing);
        assert_eq!(agent.active_view(), PtyView::Cli);
    }

    #[test]
    fn test_session_key_for_formats() {
        assert_eq!(session_key_for("owner/repo", Some(7), "ignored"), "owner-repo-7");
        assert_eq!(
            session_key_for("owner/repo", None, "feature/a/b"),
            "owner-repo-feature-a-b"
        );
        assert_eq!(session_key_for("solo", None, "main"), "solo-main");
    }

    #[test]
    fn test_session_key() {
        let temp_dir = TempDir::new().unwrap();
        let agent = Agent::new(
            uuid::Uuid::new_v4(),
            "owner/repo".to_string(),
            Some(42),
            "issue-42".to_string(),
            temp_dir.path().to_path_buf(),
        );
        assert_eq!(agent.session_key(), "owner-repo-42");

        let branch_agent = Agent::new(
            uuid::Uuid::new_v4(),
            "owner/repo".to_string(),
            None,
            "feature/login".to_string(),
            temp_dir.path().to_path_buf(),
        );
        assert_eq!(branch_agent.session_key(), "owner-repo-feature-login");
    }

    #[test]
    fn test_agent_age() {
        let temp_dir = TempDir::new().unwrap();
        let agent = test_agent(&temp_dir);
        assert!(agent.age().as_millis() < 1000);
    }

    #[test]
    fn test_get_pty_server_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let agent = test_agent(&temp_dir);

        // Without server_pty, Server view falls back to CLI
        let pty = agent.get_pty(PtyView::Server);
        assert_eq!(pty.dimensions(), (24, 80));
    }

    #[test]
    fn test_get_pty_server_when_available() {
        let temp_dir = TempDir::new().unwrap();
        let mut agent = test_agent(&temp_dir);
        agent.server_pty = Some(PtySession::new(40, 120));

        let pty = agent.get_pty(PtyView::Server);
        assert_eq!(pty.dimensions(), (40, 120));
    }

    #[test]
    fn test_toggle_without_server_stays_on_cli() {
        let temp_dir = TempDir::new().unwrap();
        let mut agent = test_agent(&temp_dir);

        assert_eq!(agent.toggle_pty_view(), PtyView::Cli);
        assert_eq!(agent.active_view(), PtyView::Cli);
    }

    #[test]
    fn test_toggle_with_server_flips() {
        let temp_dir = TempDir::new().unwrap();
        let mut agent = test_agent(&temp_dir);
        agent.server_pty = Some(PtySession::new(24, 80));

        assert_eq!(agent.toggle_pty_view(), PtyView::Server);
        assert_eq!(agent.toggle_pty_view(), PtyView::Cli);
    }

    #[test]
    fn test_write_input_before_spawn_errors() {
        let temp_dir = TempDir::new().unwrap();
        let agent = test_agent(&temp_dir);
        assert!(agent.write_input(b"ls\n").is_err());
    }

    #[test]
    fn test_resize_applies_to_every_pty() {
        let temp_dir = TempDir::new().unwrap();
        let mut agent = test_agent(&temp_dir);
        agent.server_pty = Some(PtySession::new(24, 80));

        agent.resize(30, 100).unwrap();
        assert_eq!(agent.get_screen().len(), 30);
        assert_eq!(agent.get_pty(PtyView::Server).dimensions(), (30, 100));
        assert_eq!(agent.get_pty(PtyView::Server).screen().len(), 30);
    }

    #[test]
    fn test_close_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let mut agent = test_agent(&temp_dir);
        agent.close();
        agent.close();
        assert!(agent.is_closed());
        assert!(agent.spawn("echo hi", &HashMap::new()).is_err());
    }

    #[test]
    fn test_spawn_failure_leaves_status_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let mut agent = test_agent(&temp_dir);
        assert!(agent.spawn("", &HashMap::new()).is_err());
        assert_eq!(agent.status, AgentStatus::Initializing);
    }

    #[test]
    fn test_refresh_status_ignores_unspawned_agent() {
        let temp_dir = TempDir::new().unwrap();
        let mut agent = test_agent(&temp_dir);
        assert!(!agent.refresh_status());
        assert_eq!(agent.status, AgentStatus::Initializing);
    }

    #[test]
    fn test_is_server_running_without_port() {
        let temp_dir = TempDir::new().unwrap();
        let agent = test_agent(&temp_dir);
        assert!(!agent.is_server_running());
    }

    #[test]
    fn test_display_lines_live_is_screen() {
        let temp_dir = TempDir::new().unwrap();
        let agent = test_agent(&temp_dir);
        assert_eq!(agent.get_display_lines(0), agent.get_screen());
        // No history: any offset clamps back to the live screen.
        assert_eq!(agent.get_display_lines(5), agent.get_screen());
    }

    #[test]
    fn test_with_buffer_capacities_keeps_dimensions() {
        let temp_dir = TempDir::new().unwrap();
        let agent = Agent::new_with_dims(
            uuid::Uuid::new_v4(),
            "test/repo".to_string(),
            None,
            "main".to_string(),
            temp_dir.path().to_path_buf(),
            (10, 40),
        )
        .with_buffer_capacities(BufferCapacities {
            raw_chunks: 8,
            scrollback_lines: 50,
        });
        assert_eq!(agent.get_pty_size(), (10, 40));
    }

    #[test]
    fn test_pty_view_default() {
        assert_eq!(PtyView::default(), PtyView::Cli);
        assert_eq!(PtyView::Server.to_string(), "server");
    }
}
