//! Agent lifecycle management.
//!
//! Regular functions over explicit collaborators (registry, config,
//! provisioner, tunnel) so they can be tested without a whole `Hub`.
//!
//! The registry lock is held only for lookups and the final insert or
//! remove; provisioning, spawning, and closing happen outside it.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Result};

use super::state::SharedHubState;
use super::worktree::{WorktreeProvisioner, INIT_SCRIPT, SERVER_SCRIPT};
use crate::agent::{session_key_for, Agent, BufferCapacities};
use crate::config::Config;
use crate::tunnel::{allocate_tunnel_port, TunnelManager};

/// A unit of work to start an agent for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Repository in "owner/repo" format.
    pub repo: String,
    /// Issue number if issue-based.
    pub issue_number: Option<u32>,
    /// Branch the agent works on.
    pub branch_name: String,
    /// Task description handed to the agent.
    pub prompt: Option<String>,
    /// URL where this work was requested.
    pub invocation_url: Option<String>,
}

impl SpawnRequest {
    /// Session key the agent will have.
    #[must_use]
    pub fn session_key(&self) -> String {
        session_key_for(&self.repo, self.issue_number, &self.branch_name)
    }
}

/// Outcome of [`spawn_agent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnResult {
    /// A new agent is running.
    Spawned {
        /// Session key of the new agent.
        session_key: String,
        /// Dev server port, if a server PTY was started.
        tunnel_port: Option<u16>,
    },
    /// An agent for this work already exists; nothing was started.
    AlreadyRunning(String),
}

/// Everything `spawn_agent` needs besides the request.
#[derive(Debug)]
pub struct SpawnContext<'a> {
    /// Agent registry.
    pub state: &'a SharedHubState,
    /// Hub configuration (command, limits, buffer sizes).
    pub config: &'a Config,
    /// Worktree source.
    pub provisioner: &'a dyn WorktreeProvisioner,
    /// Tunnel to register dev servers with.
    pub tunnel: Option<&'a TunnelManager>,
    /// Initial PTY size.
    pub dims: (u16, u16),
}

/// Environment exported to the agent's processes.
fn agent_env(request: &SpawnRequest, worktree_path: &std::path::Path) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("BOTSTER_REPO".to_string(), request.repo.clone());
    env.insert(
        "BOTSTER_ISSUE_NUMBER".to_string(),
        request.issue_number.map_or_else(|| "0".to_string(), |n| n.to_string()),
    );
    env.insert("BOTSTER_BRANCH_NAME".to_string(), request.branch_name.clone());
    env.insert(
        "BOTSTER_WORKTREE_PATH".to_string(),
        worktree_path.display().to_string(),
    );
    if let Some(prompt) = &request.prompt {
        env.insert("BOTSTER_TASK_DESCRIPTION".to_string(), prompt.clone());
    }
    env
}

/// Provision a worktree, spawn an agent in it, and register it.
///
/// When the worktree contains `.botster_server` a dev server PTY is started
/// on a freshly allocated port and registered with the tunnel. Failing to
/// start the server is logged; the agent still runs.
///
/// # Errors
///
/// Fails when `max_sessions` is reached, provisioning fails, or the CLI
/// process cannot be spawned. Nothing is registered in that case.
pub fn spawn_agent(ctx: &SpawnContext<'_>, request: &SpawnRequest) -> Result<SpawnResult> {
    let session_key = request.session_key();
    {
        let state = ctx.state.lock().expect("hub state lock poisoned");
        if state.contains(&session_key) {
            log::info!("Agent {session_key} already running");
            return Ok(SpawnResult::AlreadyRunning(session_key));
        }
        if state.agent_count() >= ctx.config.max_sessions {
            bail!(
                "Maximum sessions ({}) reached, not spawning {session_key}",
                ctx.config.max_sessions
            );
        }
    }

    let worktree_path: PathBuf = ctx
        .provisioner
        .provision(&request.repo, &request.branch_name)?;

    let mut agent = Agent::new_with_dims(
        uuid::Uuid::new_v4(),
        request.repo.clone(),
        request.issue_number,
        request.branch_name.clone(),
        worktree_path.clone(),
        ctx.dims,
    )
    .with_buffer_capacities(BufferCapacities {
        raw_chunks: ctx.config.raw_buffer_chunks,
        scrollback_lines: ctx.config.scrollback_lines,
    });
    agent.last_invocation_url.clone_from(&request.invocation_url);

    let env = agent_env(request, &worktree_path);
    let init_commands = if worktree_path.join(INIT_SCRIPT).is_file() {
        vec![format!("source {INIT_SCRIPT}")]
    } else {
        Vec::new()
    };

    agent.spawn_with_config(crate::agent::PtySpawnConfig {
        worktree_path: worktree_path.clone(),
        command: ctx.config.agent_command.clone(),
        env: env.clone(),
        init_commands,
        detect_notifications: true,
        ..Default::default()
    })?;

    if worktree_path.join(SERVER_SCRIPT).is_file() {
        match allocate_tunnel_port(&ports_in_use(ctx)) {
            Some(port) => {
                if let Err(e) = agent.spawn_server(&format!("bash {SERVER_SCRIPT}"), &env, port) {
                    log::warn!("Failed to start dev server for {session_key}: {e}");
                }
            }
            None => log::warn!("No free tunnel port for {session_key}"),
        }
    }

    let tunnel_port = agent.tunnel_port;
    {
        let mut state = ctx.state.lock().expect("hub state lock poisoned");
        if state.contains(&session_key) {
            // Lost a race with another spawn for the same work
            drop(state);
            agent.close();
            return Ok(SpawnResult::AlreadyRunning(session_key));
        }
        state.add_agent(agent);
    }

    if let (Some(port), Some(tunnel)) = (tunnel_port, ctx.tunnel) {
        tunnel.register_agent(session_key.clone(), port);
    }

    log::info!("Spawned agent {session_key}");
    Ok(SpawnResult::Spawned {
        session_key,
        tunnel_port,
    })
}

/// Tunnel ports already handed to agents, listening or not.
fn ports_in_use(ctx: &SpawnContext<'_>) -> Vec<u16> {
    let mut ports: Vec<u16> = ctx
        .state
        .lock()
        .expect("hub state lock poisoned")
        .agents()
        .filter_map(|(_, agent)| agent.tunnel_port)
        .collect();
    if let Some(tunnel) = ctx.tunnel {
        ports.extend(tunnel.registered_agents().into_iter().map(|(_, port)| port));
    }
    ports
}

/// Remove an agent from the registry and the tunnel without closing it.
///
/// The caller owns the returned agent and must close it.
pub fn detach_agent(
    state: &SharedHubState,
    tunnel: Option<&TunnelManager>,
    session_key: &str,
) -> Option<Agent> {
    let removed = state
        .lock()
        .expect("hub state lock poisoned")
        .remove_agent(session_key);
    let Some(agent) = removed else {
        log::info!("No agent found with session key: {session_key}");
        return None;
    };

    if let Some(tunnel) = tunnel {
        tunnel.unregister_agent(session_key);
    }
    Some(agent)
}

/// Close a detached agent on its own thread.
///
/// [`Agent::close`] waits on each child and reader thread, a few seconds
/// per PTY at worst, which the tick loop cannot afford. If the thread
/// cannot be spawned the agent is dropped here, which closes it inline.
pub fn close_in_background(mut agent: Agent) {
    let session_key = agent.session_key();
    let spawned = std::thread::Builder::new()
        .name(format!("close-{session_key}"))
        .spawn(move || agent.close());
    if let Err(e) = spawned {
        log::warn!("Closing {session_key} inline, no close thread: {e}");
    }
}

/// Close an agent and optionally delete its worktree.
///
/// Returns `false` if no agent was registered under `session_key`.
/// Worktree deletion failures are logged; the agent is gone regardless.
pub fn close_agent(
    state: &SharedHubState,
    provisioner: &dyn WorktreeProvisioner,
    tunnel: Option<&TunnelManager>,
    session_key: &str,
    delete_worktree: bool,
) -> bool {
    let Some(mut agent) = detach_agent(state, tunnel, session_key) else {
        return false;
    };
    agent.close();

    let label = format_agent_label(agent.issue_number, &agent.branch_name);
    if delete_worktree {
        if let Err(e) = provisioner.teardown(&agent.worktree_path, &agent.branch_name) {
            log::error!("Failed to delete worktree for {label}: {e}");
        } else {
            log::info!("Closed agent and deleted worktree for {label}");
        }
    } else {
        log::info!("Closed agent for {label} (worktree preserved)");
    }

    true
}

/// Format a human-readable label for an agent.
fn format_agent_label(issue_number: Option<u32>, branch_name: &str) -> String {
    if let Some(num) = issue_number {
        format!("issue #{num}")
    } else {
        format!("branch {branch_name}")
    }
}
