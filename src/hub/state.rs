//! Hub state management.
//!
//! [`HubState`] is the agent registry. It is the one structure mutated by
//! more than one actor (the tick loop and external close requests), so it
//! lives behind a single mutex: insert, remove, and iterate are each one
//! critical section and nobody ever sees a half-removed agent.
//!
//! Keys are kept in insertion order for stable next/previous navigation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::agent::Agent;

/// Shared handle to the registry.
pub type SharedHubState = Arc<Mutex<HubState>>;

/// Registry of agents keyed by session key.
#[derive(Default)]
pub struct HubState {
    agents: HashMap<String, Agent>,
    /// Session keys in creation order.
    agent_keys_ordered: Vec<String>,
}

impl std::fmt::Debug for HubState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubState")
            .field("agents", &self.agent_keys_ordered)
            .finish()
    }
}

impl HubState {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty registry behind the shared mutex.
    #[must_use]
    pub fn shared() -> SharedHubState {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Insert an agent under its session key.
    ///
    /// An agent already registered under the key is returned, not closed.
    pub fn add_agent(&mut self, agent: Agent) -> Option<Agent> {
        let key = agent.session_key();
        let previous = self.agents.insert(key.clone(), agent);
        if previous.is_none() {
            self.agent_keys_ordered.push(key);
        }
        previous
    }

    /// Remove an agent. The caller is responsible for closing it.
    pub fn remove_agent(&mut self, session_key: &str) -> Option<Agent> {
        let agent = self.agents.remove(session_key)?;
        self.agent_keys_ordered.retain(|k| k != session_key);
        Some(agent)
    }

    /// Remove every agent, oldest first.
    pub fn drain(&mut self) -> Vec<Agent> {
        let keys = std::mem::take(&mut self.agent_keys_ordered);
        keys.iter()
            .filter_map(|key| self.agents.remove(key))
            .collect()
    }

    /// Look up an agent.
    #[must_use]
    pub fn get_agent(&self, session_key: &str) -> Option<&Agent> {
        self.agents.get(session_key)
    }

    /// Look up an agent mutably.
    pub fn get_agent_mut(&mut self, session_key: &str) -> Option<&mut Agent> {
        self.agents.get_mut(session_key)
    }

    /// Whether an agent is registered under `session_key`.
    #[must_use]
    pub fn contains(&self, session_key: &str) -> bool {
        self.agents.contains_key(session_key)
    }

    /// Number of registered agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Session keys in creation order.
    #[must_use]
    pub fn agent_keys(&self) -> &[String] {
        &self.agent_keys_ordered
    }

    /// Agents in creation order.
    pub fn agents(&self) -> impl Iterator<Item = (&String, &Agent)> {
        self.agent_keys_ordered
            .iter()
            .filter_map(|key| self.agents.get_key_value(key))
    }

    /// Agents mutably, in arbitrary order.
    pub fn agents_mut(&mut self) -> impl Iterator<Item = (&String, &mut Agent)> {
        self.agents.iter_mut()
    }

    /// Key after `current`, wrapping. First key when `current` is unknown.
    #[must_use]
    pub fn next_key(&self, current: Option<&str>) -> Option<String> {
        let keys = &self.agent_keys_ordered;
        if keys.is_empty() {
            return None;
        }
        let next = match current.and_then(|c| keys.iter().position(|k| k == c)) {
            Some(idx) => (idx + 1) % keys.len(),
            None => 0,
        };
        Some(keys[next].clone())
    }

    /// Key before `current`, wrapping. Last key when `current` is unknown.
    #[must_use]
    pub fn previous_key(&self, current: Option<&str>) -> Option<String> {
        let keys = &self.agent_keys_ordered;
        let prev = match current.and_then(|c| keys.iter().position(|k| k == c)) {
            Some(0) | None => keys.len().checked_sub(1)?,
            Some(idx) => idx - 1,
        };
        Some(keys[prev].clone())
    }
}
