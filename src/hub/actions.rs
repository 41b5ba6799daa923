//! Hub actions - commands that can be dispatched to modify hub state.
//!
//! Actions represent user intent from any input source (keyboard, remote
//! UI, server messages). The Hub processes them uniformly regardless of
//! their origin.
//!
//! # Dispatch
//!
//! [`dispatch()`] is the central handler. Failures are logged, never
//! returned: an action that cannot apply (no agent selected, PTY not yet
//! spawned) is a no-op.

use super::lifecycle::SpawnRequest;
use super::Hub;

/// Actions that can be dispatched to the Hub.
///
/// # Example
///
/// ```ignore
/// hub.handle_action(HubAction::SelectNext);
/// hub.handle_action(HubAction::SendInput(b"ls\r".to_vec()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubAction {
    // === Agent Lifecycle ===
    /// Spawn a new agent for a unit of work.
    SpawnAgent(SpawnRequest),

    /// Close an agent and optionally delete its worktree.
    CloseAgent {
        /// Session key of the agent to close.
        session_key: String,
        /// Whether to delete the worktree.
        delete_worktree: bool,
    },

    /// Close the currently selected agent, keeping its worktree.
    KillSelectedAgent,

    // === Agent Selection ===
    /// Select the next agent in the list.
    SelectNext,

    /// Select the previous agent in the list.
    SelectPrevious,

    /// Select an agent by 1-based index (for keyboard shortcuts 1-9).
    SelectByIndex(usize),

    /// Select an agent by session key.
    SelectByKey(String),

    // === Agent Interaction ===
    /// Send input to the selected agent's active PTY.
    SendInput(Vec<u8>),

    /// Toggle between CLI and Server PTY views.
    TogglePtyView,

    /// Resize every agent's PTYs.
    Resize {
        /// Terminal rows.
        rows: u16,
        /// Terminal columns.
        cols: u16,
    },

    // === Scrolling ===
    /// Scroll the terminal up by the given number of lines.
    ScrollUp(usize),

    /// Scroll the terminal down by the given number of lines.
    ScrollDown(usize),

    /// Scroll up one page.
    PageUp,

    /// Scroll down one page.
    PageDown,

    /// Scroll to the top of the scrollback buffer.
    ScrollToTop,

    /// Scroll to the bottom (live view).
    ScrollToBottom,

    // === Hub Control ===
    /// Toggle server polling on/off.
    TogglePolling,

    /// Request application quit.
    Quit,
}

/// Dispatch a hub action, modifying hub state accordingly.
pub fn dispatch(hub: &mut Hub, action: HubAction) {
    match action {
        HubAction::SpawnAgent(request) => {
            if let Err(e) = hub.spawn_agent(&request) {
                log::error!("Failed to spawn agent {}: {e:#}", request.session_key());
            }
        }

        HubAction::CloseAgent {
            session_key,
            delete_worktree,
        } => {
            hub.close_agent(&session_key, delete_worktree);
        }

        HubAction::KillSelectedAgent => {
            if let Some(key) = hub.selected_key().map(String::from) {
                hub.close_agent(&key, false);
            }
        }

        HubAction::SelectNext => hub.select_next(),
        HubAction::SelectPrevious => hub.select_previous(),
        HubAction::SelectByIndex(index) => hub.select_by_index(index),
        HubAction::SelectByKey(key) => {
            if !hub.select_by_key(&key) {
                log::debug!("Cannot select unknown agent {key}");
            }
        }

        HubAction::SendInput(data) => hub.send_input(&data),

        HubAction::TogglePtyView => {
            hub.with_selected_agent_mut(|agent| {
                let view = agent.toggle_pty_view();
                log::debug!("Agent {} now shows {view}", agent.session_key());
            });
            // The other PTY has its own history
            hub.reset_scroll();
        }

        HubAction::Resize { rows, cols } => hub.resize(rows, cols),

        HubAction::ScrollUp(lines) => {
            let max = hub.selected_scrollback_count();
            hub.apply_scroll(|scroll| scroll.up(lines, max));
        }
        HubAction::ScrollDown(lines) => hub.apply_scroll(|scroll| scroll.down(lines)),
        HubAction::PageUp => {
            let max = hub.selected_scrollback_count();
            hub.apply_scroll(|scroll| scroll.page_up(max));
        }
        HubAction::PageDown => hub.apply_scroll(|scroll| scroll.page_down()),
        HubAction::ScrollToTop => {
            let max = hub.selected_scrollback_count();
            hub.apply_scroll(|scroll| scroll.to_top(max));
        }
        HubAction::ScrollToBottom => hub.apply_scroll(|scroll| scroll.to_bottom()),

        HubAction::TogglePolling => {
            hub.toggle_polling();
            log::info!(
                "Polling {}",
                if hub.is_polling_enabled() { "enabled" } else { "disabled" }
            );
        }

        HubAction::Quit => hub.request_quit(),
    }
}
