//! Botster Hub - Agent session engine.
//!
//! This crate runs many concurrent agent sessions on one machine. Each
//! agent owns a CLI PTY and an optional dev-server PTY, and every PTY feeds
//! a VT100 screen model plus a bounded raw-output buffer. Dev servers are
//! exposed to the outside through a WebSocket tunnel that relays HTTP
//! requests to local ports.
//!
//! # Architecture
//!
//! The crate follows a centralized state store pattern:
//!
//! - **Hub** - Central orchestrator, owns the agent registry, runs the tick loop
//! - **Agent** - Domain entity representing a working session
//! - **Terminal** - VT100 screen model with scrollback
//! - **Tunnel** - ActionCable client relaying HTTP to local dev servers
//! - **Server** - Control-plane message types
//!
//! # Modules
//!
//! - [`agent`] - Agent and PTY session management
//! - [`terminal`] - Escape-sequence interpretation and rendering
//! - [`ring_buffer`] - Bounded FIFO used for raw output and scrollback
//! - [`tunnel`] - HTTP tunnel over WebSocket
//! - [`hub`] - Orchestration, lifecycle, polling
//! - [`config`] - Configuration loading/saving

// Library modules
pub mod agent;
pub mod hub;
pub mod ring_buffer;
pub mod server;
pub mod terminal;
pub mod tunnel;

pub mod config;
pub mod constants;
pub mod env;

// Re-export commonly used types
pub use agent::{Agent, AgentStatus, PtyView};
pub use config::Config;
pub use ring_buffer::RingBuffer;
pub use terminal::Vt100Engine;
pub use tunnel::{TunnelManager, TunnelStatus};

// Re-export Hub
pub use hub::{hub_id_for_repo, Hub, HubAction};
