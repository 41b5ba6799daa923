//! Control-plane message types.
//!
//! The hub polls the control plane over HTTP for work. This module holds
//! the wire types and the parsing that turns a raw payload into something
//! the hub can route:
//!
//! ```text
//! GET /hubs/{id}/messages ──► MessageData ──► ParsedMessage ──► Hub routing
//! ```
//!
//! # Modules
//!
//! - [`types`] - Request/response data types
//! - [`messages`] - Message parsing

// Rust guideline compliant 2026-02

pub mod messages;
pub mod types;

pub use messages::ParsedMessage;
pub use types::MessageData;
