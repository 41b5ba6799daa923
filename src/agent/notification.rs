//! Terminal notification detection for agent PTY output.
//!
//! Agents signal events such as task completion with OSC (Operating
//! System Command) escape sequences. The VT100 engine runs a tokenizer
//! alongside the emulator that hands every OSC it sees to
//! [`parse_osc_notification`], so a sequence split across two PTY reads is
//! still recognized.
//!
//! # Supported Notification Types
//!
//! - **OSC 9**: Simple notification with message (`ESC ] 9 ; message BEL`)
//! - **OSC 777**: Rich notification with title and body (`ESC ] 777 ; notify ; title ; body BEL`)
//!
//! # Example
//!
//! ```
//! use botster_hub::agent::notification::{detect_notifications, AgentNotification};
//!
//! let data = b"\x1b]9;Build complete\x07";
//! let notifications = detect_notifications(data);
//! assert_eq!(notifications.len(), 1);
//! ```

// Rust guideline compliant 2026-02

use alacritty_terminal::vte::{self, Perform};

/// Notification types detected from PTY output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentNotification {
    /// OSC 9 notification with optional message.
    ///
    /// Format: `ESC ] 9 ; message BEL` or `ESC ] 9 ; message ESC \`
    Osc9(Option<String>),

    /// OSC 777 notification (rxvt-unicode style) with title and body.
    ///
    /// Format: `ESC ] 777 ; notify ; title ; body BEL`
    Osc777 {
        /// Notification title.
        title: String,
        /// Notification body text.
        body: String,
    },
}

impl AgentNotification {
    /// Short human-readable text, used when forwarding to the server.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Osc9(Some(msg)) => msg.clone(),
            Self::Osc9(None) => String::new(),
            Self::Osc777 { title, body } if body.is_empty() => title.clone(),
            Self::Osc777 { title, body } if title.is_empty() => body.clone(),
            Self::Osc777 { title, body } => format!("{title}: {body}"),
        }
    }

    /// Wire name of the notification kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Osc9(_) => "osc9",
            Self::Osc777 { .. } => "osc777",
        }
    }
}

/// Agent execution status.
///
/// `Initializing -> Running -> {Completed, Failed}`. A failed agent stays
/// in the registry until it is explicitly closed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AgentStatus {
    /// Agent is created but its process has not started.
    Initializing,
    /// Agent process is running.
    Running,
    /// Agent process exited successfully.
    Completed,
    /// Agent process exited with an error.
    Failed(String),
}

impl AgentStatus {
    /// True once the process has exited, successfully or not.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Initializing => write!(f, "initializing"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Completed => write!(f, "completed"),
            AgentStatus::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Interpret the parameters of one OSC sequence as a notification.
///
/// `params` are the `;`-separated fields as delivered by the `vte` tokenizer,
/// so `params[0]` is the OSC number.
///
/// OSC 9 messages that look like escape sequences (only digits and
/// semicolons, e.g. ConEmu progress reports) are ignored.
#[must_use]
pub fn parse_osc_notification(params: &[&[u8]]) -> Option<AgentNotification> {
    let (&code, rest) = params.split_first()?;

    match code {
        b"9" => {
            let message = join_params(rest);
            let is_escape_sequence = message.chars().all(|c| c.is_ascii_digit() || c == ';');
            if message.is_empty() || is_escape_sequence {
                return None;
            }
            Some(AgentNotification::Osc9(Some(message)))
        }
        b"777" => {
            let (&action, fields) = rest.split_first()?;
            if action != b"notify" {
                return None;
            }
            let title = fields
                .first()
                .map(|t| String::from_utf8_lossy(t).into_owned())
                .unwrap_or_default();
            let body = fields.get(1..).map(join_params).unwrap_or_default();
            if title.is_empty() && body.is_empty() {
                return None;
            }
            Some(AgentNotification::Osc777 { title, body })
        }
        _ => None,
    }
}

fn join_params(params: &[&[u8]]) -> String {
    params
        .iter()
        .map(|p| String::from_utf8_lossy(p))
        .collect::<Vec<_>>()
        .join(";")
}

/// Detect terminal notifications in a standalone chunk of PTY output.
///
/// Supports both BEL (0x07) and ST (ESC \) terminators. Sequences cut off
/// at the end of `data` are not reported; use the engine's
/// [`take_notifications`](crate::terminal::Vt100Engine::take_notifications)
/// for a continuous stream.
#[must_use]
pub fn detect_notifications(data: &[u8]) -> Vec<AgentNotification> {
    let mut collector = OscCollector::default();
    let mut parser: vte::Parser = vte::Parser::new();
    parser.advance(&mut collector, data);
    collector.notifications
}

#[derive(Default)]
struct OscCollector {
    notifications: Vec<AgentNotification>,
}

impl Perform for OscCollector {
    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        if let Some(notification) = parse_osc_notification(params) {
            self.notifications.push(notification);
        }
    }
}
