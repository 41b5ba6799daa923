//! Server message parsing logic.
//!
//! [`ParsedMessage`] pulls the fields the hub routes on out of a polled
//! payload. Payload shapes differ by event source, so every field has a
//! few fallback paths.
//!
//! # Event Types
//!
//! - `issue_comment` - Comment on an issue mentioning the bot
//! - `pull_request` - PR event mentioning the bot
//! - `manual` - Work started from the web UI (branch, no issue)
//! - `agent_cleanup` - Issue/PR was closed, clean up the agent

// Rust guideline compliant 2026-02

use crate::server::types::MessageData;

/// Parsed message information extracted from server payload.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// Message ID for acknowledgment.
    pub message_id: i64,
    /// Event type from the server.
    pub event_type: String,
    /// Repository name (owner/repo format).
    pub repo: Option<String>,
    /// Issue number if applicable.
    pub issue_number: Option<u32>,
    /// Explicit branch for issue-less work.
    pub branch_name: Option<String>,
    /// Task prompt/description.
    pub prompt: Option<String>,
    /// URL where this interaction originated (for responding).
    pub invocation_url: Option<String>,
    /// Comment author if from a comment.
    pub comment_author: Option<String>,
    /// Comment body if from a comment.
    pub comment_body: Option<String>,
}

fn str_field(payload: &serde_json::Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

impl ParsedMessage {
    /// Parse a `MessageData` into a `ParsedMessage`.
    #[must_use]
    pub fn from_message_data(data: &MessageData) -> Self {
        let payload = &data.payload;

        // Extract repo - try multiple paths
        let repo = payload
            .get("repository")
            .and_then(|r| r.get("full_name"))
            .and_then(|n| n.as_str())
            .map(String::from)
            .or_else(|| str_field(payload, "repo"));

        let issue_number = payload
            .get("issue_number")
            .and_then(serde_json::Value::as_u64)
            .or_else(|| {
                payload
                    .get("issue")
                    .and_then(|i| i.get("number"))
                    .and_then(serde_json::Value::as_u64)
            })
            .or_else(|| {
                payload
                    .get("pull_request")
                    .and_then(|pr| pr.get("number"))
                    .and_then(serde_json::Value::as_u64)
            })
            .and_then(|n| u32::try_from(n).ok());

        // Prefer explicit prompt over context
        let prompt = str_field(payload, "prompt").or_else(|| str_field(payload, "context"));

        let invocation_url =
            str_field(payload, "issue_url").or_else(|| str_field(payload, "invocation_url"));

        Self {
            message_id: data.id,
            event_type: data.event_type.clone(),
            repo,
            issue_number,
            branch_name: str_field(payload, "branch_name").or_else(|| str_field(payload, "branch")),
            prompt,
            invocation_url,
            comment_author: str_field(payload, "comment_author"),
            comment_body: str_field(payload, "comment_body"),
        }
    }

    /// Check if this message is a cleanup request.
    #[must_use]
    pub fn is_cleanup(&self) -> bool {
        self.event_type == "agent_cleanup"
    }

    /// Branch the agent for this message works on.
    ///
    /// Issue work gets `botster-issue-{n}`; otherwise the explicit branch.
    #[must_use]
    pub fn branch(&self) -> Option<String> {
        self.issue_number
            .map(|n| format!("botster-issue-{n}"))
            .or_else(|| self.branch_name.clone())
    }

    /// Get a notification string for pinging an existing agent.
    ///
    /// Used when an agent already exists for this issue and we need
    /// to notify it of a new mention.
    #[must_use]
    pub fn format_notification(&self) -> String {
        if let Some(prompt) = &self.prompt {
            format!(
                "=== NEW MENTION (automated notification) ===\n\n{}\n\n==================",
                prompt
            )
        } else {
            let author = self.comment_author.as_deref().unwrap_or("unknown");
            let body = self.comment_body.as_deref().unwrap_or("New mention");
            format!(
                "=== NEW MENTION (automated notification) ===\n{} mentioned you: {}\n==================",
                author, body
            )
        }
    }

    /// Get the task description for spawning a new agent.
    #[must_use]
    pub fn task_description(&self) -> String {
        self.prompt
            .clone()
            .or_else(|| self.comment_body.clone())
            .unwrap_or_else(|| "Work on this issue".to_string())
    }
}
