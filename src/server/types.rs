//! Server communication types for the botster-hub API.
//!
//! Serialization shapes for polling, heartbeats, and notifications.

use serde::{Deserialize, Serialize};

/// Individual message data from the server.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageData {
    /// Unique message identifier.
    pub id: i64,
    /// Type of event (e.g., "issue_comment", "agent_cleanup").
    pub event_type: String,
    /// Event payload containing details.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Response from polling messages.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    /// List of pending messages.
    #[serde(default)]
    pub messages: Vec<MessageData>,
}

/// Agent information included in heartbeat payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentHeartbeatInfo {
    /// Unique session key for the agent.
    pub session_key: String,
    /// Last invocation URL for the agent (if any).
    pub last_invocation_url: Option<String>,
    /// Lifecycle status (`running`, `completed`, ...).
    pub status: String,
    /// Dev server port, when the agent has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_port: Option<u16>,
}

/// Heartbeat request payload.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatPayload {
    /// Repository this hub is monitoring.
    pub repo: String,
    /// User-chosen hub name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_name: Option<String>,
    /// List of active agents.
    pub agents: Vec<AgentHeartbeatInfo>,
}

/// Notification request payload.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    /// Repository in "owner/repo" format.
    pub repo: String,
    /// Issue number (optional, for backward compatibility).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<u32>,
    /// Invocation URL (preferred identifier).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_url: Option<String>,
    /// Type of notification.
    pub notification_type: String,
    /// Text the agent attached to the notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_response_parses() {
        let response: MessageResponse = serde_json::from_str(
            r#"{"messages":[{"id":7,"event_type":"issue_comment","payload":{"issue_number":3}}]}"#,
        )
        .unwrap();
        assert_eq!(response.messages.len(), 1);
        assert_eq!(response.messages[0].id, 7);
        assert_eq!(response.messages[0].payload["issue_number"], 3);
    }

    #[test]
    fn test_message_response_tolerates_missing_fields() {
        let response: MessageResponse = serde_json::from_str("{}").unwrap();
        assert!(response.messages.is_empty());

        let data: MessageData =
            serde_json::from_str(r#"{"id":1,"event_type":"agent_cleanup"}"#).unwrap();
        assert!(data.payload.is_null());
    }

    #[test]
    fn test_heartbeat_payload_serialization() {
        let payload = HeartbeatPayload {
            repo: "owner/repo".to_string(),
            hub_name: None,
            agents: vec![AgentHeartbeatInfo {
                session_key: "key1".to_string(),
                last_invocation_url: None,
                status: "running".to_string(),
                tunnel_port: Some(4001),
            }],
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"repo\":\"owner/repo\""));
        assert!(json.contains("\"session_key\":\"key1\""));
        assert!(json.contains("\"tunnel_port\":4001"));
        assert!(!json.contains("hub_name"));
    }

    #[test]
    fn test_notification_payload_skips_empty_fields() {
        let payload = NotificationPayload {
            repo: "owner/repo".to_string(),
            issue_number: Some(42),
            invocation_url: None,
            notification_type: "question_asked".to_string(),
            message: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["issue_number"], 42);
        assert!(json.get("invocation_url").is_none());
        assert!(json.get("message").is_none());
    }
}
