//! Server polling and heartbeat logic.
//!
//! Handles communication with the control plane for:
//! - Message polling (fetching pending work)
//! - Message acknowledgment
//! - Heartbeat registration
//! - Agent notifications
//!
//! # Design
//!
//! Functions in this module are regular functions (M-REGULAR-FN) rather than
//! methods on Hub, making them independently testable. Failures are logged
//! and swallowed: a flaky control plane must never stall the tick loop
//! for longer than one request timeout.

use std::time::{Duration, Instant};

use anyhow::Result;
use reqwest::blocking::Client;

use crate::constants;
use crate::server::types::{
    AgentHeartbeatInfo, HeartbeatPayload, MessageData, MessageResponse, NotificationPayload,
};

/// Configuration for server polling operations.
#[derive(Debug)]
pub struct PollingConfig<'a> {
    /// HTTP client for requests.
    pub client: &'a Client,
    /// Base URL for the control plane.
    pub server_url: &'a str,
    /// API key for authentication.
    pub api_key: &'a str,
    /// Hub identifier used in every URL.
    pub hub_identifier: &'a str,
}

/// Timing state for polling operations.
#[derive(Debug)]
pub struct PollingState {
    /// Last poll timestamp.
    pub last_poll: Instant,
    /// Last heartbeat timestamp.
    pub last_heartbeat: Instant,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl PollingState {
    /// Timers for the given cadences.
    ///
    /// Both start in the past so the first tick polls and heartbeats.
    #[must_use]
    pub fn new(poll_interval: Duration, heartbeat_interval: Duration) -> Self {
        let past = Instant::now()
            .checked_sub(constants::HEARTBEAT_INITIAL_OFFSET)
            .unwrap_or_else(Instant::now);
        Self {
            last_poll: past,
            last_heartbeat: past,
            poll_interval,
            heartbeat_interval,
        }
    }

    /// Check if enough time has elapsed for a poll.
    #[must_use]
    pub fn should_poll(&self) -> bool {
        self.last_poll.elapsed() >= self.poll_interval
    }

    /// Check if enough time has elapsed for a heartbeat.
    #[must_use]
    pub fn should_heartbeat(&self) -> bool {
        self.last_heartbeat.elapsed() >= self.heartbeat_interval
    }

    /// Mark poll as completed.
    pub fn mark_polled(&mut self) {
        self.last_poll = Instant::now();
    }

    /// Mark heartbeat as sent.
    pub fn mark_heartbeat_sent(&mut self) {
        self.last_heartbeat = Instant::now();
    }
}

/// Build the blocking client used for control-plane calls.
///
/// # Errors
///
/// Fails if the TLS backend cannot be initialized.
pub fn build_client() -> Result<Client> {
    Ok(Client::builder()
        .timeout(constants::HTTP_REQUEST_TIMEOUT)
        .build()?)
}

/// Poll the server for pending messages.
///
/// Returns messages if polling succeeds, or an empty vec if it failed.
pub fn poll_messages(config: &PollingConfig, repo_name: &str) -> Vec<MessageData> {
    let url = format!(
        "{}/hubs/{}/messages",
        config.server_url, config.hub_identifier
    );

    let response = match config
        .client
        .get(&url)
        .query(&[("repo", repo_name)])
        .bearer_auth(config.api_key)
        .send()
    {
        Ok(r) => r,
        Err(e) => {
            log::warn!("Failed to connect to server: {e}");
            return Vec::new();
        }
    };

    if !response.status().is_success() {
        log::warn!("Failed to poll messages: {}", response.status());
        return Vec::new();
    }

    match response.json::<MessageResponse>() {
        Ok(r) => {
            if !r.messages.is_empty() {
                log::info!("Polled {} pending messages", r.messages.len());
            }
            r.messages
        }
        Err(e) => {
            log::warn!("Failed to parse message response: {e}");
            Vec::new()
        }
    }
}

/// Acknowledge a message to the server.
///
/// Marks the message as processed so it won't be returned again.
pub fn acknowledge_message(config: &PollingConfig, message_id: i64) -> bool {
    let url = format!(
        "{}/hubs/{}/messages/{message_id}",
        config.server_url, config.hub_identifier
    );

    match config
        .client
        .patch(&url)
        .bearer_auth(config.api_key)
        .header("Content-Type", "application/json")
        .send()
    {
        Ok(response) if response.status().is_success() => {
            log::debug!("Acknowledged message {message_id}");
            true
        }
        Ok(response) => {
            log::warn!(
                "Failed to acknowledge message {message_id}: {}",
                response.status()
            );
            false
        }
        Err(e) => {
            log::warn!("Failed to acknowledge message {message_id}: {e}");
            false
        }
    }
}

/// Send heartbeat to register hub with server.
///
/// Reports active agents and hub status.
pub fn send_heartbeat(
    config: &PollingConfig,
    repo_name: &str,
    hub_name: Option<&str>,
    agents: Vec<AgentHeartbeatInfo>,
) -> bool {
    let url = format!("{}/hubs/{}", config.server_url, config.hub_identifier);
    let agent_count = agents.len();
    let payload = HeartbeatPayload {
        repo: repo_name.to_string(),
        hub_name: hub_name.map(String::from),
        agents,
    };

    match config
        .client
        .put(&url)
        .bearer_auth(config.api_key)
        .json(&payload)
        .send()
    {
        Ok(response) if response.status().is_success() => {
            log::debug!("Heartbeat sent: {agent_count} agents registered");
            true
        }
        Ok(response) => {
            log::warn!("Heartbeat failed: {}", response.status());
            false
        }
        Err(e) => {
            log::warn!("Failed to send heartbeat: {e}");
            false
        }
    }
}

/// Send an agent notification to the server.
///
/// Used when agents emit OSC notifications that should be forwarded.
///
/// # Errors
///
/// Fails on transport errors and non-success statuses.
pub fn send_agent_notification(config: &PollingConfig, payload: &NotificationPayload) -> Result<()> {
    let url = format!(
        "{}/hubs/{}/notifications",
        config.server_url, config.hub_identifier
    );

    let response = config
        .client
        .post(&url)
        .bearer_auth(config.api_key)
        .json(payload)
        .send()?;

    if response.status().is_success() {
        log::info!(
            "Sent notification to server: type={}",
            payload.notification_type
        );
        Ok(())
    } else {
        anyhow::bail!("Failed to send notification: {}", response.status())
    }
}

/// Check if polling should be skipped.
///
/// Returns true if:
/// - Quit flag is set
/// - Polling is disabled
/// - Offline mode is enabled
#[must_use]
pub fn should_skip_polling(quit: bool, polling_enabled: bool, offline: bool) -> bool {
    quit || !polling_enabled || offline
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Mock server on its own runtime so the blocking client runs outside it.
    fn mock_server() -> (tokio::runtime::Runtime, MockServer) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let server = runtime.block_on(MockServer::start());
        (runtime, server)
    }

    #[test]
    fn test_polling_state_starts_due() {
        let state = PollingState::new(Duration::from_secs(5), Duration::from_secs(30));
        // Should poll immediately after creation (timestamps initialized to past)
        assert!(state.should_poll());
        assert!(state.should_heartbeat());
    }

    #[test]
    fn test_polling_state_marks() {
        let mut state = PollingState::new(Duration::from_secs(5), Duration::from_secs(30));
        state.mark_polled();
        state.mark_heartbeat_sent();
        assert!(!state.should_poll());
        assert!(!state.should_heartbeat());
    }

    #[test]
    fn test_should_skip_polling() {
        assert!(should_skip_polling(true, true, false)); // quit = true
        assert!(should_skip_polling(false, false, false)); // polling disabled
        assert!(should_skip_polling(false, true, true)); // offline
        assert!(!should_skip_polling(false, true, false)); // normal operation
    }

    #[test]
    fn test_poll_messages_parses_response() {
        let (runtime, server) = mock_server();
        runtime.block_on(
            Mock::given(method("GET"))
                .and(path("/hubs/hub-1/messages"))
                .and(query_param("repo", "owner/repo"))
                .and(header("authorization", "Bearer btstr_key"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "messages": [
                        {"id": 11, "event_type": "issue_comment", "payload": {"issue_number": 5}}
                    ]
                })))
                .mount(&server),
        );

        let client = build_client().unwrap();
        let uri = server.uri();
        let config = PollingConfig {
            client: &client,
            server_url: &uri,
            api_key: "btstr_key",
            hub_identifier: "hub-1",
        };

        let messages = poll_messages(&config, "owner/repo");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, 11);
    }

    #[test]
    fn test_poll_messages_failure_is_empty() {
        let (runtime, server) = mock_server();
        runtime.block_on(
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(500))
                .mount(&server),
        );

        let client = build_client().unwrap();
        let uri = server.uri();
        let config = PollingConfig {
            client: &client,
            server_url: &uri,
            api_key: "k",
            hub_identifier: "hub-1",
        };
        assert!(poll_messages(&config, "owner/repo").is_empty());
    }

    #[test]
    fn test_acknowledge_and_heartbeat() {
        let (runtime, server) = mock_server();
        runtime.block_on(async {
            Mock::given(method("PATCH"))
                .and(path("/hubs/hub-1/messages/11"))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;
            Mock::given(method("PUT"))
                .and(path("/hubs/hub-1"))
                .and(body_partial_json(serde_json::json!({
                    "repo": "owner/repo",
                    "agents": [{"session_key": "owner-repo-5", "status": "running"}]
                })))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;
        });

        let client = build_client().unwrap();
        let uri = server.uri();
        let config = PollingConfig {
            client: &client,
            server_url: &uri,
            api_key: "k",
            hub_identifier: "hub-1",
        };

        assert!(acknowledge_message(&config, 11));
        assert!(send_heartbeat(
            &config,
            "owner/repo",
            None,
            vec![AgentHeartbeatInfo {
                session_key: "owner-repo-5".to_string(),
                last_invocation_url: None,
                status: "running".to_string(),
                tunnel_port: None,
            }],
        ));
        runtime.block_on(server.verify());
    }

    #[test]
    fn test_send_agent_notification_reports_status() {
        let (runtime, server) = mock_server();
        runtime.block_on(
            Mock::given(method("POST"))
                .and(path("/hubs/hub-1/notifications"))
                .respond_with(ResponseTemplate::new(422))
                .mount(&server),
        );

        let client = build_client().unwrap();
        let uri = server.uri();
        let config = PollingConfig {
            client: &client,
            server_url: &uri,
            api_key: "k",
            hub_identifier: "hub-1",
        };
        let payload = NotificationPayload {
            repo: "owner/repo".to_string(),
            issue_number: Some(5),
            invocation_url: None,
            notification_type: "question_asked".to_string(),
            message: Some("Need input".to_string()),
        };
        assert!(send_agent_notification(&config, &payload).is_err());
    }
}
