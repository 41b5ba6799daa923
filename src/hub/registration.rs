//! Tunnel connection supervision.
//!
//! [`TunnelManager::connect()`] runs one session and reports how it ended;
//! reconnect policy lives here. Failures to reach `Connected` count against
//! a [`RetryPolicy`] with exponential backoff. A session that did connect
//! resets the count, so a long-lived hub rides out network blips
//! indefinitely while a hub that can never connect gives up and reports.

// Rust guideline compliant 2026-02

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::tunnel::TunnelManager;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    /// Delay after the first failure, and before reconnecting after a drop.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th consecutive failure (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }
}

/// Keep the tunnel connected until the retry policy is exhausted.
///
/// Never returns `Ok`; run it as a task and abort the task to stop it.
///
/// # Errors
///
/// The last connection error once `max_attempts` consecutive attempts have
/// failed to reach `Connected`.
pub async fn run_tunnel(manager: Arc<TunnelManager>, policy: RetryPolicy) -> Result<()> {
    let mut failures: u32 = 0;
    loop {
        match manager.connect().await {
            Ok(()) => {
                failures = 0;
                log::warn!(
                    "[Tunnel] Connection lost, reconnecting in {:?}",
                    policy.initial_backoff
                );
                tokio::time::sleep(policy.initial_backoff).await;
            }
            Err(e) => {
                failures += 1;
                if failures >= policy.max_attempts {
                    log::error!("[Tunnel] Giving up after {failures} attempts: {e:#}");
                    return Err(e.context(format!("Tunnel failed after {failures} attempts")));
                }
                let delay = policy.backoff(failures);
                log::warn!(
                    "[Tunnel] Connection attempt {failures}/{} failed: {e:#}; retrying in {delay:?}",
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::{TunnelConfig, TunnelStatus};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(100), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_run_tunnel_gives_up_after_max_attempts() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let manager = Arc::new(TunnelManager::new(TunnelConfig::new(
            "hub-1",
            "btstr_key",
            format!("http://127.0.0.1:{port}"),
        )));
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        };

        let err = run_tunnel(Arc::clone(&manager), policy).await.unwrap_err();
        assert!(format!("{err:#}").contains("after 3 attempts"));
        assert_eq!(manager.get_status(), TunnelStatus::Disconnected);
    }
}
