//! Application-wide constants for botster-hub.
//!
//! Centralizes tunables so they are discoverable in one place. Values that
//! users can change live in [`Config`](crate::config::Config); these are
//! the defaults and the fixed cadences.
//!
//! # Categories
//!
//! - **Timeouts**: Network and operation timeouts
//! - **Polling & Heartbeat**: Tick loop and background intervals
//! - **Buffers**: Ring buffer capacities
//! - **Ports**: Dev server port allocation

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for control-plane API calls.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Ceiling for one relayed tunnel request, local forward included.
pub const TUNNEL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the WebSocket handshake to the tunnel endpoint.
pub const TUNNEL_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Connect probe used by `Agent::is_server_running`.
pub const SERVER_PROBE_TIMEOUT: Duration = Duration::from_millis(50);

// ============================================================================
// Polling & Heartbeat
// ============================================================================

/// Heartbeat interval, independent of the poll interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Heartbeat interval in test environments.
pub const TEST_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Default interval between control-plane polls, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Initial offset so the first poll and heartbeat fire immediately.
pub const HEARTBEAT_INITIAL_OFFSET: Duration = Duration::from_secs(60);

/// Hub tick period used by the binary (10 Hz).
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Buffers
// ============================================================================

/// Raw output chunks kept per PTY session for streaming.
pub const DEFAULT_RAW_BUFFER_CHUNKS: usize = 1_000;

// ============================================================================
// Ports
// ============================================================================

/// First port tried for agent dev servers.
pub const TUNNEL_PORT_START: u16 = 4001;

/// End (exclusive) of the dev server port range.
pub const TUNNEL_PORT_END: u16 = 5000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_values_are_reasonable() {
        assert!(HTTP_REQUEST_TIMEOUT >= Duration::from_secs(5));
        assert!(HTTP_REQUEST_TIMEOUT <= Duration::from_secs(60));
        assert!(HEARTBEAT_INTERVAL >= Duration::from_secs(10));
    }

    #[test]
    fn test_heartbeat_faster_in_tests() {
        assert!(TEST_HEARTBEAT_INTERVAL < HEARTBEAT_INTERVAL);
        assert!(HEARTBEAT_INITIAL_OFFSET > HEARTBEAT_INTERVAL);
    }

    #[test]
    fn test_port_range_is_valid() {
        assert!(TUNNEL_PORT_START < TUNNEL_PORT_END);
        assert!(TUNNEL_PORT_START > 1024);
    }
}
