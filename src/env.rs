//! Runtime environment detection.
//!
//! Provides a single source of truth for the runtime environment (test,
//! development, production) based on the `BOTSTER_ENV` environment variable.
//!
//! # Usage
//!
//! ```rust
//! use botster_hub::env::Environment;
//!
//! let heartbeat = Environment::current().heartbeat_interval();
//! assert!(heartbeat.as_secs() > 0);
//! ```
//!
//! # Environment Variable
//!
//! Set `BOTSTER_ENV` to one of:
//! - `test` - Test mode (short heartbeat, project-local config dir)
//! - `system_test` - System test mode against a test server
//! - `development` or `dev` - Development mode
//! - (anything else or unset) - Production mode

use std::time::Duration;

use crate::constants;

/// Runtime environment for the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment.
    Test,
    /// System test environment, driven by an external test server.
    SystemTest,
}

impl Environment {
    /// Detect current environment from `BOTSTER_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var("BOTSTER_ENV").ok().as_deref())
    }

    /// Map a `BOTSTER_ENV` value to an environment.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("system_test") => Self::SystemTest,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment (unit tests).
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    /// Returns `true` if running in any test mode (test or system_test).
    #[must_use]
    pub fn is_any_test(self) -> bool {
        matches!(self, Self::Test | Self::SystemTest)
    }

    /// Returns `true` if this is the production environment.
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    /// Returns `true` if this is the development environment.
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }

    /// Heartbeat cadence for this environment.
    #[must_use]
    pub fn heartbeat_interval(self) -> Duration {
        if self.is_any_test() {
            constants::TEST_HEARTBEAT_INTERVAL
        } else {
            constants::HEARTBEAT_INTERVAL
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
            Self::SystemTest => write!(f, "system_test"),
        }
    }
}

/// Returns `true` if running in any test mode (unit tests or system tests).
#[must_use]
pub fn is_any_test() -> bool {
    Environment::current().is_any_test()
}
