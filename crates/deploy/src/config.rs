//! Connection settings shared by the cloud adapters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum time to wait for a stack operation to settle.
pub const DEFAULT_STACK_TIMEOUT_SECS: u64 = 30 * 60;

/// Default interval between two stack status checks.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Configuration for the cloud adapters.
///
/// Built once at start-up and handed by reference to the backend constructor; nothing
/// mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// AWS region. Falls back to the SDK's default provider chain.
    pub region: Option<String>,
    /// Named profile from the shared AWS config files.
    pub profile: Option<String>,
    /// Custom endpoint for every service (e.g. a local emulator).
    pub endpoint_url: Option<String>,
    /// Maximum time to wait for a stack to reach a terminal state.
    pub stack_timeout_secs: u64,
    /// Interval between two stack status checks.
    pub poll_interval_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            endpoint_url: None,
            stack_timeout_secs: DEFAULT_STACK_TIMEOUT_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

impl CloudConfig {
    pub fn stack_timeout(&self) -> Duration {
        Duration::from_secs(self.stack_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
