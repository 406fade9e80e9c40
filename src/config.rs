//! Engine configuration: agent polling and SSH retry windows.

use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Deployer configuration.
///
/// All durations deserialize from milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    /// How long to ping the agent before giving up during teardown.
    #[serde(deserialize_with = "millis")]
    pub ping_timeout: Duration,
    /// Delay between teardown pings.
    #[serde(deserialize_with = "millis")]
    pub ping_delay: Duration,
    /// How long a freshly created VM has to answer a ping.
    #[serde(deserialize_with = "millis")]
    pub agent_ready_timeout: Duration,
    /// Delay between readiness pings.
    #[serde(deserialize_with = "millis")]
    pub agent_ready_delay: Duration,
    /// Delay between "is it running yet" polls after applying jobs.
    #[serde(deserialize_with = "millis")]
    pub running_poll_delay: Duration,
    /// Retry window for "connection refused" and unclassified SSH errors.
    #[serde(deserialize_with = "millis")]
    pub ssh_connection_refused_timeout: Duration,
    /// Retry window for "unable to authenticate" SSH errors.
    #[serde(deserialize_with = "millis")]
    pub ssh_auth_failure_timeout: Duration,
    /// Delay between SSH connection attempts.
    #[serde(deserialize_with = "millis")]
    pub ssh_retry_delay: Duration,
    /// Skip the drain step when tearing down the previous instance.
    pub skip_drain: bool,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_secs(10),
            ping_delay: Duration::from_millis(500),
            agent_ready_timeout: Duration::from_secs(10 * 60),
            agent_ready_delay: Duration::from_millis(500),
            running_poll_delay: Duration::from_secs(1),
            ssh_connection_refused_timeout: Duration::from_secs(10 * 60),
            ssh_auth_failure_timeout: Duration::from_secs(5 * 60),
            ssh_retry_delay: Duration::from_secs(1),
            skip_drain: false,
        }
    }
}

fn millis<'de, D: Deserializer<'de>>(val: D) -> Result<Duration, D::Error> {
    let ms: u64 = Deserialize::deserialize(val)?;
    Ok(Duration::from_millis(ms))
}
