//! Error-classified retry windows for SSH connection attempts.

use crate::error::SshError;
use std::time::Duration;
use tokio::time::Instant;

/// How an SSH error is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SshErrorClass {
    /// Host is not listening yet. Also the default for unknown errors.
    ConnectionRefused,
    /// sshd is up but rejects the credentials (often not provisioned yet).
    AuthFailure,
    /// Protocol mismatch; retrying cannot help.
    NoCommonAlgorithms,
}

impl SshErrorClass {
    pub fn of(err: &SshError) -> Self {
        let msg = err.0.as_str();
        if msg.contains("no common algorithms") {
            SshErrorClass::NoCommonAlgorithms
        } else if msg.contains("unable to authenticate") {
            SshErrorClass::AuthFailure
        } else {
            SshErrorClass::ConnectionRefused
        }
    }
}

/// Decides whether a failed connection attempt should be retried.
///
/// Each error class has its own window, started the first time that class
/// is seen. An auth window that opens after refusals starts at the last
/// refusal: that is the latest moment the host was known to be down.
#[derive(Debug, Clone)]
pub struct SshRetryStrategy {
    pub connection_refused_timeout: Duration,
    pub auth_failure_timeout: Duration,
    refused_since: Option<Instant>,
    last_refused: Option<Instant>,
    auth_failing_since: Option<Instant>,
}

impl SshRetryStrategy {
    pub fn new(connection_refused_timeout: Duration, auth_failure_timeout: Duration) -> Self {
        Self {
            connection_refused_timeout,
            auth_failure_timeout,
            refused_since: None,
            last_refused: None,
            auth_failing_since: None,
        }
    }

    pub fn is_retryable(&mut self, err: &SshError) -> bool {
        let now = Instant::now();

        match SshErrorClass::of(err) {
            SshErrorClass::NoCommonAlgorithms => false,
            SshErrorClass::AuthFailure => {
                let since = *self
                    .auth_failing_since
                    .get_or_insert(self.last_refused.unwrap_or(now));
                now < since + self.auth_failure_timeout
            }
            SshErrorClass::ConnectionRefused => {
                let since = *self.refused_since.get_or_insert(now);
                self.last_refused = Some(now);
                now < since + self.connection_refused_timeout
            }
        }
    }
}
