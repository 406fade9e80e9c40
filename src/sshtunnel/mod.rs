//! SSH tunnel to a private management network.
//!
//! While a freshly created VM bootstraps, its agent may need to reach a
//! registry that only listens on the deploying machine. The tunnel opens an
//! SSH session to the VM and forwards a remote port back to the local one.
//!
//! The SSH protocol itself is behind [`SshConnector`]; this module owns the
//! retry policy and the lifetime of the forwarding task.

mod retry;

pub use retry::{SshErrorClass, SshRetryStrategy};

use crate::config::DeployerConfig;
use crate::error::{DeployError, SshError};
use crate::types::{RegistryConfig, SshTunnelConfig};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Everything needed to open one tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshTunnelOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Path to a private key file.
    pub private_key: String,
    pub local_forward_port: u16,
    pub remote_forward_port: u16,
}

impl SshTunnelOptions {
    /// Forward the registry port on the VM back to the local registry.
    pub fn for_registry(tunnel: &SshTunnelConfig, registry: &RegistryConfig) -> Self {
        Self {
            host: tunnel.host.clone(),
            port: tunnel.port,
            user: tunnel.user.clone(),
            password: tunnel.password.clone(),
            private_key: tunnel.private_key.clone(),
            local_forward_port: registry.port,
            remote_forward_port: registry.port,
        }
    }
}

/// Opens SSH sessions. Implemented by the transport.
#[async_trait]
pub trait SshConnector: Send + Sync {
    async fn connect(&self, options: &SshTunnelOptions) -> Result<Box<dyn SshSession>, SshError>;
}

/// An established SSH session able to forward one remote port.
#[async_trait]
pub trait SshSession: Send {
    /// Serve `remote_port -> local_port` until `shutdown` flips to true.
    async fn forward(
        &mut self,
        remote_port: u16,
        local_port: u16,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), SshError>;
}

/// A tunnel that can be started once and stopped any number of times.
pub struct SshTunnel {
    options: SshTunnelOptions,
    connector: Arc<dyn SshConnector>,
    strategy: SshRetryStrategy,
    retry_delay: Duration,
    running: Option<(watch::Sender<bool>, JoinHandle<Result<(), SshError>>)>,
}

impl SshTunnel {
    pub fn options(&self) -> &SshTunnelOptions {
        &self.options
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Connect (retrying per [`SshRetryStrategy`]) and start forwarding.
    ///
    /// Returns once the session is established and the forward task is
    /// running.
    pub async fn start(&mut self) -> Result<(), DeployError> {
        if self.running.is_some() {
            return Err(DeployError::InvalidState("SSH tunnel already started".into()));
        }

        let session = loop {
            match self.connector.connect(&self.options).await {
                Ok(session) => break session,
                Err(err) if self.strategy.is_retryable(&err) => {
                    tracing::warn!(host = %self.options.host, error = %err, "SSH connection failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => {
                    return Err(DeployError::from(err).context(format!(
                        "Starting SSH tunnel to '{}:{}'",
                        self.options.host, self.options.port
                    )));
                }
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let remote = self.options.remote_forward_port;
        let local = self.options.local_forward_port;
        let host = self.options.host.clone();
        let mut session = session;
        let handle = tokio::spawn(async move {
            let result = session.forward(remote, local, shutdown_rx).await;
            if let Err(err) = &result {
                tracing::warn!(host = %host, error = %err, "SSH port forward ended with error");
            }
            result
        });

        tracing::info!(
            host = %self.options.host,
            remote_port = remote,
            local_port = local,
            "SSH tunnel started"
        );
        self.running = Some((shutdown_tx, handle));
        Ok(())
    }

    /// Signal the forward task to finish and wait for it. Idempotent.
    pub async fn stop(&mut self) -> Result<(), DeployError> {
        let Some((shutdown_tx, handle)) = self.running.take() else {
            return Ok(());
        };

        // receiver may already be gone if the forward failed on its own
        let _ = shutdown_tx.send(true);

        match handle.await {
            Ok(Ok(())) => {
                tracing::info!(host = %self.options.host, "SSH tunnel stopped");
                Ok(())
            }
            Ok(Err(err)) => Err(DeployError::from(err).context("Stopping SSH tunnel")),
            Err(join_err) => Err(DeployError::Ssh(SshError(format!(
                "forward task panicked: {}",
                join_err
            )))
            .context("Stopping SSH tunnel")),
        }
    }
}

/// Builds tunnels sharing one connector and the configured retry windows.
#[derive(Clone)]
pub struct SshTunnelFactory {
    connector: Arc<dyn SshConnector>,
    connection_refused_timeout: Duration,
    auth_failure_timeout: Duration,
    retry_delay: Duration,
}

impl SshTunnelFactory {
    pub fn new(connector: Arc<dyn SshConnector>, config: &DeployerConfig) -> Self {
        Self {
            connector,
            connection_refused_timeout: config.ssh_connection_refused_timeout,
            auth_failure_timeout: config.ssh_auth_failure_timeout,
            retry_delay: config.ssh_retry_delay,
        }
    }

    pub fn new_tunnel(&self, options: SshTunnelOptions) -> SshTunnel {
        SshTunnel {
            options,
            connector: self.connector.clone(),
            strategy: SshRetryStrategy::new(
                self.connection_refused_timeout,
                self.auth_failure_timeout,
            ),
            retry_delay: self.retry_delay,
            running: None,
        }
    }
}
