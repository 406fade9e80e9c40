//! Error types for the deployment engine.
//!
//! No `anyhow` leakage. Explicit, typed errors. Cloud failures keep their
//! [`CloudErrorKind`] so callers can tell "already gone" apart from a real
//! infrastructure failure.

use std::fmt;

/// Classification of a Cloud Provider Interface failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudErrorKind {
    VmNotFound,
    DiskNotFound,
    StemcellNotFound,
    NotImplemented,
    Other,
}

impl fmt::Display for CloudErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloudErrorKind::VmNotFound => "Bosh::Clouds::VMNotFound",
            CloudErrorKind::DiskNotFound => "Bosh::Clouds::DiskNotFound",
            CloudErrorKind::StemcellNotFound => "Bosh::Clouds::StemcellNotFound",
            CloudErrorKind::NotImplemented => "Bosh::Clouds::NotImplemented",
            CloudErrorKind::Other => "Bosh::Clouds::CloudError",
        };
        f.write_str(name)
    }
}

/// An error returned by a CPI call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("CPI '{method}' method responded with error: {kind}: {message}")]
pub struct CloudError {
    pub method: String,
    pub kind: CloudErrorKind,
    pub message: String,
}

impl CloudError {
    pub fn new(method: impl Into<String>, kind: CloudErrorKind, message: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            kind,
            message: message.into(),
        }
    }

    /// Whether the resource this call targeted is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind,
            CloudErrorKind::VmNotFound
                | CloudErrorKind::DiskNotFound
                | CloudErrorKind::StemcellNotFound
        )
    }
}

/// Errors raised while opening an SSH tunnel.
///
/// The transport reports its failure text; classification for retries is
/// done by [`crate::sshtunnel::SshRetryStrategy`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ssh: {0}")]
pub struct SshError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("agent request failed: {0}")]
    Agent(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid deployment state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<DeployError>,
    },
}

impl DeployError {
    /// Wrap this error with the operation (and identifiers) that failed.
    pub fn context(self, context: impl Into<String>) -> Self {
        DeployError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through context wrappers.
    pub fn root(&self) -> &DeployError {
        match self {
            DeployError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// The cloud error kind if this error originated at the CPI.
    pub fn cloud_kind(&self) -> Option<CloudErrorKind> {
        match self.root() {
            DeployError::Cloud(err) => Some(err.kind),
            _ => None,
        }
    }

    /// Whether this error might be recoverable by re-running the command.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.root(),
            DeployError::Agent(_) | DeployError::Ssh(_) | DeployError::Timeout(_)
        )
    }
}

/// Attach context to the error side of a result.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, DeployError>;

    fn with_context<F, S>(self, f: F) -> Result<T, DeployError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<DeployError>> ResultExt<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T, DeployError> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T, DeployError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
