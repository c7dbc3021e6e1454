use std::path::PathBuf;

use ghost_session::adapter::AdapterError;

/// The full error taxonomy surfaced by controller operations. Kept as a
/// sum type (never a bare `String`) so callers and tests can match on
/// kind.
#[derive(Debug, thiserror::Error)]
pub enum VMError {
    #[error("operation not supported by this hypervisor")]
    Unsupported,
    #[error("bundle already exists at {0}")]
    BundleExists(PathBuf),
    #[error("no bundle found at {0}")]
    BundleMissing(PathBuf),
    #[error("bundle at {0} is corrupt: {1}")]
    BundleCorrupt(PathBuf, String),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("invalid path: {0}")]
    InvalidPath(PathBuf),
    #[error("invalid bundle extension: {0}")]
    InvalidExtension(PathBuf),
    #[error("invalid snapshot name: {0}")]
    InvalidSnapshotName(String),
    #[error("invalid value for {field}: expected {expected}")]
    InvalidValue { field: String, expected: String },
    #[error("VM is not installed")]
    NotInstalled,
    #[error("VM is already installed")]
    AlreadyInstalled,
    #[error("VM is running (owner: {owner}, pid: {pid})")]
    Running { owner: String, pid: u32 },
    #[error("VM is not running")]
    NotRunning,
    #[error("VM is already stopping")]
    AlreadyStopping,
    #[error("VM is suspended")]
    Suspended,
    #[error("VM is not suspended")]
    NotSuspended,
    #[error("suspend state file is missing")]
    SuspendStateMissing,
    #[error("copy-on-write clone is not supported here")]
    CowUnsupported,
    #[error(transparent)]
    HypervisorFailure(#[from] AdapterError),
    #[error("lock file is stale")]
    LockStale,
    #[error("guest agent error: {0}")]
    GhostClient(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ghost_bundle::Error> for VMError {
    fn from(e: ghost_bundle::Error) -> Self {
        match e {
            ghost_bundle::Error::BundleExists(p) => VMError::BundleExists(p),
            ghost_bundle::Error::BundleMissing(p) => VMError::BundleMissing(p),
            ghost_bundle::Error::BundleCorrupt(p, cause) => VMError::BundleCorrupt(p, cause),
            ghost_bundle::Error::MissingConfig(p) => VMError::BundleCorrupt(p, "missing config.json".into()),
            ghost_bundle::Error::InvalidConfig(p, cause) => VMError::BundleCorrupt(p, cause.to_string()),
            ghost_bundle::Error::InvalidPath(p) => VMError::InvalidPath(p),
            ghost_bundle::Error::CowUnsupported(_) => VMError::CowUnsupported,
            ghost_bundle::Error::Io(e) => VMError::Io(e),
        }
    }
}

impl From<ghost_session::SessionError> for VMError {
    fn from(e: ghost_session::SessionError) -> Self {
        match e {
            ghost_session::SessionError::InvalidState(_) => VMError::AlreadyStopping,
            ghost_session::SessionError::NotSuspended => VMError::NotSuspended,
            ghost_session::SessionError::Adapter(e) => VMError::HypervisorFailure(e),
            ghost_session::SessionError::Bundle(e) => VMError::from(e),
            ghost_session::SessionError::Io(e) => VMError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, VMError>;
