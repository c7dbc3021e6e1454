use crate::adapter::AdapterError;
use crate::session::SessionState;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("operation not valid in state {0:?}")]
    InvalidState(SessionState),
    #[error("VM is not suspended")]
    NotSuspended,
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Bundle(#[from] ghost_bundle::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
