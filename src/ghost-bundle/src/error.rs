use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bundle already exists at {0}")]
    BundleExists(PathBuf),
    #[error("no bundle found at {0}")]
    BundleMissing(PathBuf),
    #[error("bundle at {0} is corrupt: {1}")]
    BundleCorrupt(PathBuf, String),
    #[error("config.json missing at {0}")]
    MissingConfig(PathBuf),
    #[error("config.json at {0} is invalid: {1}")]
    InvalidConfig(PathBuf, #[source] serde_json::Error),
    #[error("path {0} is not a valid shared folder path")]
    InvalidPath(PathBuf),
    #[error("copy-on-write clone is not supported for {0}")]
    CowUnsupported(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
