//! Bundle directory layout, the PID lock protocol, on-disk configuration,
//! and copy-on-write cloning for a single VM bundle.

pub mod config;
pub mod cow;
pub mod error;
pub mod layout;
pub mod lock;
pub mod router_config;

pub use config::{PortForward, SharedFolder, StoredConfig};
pub use error::{Error, Result};
pub use layout::{BundleLayout, BUNDLE_EXTENSION, LEGACY_BUNDLE_EXTENSION};
pub use lock::LockOwner;
pub use router_config::StoredRouterConfig;
