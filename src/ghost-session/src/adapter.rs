//! Hypervisor adapter: the abstract surface a session drives. Platform
//! hypervisor bindings implement this trait; [`crate::in_memory::InMemoryAdapter`]
//! provides an in-process double for tests.

use std::path::{Path, PathBuf};

use ghost_address::Mac;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedFolderSpec {
    pub host_path: PathBuf,
    pub guest_tag: String,
    pub read_only: bool,
}

#[derive(Clone, Debug)]
pub struct MachineSpec {
    pub cpus: u32,
    pub memory_bytes: u64,
    pub disk_path: PathBuf,
    pub mac_address: Mac,
    pub shared_folders: Vec<SharedFolderSpec>,
    pub hardware_model_path: PathBuf,
    pub machine_identifier_path: PathBuf,
    pub restore_image_path: Option<PathBuf>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("hypervisor failure: {0}")]
pub struct AdapterError(pub String);

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Unprompted notifications from the hypervisor: something happened to the
/// guest that the coordination domain didn't ask for.
#[derive(Debug, Clone)]
pub enum HypervisorEvent {
    GuestDidStop,
    DidStopWithError(AdapterError),
}

/// The full surface a [`crate::session::Session`] needs from a hypervisor.
/// Every method here is dispatched from the session's own hypervisor queue
/// thread, never directly from the coordination domain.
pub trait HypervisorAdapter: Send + Sync {
    fn is_supported(&self) -> bool;
    fn min_cpus(&self) -> u32;
    fn min_memory_bytes(&self) -> u64;

    fn create_configuration(&self, spec: &MachineSpec) -> Result<(), AdapterError>;

    /// Asserts host support for `spec.restore_image_path`'s hardware model
    /// (if any) and materializes `spec.hardware_model_path` /
    /// `spec.machine_identifier_path` from it. Called once, at bundle init,
    /// before the guest is ever installed.
    fn materialize_hardware_model(&self, spec: &MachineSpec) -> Result<(), AdapterError>;

    /// Drives the hypervisor's installer against `spec.disk_path`,
    /// reporting fractional progress through `progress` as it runs. Blocks
    /// until progress reaches `1.0` or installation fails; a cancelled
    /// install is reported as an `AdapterError`.
    fn install(&self, spec: &MachineSpec, progress: &mut dyn FnMut(f64, &str)) -> Result<(), AdapterError>;

    fn start(&self) -> Result<(), AdapterError>;
    fn request_stop(&self, force: bool) -> Result<(), AdapterError>;
    fn stop(&self) -> Result<(), AdapterError>;
    fn pause(&self) -> Result<(), AdapterError>;
    fn resume(&self) -> Result<(), AdapterError>;
    fn save_state(&self, path: &Path) -> Result<(), AdapterError>;
    fn restore_state(&self, path: &Path) -> Result<(), AdapterError>;
}
