//! VM bundle lifecycle: init, install, clone, rename, snapshot, status, and
//! session creation, on top of `ghost-bundle` and `ghost-session`.

pub mod controller;
pub mod error;
pub mod trash;

pub use controller::{Controller, InitOptions, LockOwnerKind, RunState, StatusReport, UpdateSettings};
pub use error::{Result, VMError};
pub use trash::{FilesystemTrash, Trash};
