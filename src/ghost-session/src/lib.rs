//! VM session lifecycle: the state machine driving a single VM's hypervisor
//! session from `initialized` through to `stopped` (spec.md §4.6).

pub mod adapter;
pub mod error;
pub mod in_memory;
pub mod session;

pub use adapter::{AdapterError, HypervisorAdapter, HypervisorEvent, MachineSpec, SharedFolderSpec};
pub use error::{Result, SessionError};
pub use in_memory::InMemoryAdapter;
pub use session::{Session, SessionState};
