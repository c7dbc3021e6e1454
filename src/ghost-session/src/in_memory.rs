//! An entirely in-process [`HypervisorAdapter`], driving the full session
//! property suite without a real hypervisor (spec.md §9: "provide an
//! in-memory test adapter for the full property suite").

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::adapter::{AdapterError, HypervisorAdapter, MachineSpec};

#[derive(Default)]
struct State {
    configured: bool,
    paused: bool,
}

pub struct InMemoryAdapter {
    min_cpus: u32,
    min_memory_bytes: u64,
    state: Mutex<State>,
    fail_next_start: AtomicBool,
    fail_next_save_state: AtomicBool,
    fail_next_stop: AtomicBool,
    fail_next_install: AtomicBool,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::with_minima(2, 1024 * 1024 * 1024)
    }

    pub fn with_minima(min_cpus: u32, min_memory_bytes: u64) -> Self {
        Self {
            min_cpus,
            min_memory_bytes,
            state: Mutex::new(State::default()),
            fail_next_start: AtomicBool::new(false),
            fail_next_save_state: AtomicBool::new(false),
            fail_next_stop: AtomicBool::new(false),
            fail_next_install: AtomicBool::new(false),
        }
    }

    pub fn set_fail_next_start(&self, fail: bool) {
        self.fail_next_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_next_save_state(&self, fail: bool) {
        self.fail_next_save_state.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_next_stop(&self, fail: bool) {
        self.fail_next_stop.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_next_install(&self, fail: bool) {
        self.fail_next_install.store(fail, Ordering::SeqCst);
    }
}

impl Default for InMemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl HypervisorAdapter for InMemoryAdapter {
    fn is_supported(&self) -> bool {
        true
    }

    fn min_cpus(&self) -> u32 {
        self.min_cpus
    }

    fn min_memory_bytes(&self) -> u64 {
        self.min_memory_bytes
    }

    fn create_configuration(&self, _spec: &MachineSpec) -> Result<(), AdapterError> {
        self.state.lock().configured = true;
        Ok(())
    }

    fn materialize_hardware_model(&self, spec: &MachineSpec) -> Result<(), AdapterError> {
        if let Some(restore_image) = &spec.restore_image_path {
            if !restore_image.exists() {
                return Err(AdapterError::new(format!(
                    "restore image {} does not exist",
                    restore_image.display()
                )));
            }
        }
        std::fs::write(&spec.hardware_model_path, b"in-memory-hardware-model")
            .map_err(|e| AdapterError::new(e.to_string()))?;
        std::fs::write(&spec.machine_identifier_path, b"in-memory-machine-identifier")
            .map_err(|e| AdapterError::new(e.to_string()))?;
        Ok(())
    }

    fn install(&self, spec: &MachineSpec, progress: &mut dyn FnMut(f64, &str)) -> Result<(), AdapterError> {
        progress(0.0, "starting install");

        if self.fail_next_install.swap(false, Ordering::SeqCst) {
            return Err(AdapterError::new("simulated install failure"));
        }

        std::fs::write(&spec.disk_path, b"in-memory-installed-disk-image")
            .map_err(|e| AdapterError::new(e.to_string()))?;
        progress(0.5, "installer running");

        progress(1.0, "install complete");
        Ok(())
    }

    fn start(&self) -> Result<(), AdapterError> {
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(AdapterError::new("simulated start failure"));
        }
        if !self.state.lock().configured {
            return Err(AdapterError::new("start requested before configuration"));
        }
        Ok(())
    }

    fn request_stop(&self, _force: bool) -> Result<(), AdapterError> {
        if self.fail_next_stop.swap(false, Ordering::SeqCst) {
            return Err(AdapterError::new("simulated stop failure"));
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    fn pause(&self) -> Result<(), AdapterError> {
        self.state.lock().paused = true;
        Ok(())
    }

    fn resume(&self) -> Result<(), AdapterError> {
        self.state.lock().paused = false;
        Ok(())
    }

    fn save_state(&self, path: &Path) -> Result<(), AdapterError> {
        if self.fail_next_save_state.swap(false, Ordering::SeqCst) {
            return Err(AdapterError::new("simulated save-state failure"));
        }
        std::fs::write(path, b"in-memory-suspend-state")
            .map_err(|e| AdapterError::new(e.to_string()))
    }

    fn restore_state(&self, path: &Path) -> Result<(), AdapterError> {
        if !path.exists() {
            return Err(AdapterError::new("no suspend state to restore"));
        }
        Ok(())
    }
}
