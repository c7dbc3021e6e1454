//! VM lifecycle operations (spec.md §4.5): the public surface a host-side
//! caller (CLI or embedded app) drives. Every destructive operation checks
//! the PID lock immediately before its first filesystem mutation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use ghost_address::Mac;
use ghost_bundle::config::{PortForward, SharedFolder, StoredConfig};
use ghost_bundle::layout::{self, sanitize_snapshot_name, validate_name, BundleLayout};
use ghost_bundle::lock::{self, LockOwner};
use ghost_session::adapter::{HypervisorAdapter, MachineSpec};
use ghost_session::session::Session;
use rand::RngCore;

use crate::error::{Result, VMError};
use crate::trash::Trash;

const MACOS_MIN_DISK_BYTES: u64 = 20 * 1024 * 1024 * 1024;
const LINUX_MIN_DISK_BYTES: u64 = 10 * 1024 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct InitOptions {
    pub cpus: u32,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    /// `Some("Linux")` marks a Linux bundle; `None` is a macOS bundle.
    pub guest_os_type: Option<String>,
    pub restore_image_path: Option<PathBuf>,
    pub installer_iso_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct UpdateSettings {
    pub cpus: Option<u32>,
    pub memory_bytes: Option<u64>,
    pub shared_folders: Option<Vec<SharedFolder>>,
    pub port_forwards: Option<Vec<PortForward>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Suspended,
    Running { owner: LockOwnerKind, pid: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockOwnerKind {
    Cli,
    Embedded,
}

#[derive(Clone, Debug)]
pub struct StatusReport {
    pub state: RunState,
    pub disk_bytes: u64,
    pub memory_bytes: u64,
    pub cpus: u32,
}

pub struct Controller {
    adapter_factory: Arc<dyn Fn() -> Arc<dyn HypervisorAdapter> + Send + Sync>,
    trash: Arc<dyn Trash>,
    min_cpus: u32,
    min_memory_bytes: u64,
}

impl Controller {
    pub fn new(
        adapter_factory: Arc<dyn Fn() -> Arc<dyn HypervisorAdapter> + Send + Sync>,
        trash: Arc<dyn Trash>,
    ) -> Self {
        let probe = adapter_factory();
        let min_cpus = probe.min_cpus().max(2);
        let min_memory_bytes = probe.min_memory_bytes();
        Self {
            adapter_factory,
            trash,
            min_cpus,
            min_memory_bytes,
        }
    }

    fn validate_minima(&self, cpus: u32, memory_bytes: u64, disk_bytes: u64, is_linux: bool) -> Result<()> {
        if cpus < self.min_cpus {
            return Err(VMError::InvalidValue {
                field: "cpus".into(),
                expected: format!(">= {}", self.min_cpus),
            });
        }
        if memory_bytes < self.min_memory_bytes {
            return Err(VMError::InvalidValue {
                field: "memoryBytes".into(),
                expected: format!(">= {}", self.min_memory_bytes),
            });
        }
        let min_disk = if is_linux { LINUX_MIN_DISK_BYTES } else { MACOS_MIN_DISK_BYTES };
        if disk_bytes < min_disk {
            return Err(VMError::InvalidValue {
                field: "diskBytes".into(),
                expected: format!(">= {min_disk}"),
            });
        }
        Ok(())
    }

    fn lock_owner_state(&self, bundle: &Path) -> Option<(LockOwnerKind, u32)> {
        let layout = BundleLayout::new(bundle);
        lock::read_lock(&layout.pid_file()).map(|owner| match owner {
            LockOwner::Cli(pid) => (LockOwnerKind::Cli, pid),
            LockOwner::Embedded(pid) => (LockOwnerKind::Embedded, pid),
        })
    }

    /// Refuses if the bundle currently has a live owner (spec.md §4.3: a
    /// lock check immediately before the first mutation).
    fn ensure_not_locked(&self, bundle: &Path) -> Result<()> {
        if let Some((kind, pid)) = self.lock_owner_state(bundle) {
            let owner = match kind {
                LockOwnerKind::Cli => "cli",
                LockOwnerKind::Embedded => "embedded",
            };
            return Err(VMError::Running {
                owner: owner.to_string(),
                pid,
            });
        }
        Ok(())
    }

    pub fn init(&self, bundle: &Path, options: InitOptions) -> Result<StoredConfig> {
        if !layout::is_bundle_path(bundle) {
            return Err(VMError::InvalidExtension(bundle.to_path_buf()));
        }
        if bundle.exists() {
            return Err(VMError::BundleExists(bundle.to_path_buf()));
        }
        let is_linux = options.guest_os_type.as_deref() == Some("Linux");
        self.validate_minima(options.cpus, options.memory_bytes, options.disk_bytes, is_linux)?;

        let bundle_layout = BundleLayout::new(bundle);
        bundle_layout.ensure_bundle_directory()?;

        std::fs::File::create(bundle_layout.disk())?.set_len(options.disk_bytes)?;
        std::fs::write(bundle_layout.auxiliary_storage(), [])?;
        if is_linux {
            std::fs::write(bundle_layout.nvram(), [])?;
            // Linux guests validate the optional installer ISO but have no
            // hardware-model concept and no separate install step.
            if let Some(iso) = &options.installer_iso_path {
                if !iso.exists() {
                    return Err(VMError::InvalidPath(iso.clone()));
                }
            }
            std::fs::write(bundle_layout.hardware_model(), [])?;
            std::fs::write(bundle_layout.machine_identifier(), [])?;
        } else {
            // macOS guests materialize HardwareModel/MachineIdentifier from
            // the restore image up front, asserting host support before
            // anything else touches the bundle; AuxiliaryStorage.bin is
            // filled in by the adapter's install pass.
            let spec = MachineSpec {
                cpus: options.cpus,
                memory_bytes: options.memory_bytes,
                disk_path: bundle_layout.disk(),
                mac_address: Mac::random_locally_administered(),
                shared_folders: Vec::new(),
                hardware_model_path: bundle_layout.hardware_model(),
                machine_identifier_path: bundle_layout.machine_identifier(),
                restore_image_path: options.restore_image_path.clone(),
            };
            let adapter = (self.adapter_factory)();
            adapter.materialize_hardware_model(&spec)?;
        }

        let now = Utc::now();
        let mut config = StoredConfig::new_default(Mac::random_locally_administered(), bundle, now);
        config.cpus = options.cpus;
        config.memory_bytes = options.memory_bytes;
        config.disk_bytes = options.disk_bytes;
        config.guest_os_type = options.guest_os_type;
        config.restore_image_path = options.restore_image_path;
        config.installer_iso_path = options.installer_iso_path;
        // Linux guests have no separate install step; macOS guests install
        // the restore image afterward via `install`.
        config.installed = is_linux;

        ghost_bundle::config::save(bundle, &config)?;
        Ok(config)
    }

    /// Lists bundles directly inside `dir`, sorted by locale-insensitive
    /// lowercased name then path. A bundle that fails to load is logged
    /// and skipped rather than aborting the whole listing.
    pub fn list(&self, dir: &Path) -> Result<Vec<(PathBuf, StoredConfig)>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !layout::is_bundle_path(&path) {
                continue;
            }
            match ghost_bundle::config::load(&path) {
                Ok((config, _changed)) => entries.push((path, config)),
                Err(e) => {
                    tracing::warn!(?path, error = %e, "skipping unloadable bundle");
                }
            }
        }
        entries.sort_by(|(path_a, _), (path_b, _)| {
            let name_a = path_a.file_stem().map(|s| s.to_string_lossy().to_lowercase()).unwrap_or_default();
            let name_b = path_b.file_stem().map(|s| s.to_string_lossy().to_lowercase()).unwrap_or_default();
            name_a.cmp(&name_b).then_with(|| path_a.cmp(path_b))
        });
        Ok(entries)
    }

    pub fn update_settings(&self, bundle: &Path, settings: UpdateSettings) -> Result<StoredConfig> {
        self.ensure_not_locked(bundle)?;
        let (mut config, _) = ghost_bundle::config::load(bundle)?;

        let cpus = settings.cpus.unwrap_or(config.cpus);
        let memory_bytes = settings.memory_bytes.unwrap_or(config.memory_bytes);
        let is_linux = config.guest_os_type.as_deref() == Some("Linux");
        self.validate_minima(cpus, memory_bytes, config.disk_bytes, is_linux)?;

        if let Some(folders) = &settings.shared_folders {
            for folder in folders {
                if folder.path.as_os_str().is_empty() {
                    return Err(VMError::InvalidPath(folder.path.clone()));
                }
            }
        }
        if let Some(forwards) = &settings.port_forwards {
            let mut seen_ports = std::collections::HashSet::new();
            for forward in forwards {
                if !seen_ports.insert(forward.host_port) {
                    return Err(VMError::InvalidValue {
                        field: "portForwards.hostPort".into(),
                        expected: "pairwise distinct".into(),
                    });
                }
            }
        }

        config.cpus = cpus;
        config.memory_bytes = memory_bytes;
        if let Some(folders) = settings.shared_folders {
            config.shared_folder_path = None;
            config.shared_folder_read_only = false;
            config.shared_folders = folders;
        }
        if let Some(forwards) = settings.port_forwards {
            config.port_forwards = forwards;
        }

        ghost_bundle::config::save(bundle, &config)?;
        Ok(config)
    }

    pub fn install(&self, bundle: &Path, build: &str, version: &str) -> Result<StoredConfig> {
        self.install_with_progress(bundle, build, version, |_, _| {})
    }

    pub fn install_with_progress(
        &self,
        bundle: &Path,
        build: &str,
        version: &str,
        mut progress: impl FnMut(f64, &str),
    ) -> Result<StoredConfig> {
        self.ensure_not_locked(bundle)?;
        let (mut config, _) = ghost_bundle::config::load(bundle)?;
        if config.installed {
            return Err(VMError::AlreadyInstalled);
        }
        if config.restore_image_path.is_none() {
            return Err(VMError::InvalidValue {
                field: "restoreImagePath".into(),
                expected: "a restore image to install from".into(),
            });
        }

        let adapter = (self.adapter_factory)();
        let spec = self.machine_spec(bundle, &config);
        adapter.install(&spec, &mut progress)?;

        config.installed = true;
        config.last_install_build = Some(build.to_string());
        config.last_install_version = Some(version.to_string());
        config.last_install_date = Some(Utc::now());
        ghost_bundle::config::save(bundle, &config)?;
        Ok(config)
    }

    pub fn clone_bundle(&self, src: &Path, dst: &Path) -> Result<StoredConfig> {
        let new_name = dst
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| VMError::InvalidName(dst.display().to_string()))?;
        if !validate_name(new_name) {
            return Err(VMError::InvalidName(new_name.to_string()));
        }
        if dst.exists() {
            return Err(VMError::BundleExists(dst.to_path_buf()));
        }
        self.ensure_not_locked(src)?;

        let (src_config, _) = ghost_bundle::config::load(src)?;
        if !src_config.installed {
            return Err(VMError::NotInstalled);
        }

        let src_layout = BundleLayout::new(src);
        let dst_layout = BundleLayout::new(dst);

        let clone_files = || -> Result<()> {
            dst_layout.ensure_bundle_directory()?;
            ghost_bundle::cow::clone_file(&src_layout.disk(), &dst_layout.disk())?;
            ghost_bundle::cow::clone_file(&src_layout.auxiliary_storage(), &dst_layout.auxiliary_storage())?;
            ghost_bundle::cow::clone_file(&src_layout.hardware_model(), &dst_layout.hardware_model())?;
            Ok(())
        };

        if let Err(e) = clone_files() {
            let _ = std::fs::remove_dir_all(dst);
            return Err(e);
        }

        let mut identifier = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut identifier);
        std::fs::write(dst_layout.machine_identifier(), identifier)?;

        let now = Utc::now();
        let mut config = src_config;
        config.created_at = now;
        config.modified_at = now;
        config.mac_address = Mac::random_locally_administered();
        config.is_suspended = false;
        config.port_forwards = Vec::new();
        config.shared_folders = Vec::new();
        config.installed = true;

        if let Err(e) = ghost_bundle::config::save(dst, &config) {
            let _ = std::fs::remove_dir_all(dst);
            return Err(e.into());
        }
        Ok(config)
    }

    pub fn rename(&self, bundle: &Path, new_name: &str) -> Result<PathBuf> {
        self.ensure_not_locked(bundle)?;
        if !validate_name(new_name) {
            return Err(VMError::InvalidName(new_name.to_string()));
        }
        let extension = bundle
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(layout::BUNDLE_EXTENSION);
        let dest = bundle
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{new_name}.{extension}"));
        if dest.exists() {
            return Err(VMError::BundleExists(dest));
        }
        std::fs::rename(bundle, &dest)?;
        Ok(dest)
    }

    pub fn move_to_trash(&self, bundle: &Path) -> Result<()> {
        self.ensure_not_locked(bundle)?;
        self.trash.move_to_trash(bundle)?;
        Ok(())
    }

    pub fn snapshot_create(&self, bundle: &Path, name: &str) -> Result<PathBuf> {
        self.ensure_not_locked(bundle)?;
        let sanitized = sanitize_snapshot_name(name).ok_or_else(|| VMError::InvalidSnapshotName(name.to_string()))?;
        let bundle_layout = BundleLayout::new(bundle);
        let snapshot_dir = bundle_layout.snapshot(&sanitized);
        if snapshot_dir.exists() {
            return Err(VMError::BundleExists(snapshot_dir));
        }
        std::fs::create_dir_all(&snapshot_dir)?;
        for (src, name) in [
            (bundle_layout.config(), "config.json"),
            (bundle_layout.disk(), "disk.img"),
            (bundle_layout.hardware_model(), "HardwareModel.bin"),
            (bundle_layout.machine_identifier(), "MachineIdentifier.bin"),
            (bundle_layout.auxiliary_storage(), "AuxiliaryStorage.bin"),
        ] {
            if src.exists() {
                std::fs::copy(&src, snapshot_dir.join(name))?;
            }
        }
        Ok(snapshot_dir)
    }

    /// Lists snapshot names, ASCII-sorted (spec.md §4.5: "listing is
    /// ASCII-sorted", distinct from `list`'s locale-insensitive order).
    pub fn snapshot_list(&self, bundle: &Path) -> Result<Vec<String>> {
        let snapshots_dir = BundleLayout::new(bundle).snapshots_dir();
        if !snapshots_dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&snapshots_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn snapshot_revert(&self, bundle: &Path, name: &str) -> Result<StoredConfig> {
        self.ensure_not_locked(bundle)?;
        let sanitized = sanitize_snapshot_name(name).ok_or_else(|| VMError::InvalidSnapshotName(name.to_string()))?;
        let bundle_layout = BundleLayout::new(bundle);
        let snapshot_dir = bundle_layout.snapshot(&sanitized);
        if !snapshot_dir.is_dir() {
            return Err(VMError::BundleMissing(snapshot_dir));
        }

        let backup_dir = bundle_layout.root.join(format!(".revert-backup-{}", std::process::id()));
        std::fs::create_dir_all(&backup_dir)?;

        let revert = || -> Result<()> {
            for (dest, name) in [
                (bundle_layout.config(), "config.json"),
                (bundle_layout.disk(), "disk.img"),
                (bundle_layout.hardware_model(), "HardwareModel.bin"),
                (bundle_layout.machine_identifier(), "MachineIdentifier.bin"),
                (bundle_layout.auxiliary_storage(), "AuxiliaryStorage.bin"),
            ] {
                let snapshot_file = snapshot_dir.join(name);
                if !snapshot_file.exists() {
                    continue;
                }
                if dest.exists() {
                    std::fs::rename(&dest, backup_dir.join(name))?;
                }
                std::fs::copy(&snapshot_file, &dest)?;
            }
            Ok(())
        };

        if let Err(e) = revert() {
            // best-effort restoration of whatever was backed up.
            for entry in std::fs::read_dir(&backup_dir).into_iter().flatten().flatten() {
                let _ = std::fs::rename(entry.path(), bundle_layout.root.join(entry.file_name()));
            }
            let _ = std::fs::remove_dir_all(&backup_dir);
            return Err(e);
        }

        let suspend_file = bundle_layout.suspend_file();
        if suspend_file.exists() {
            std::fs::remove_file(&suspend_file)?;
        }
        let (mut config, _) = ghost_bundle::config::load(bundle)?;
        config.is_suspended = false;
        ghost_bundle::config::save(bundle, &config)?;

        std::fs::remove_dir_all(&backup_dir)?;
        Ok(config)
    }

    pub fn snapshot_delete(&self, bundle: &Path, name: &str) -> Result<()> {
        self.ensure_not_locked(bundle)?;
        let sanitized = sanitize_snapshot_name(name).ok_or_else(|| VMError::InvalidSnapshotName(name.to_string()))?;
        let snapshot_dir = BundleLayout::new(bundle).snapshot(&sanitized);
        if !snapshot_dir.is_dir() {
            return Err(VMError::BundleMissing(snapshot_dir));
        }
        std::fs::remove_dir_all(&snapshot_dir)?;
        Ok(())
    }

    pub fn status(&self, bundle: &Path) -> Result<StatusReport> {
        let (config, _) = ghost_bundle::config::load(bundle)?;
        let state = match self.lock_owner_state(bundle) {
            Some((kind, pid)) => RunState::Running { owner: kind, pid },
            None if config.is_suspended => RunState::Suspended,
            None => RunState::Stopped,
        };
        Ok(StatusReport {
            state,
            disk_bytes: config.disk_bytes,
            memory_bytes: config.memory_bytes,
            cpus: config.cpus,
        })
    }

    pub fn discard_suspend(&self, bundle: &Path) -> Result<StoredConfig> {
        self.ensure_not_locked(bundle)?;
        let bundle_layout = BundleLayout::new(bundle);
        let suspend_file = bundle_layout.suspend_file();
        if suspend_file.exists() {
            std::fs::remove_file(&suspend_file)?;
        }
        let (mut config, _) = ghost_bundle::config::load(bundle)?;
        config.is_suspended = false;
        ghost_bundle::config::save(bundle, &config)?;
        Ok(config)
    }

    /// Clears an attached installer ISO (Linux guests only); a no-op on
    /// bundles that never had one attached.
    pub fn detach_iso(&self, bundle: &Path) -> Result<StoredConfig> {
        self.ensure_not_locked(bundle)?;
        let (mut config, _) = ghost_bundle::config::load(bundle)?;
        config.installer_iso_path = None;
        ghost_bundle::config::save(bundle, &config)?;
        Ok(config)
    }

    /// Acquires the lock as `embedded`, migrates a missing MAC address, and
    /// constructs a [`Session`] wired to a fresh adapter instance.
    pub fn make_session(&self, bundle: &Path) -> Result<Session> {
        self.ensure_not_locked(bundle)?;
        // `config.json` always carries a MAC generated at `init`, so unlike
        // the source there is no first-start migration to perform here;
        // `changed` still reflects config.rs's own path normalization.
        let (config, changed) = ghost_bundle::config::load(bundle)?;

        let bundle_layout = BundleLayout::new(bundle);
        let bundle_for_commit = bundle.to_path_buf();
        let on_suspended_changed: Box<dyn Fn(bool) -> std::io::Result<()> + Send + Sync> =
            Box::new(move |is_suspended| {
                let (mut config, _) = ghost_bundle::config::load(&bundle_for_commit)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
                config.is_suspended = is_suspended;
                ghost_bundle::config::save(&bundle_for_commit, &config)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
                Ok(())
            });

        let adapter = (self.adapter_factory)();
        let session = Session::new(
            adapter,
            bundle_layout.pid_file(),
            bundle_layout.suspend_file(),
            LockOwner::Embedded(std::process::id()),
            on_suspended_changed,
        );

        if changed {
            ghost_bundle::config::save(bundle, &config)?;
        }
        Ok(session)
    }

    pub fn machine_spec(&self, bundle: &Path, config: &StoredConfig) -> MachineSpec {
        let bundle_layout = BundleLayout::new(bundle);
        MachineSpec {
            cpus: config.cpus,
            memory_bytes: config.memory_bytes,
            disk_path: bundle_layout.disk(),
            mac_address: config.mac_address,
            shared_folders: config
                .shared_folders
                .iter()
                .map(|f| ghost_session::adapter::SharedFolderSpec {
                    host_path: f.path.clone(),
                    guest_tag: f.id.to_string(),
                    read_only: f.read_only,
                })
                .collect(),
            hardware_model_path: bundle_layout.hardware_model(),
            machine_identifier_path: bundle_layout.machine_identifier(),
            restore_image_path: config.restore_image_path.clone(),
        }
    }
}
