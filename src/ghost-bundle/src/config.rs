//! On-disk VM configuration (spec.md §3, §4.4).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ghost_address::Mac;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

const CURRENT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedFolder {
    pub id: Uuid,
    pub path: PathBuf,
    pub read_only: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortForward {
    pub id: Uuid,
    pub host_port: u16,
    pub guest_port: u16,
    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredConfig {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,

    pub cpus: u32,
    pub memory_bytes: u64,
    pub disk_bytes: u64,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub restore_image_path: Option<PathBuf>,

    pub hardware_model_path: PathBuf,
    pub machine_identifier_path: PathBuf,
    pub auxiliary_storage_path: PathBuf,
    pub disk_path: PathBuf,
    pub efi_variable_store_path: PathBuf,

    /// Legacy single-folder fields, superseded by `shared_folders` but still
    /// round-tripped for bundles created before multi-folder support existed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub shared_folder_path: Option<PathBuf>,
    #[serde(default)]
    pub shared_folder_read_only: bool,

    #[serde(default)]
    pub shared_folders: Vec<SharedFolder>,

    #[serde(default)]
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_install_build: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_install_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_install_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub is_suspended: bool,

    pub mac_address: Mac,

    #[serde(default)]
    pub port_forwards: Vec<PortForward>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub guest_os_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub installer_iso_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub icon_mode: Option<String>,

    /// Cleared on every save; present only for compatibility with bundles
    /// renamed before the legacy-name field was retired from active use.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub legacy_name: Option<String>,
}

impl StoredConfig {
    pub fn new_default(mac_address: Mac, bundle_root: &Path, now: DateTime<Utc>) -> Self {
        Self {
            version: CURRENT_VERSION,
            created_at: now,
            modified_at: now,
            cpus: 2,
            memory_bytes: 2 * 1024 * 1024 * 1024,
            disk_bytes: 20 * 1024 * 1024 * 1024,
            restore_image_path: None,
            hardware_model_path: bundle_root.join("HardwareModel.bin"),
            machine_identifier_path: bundle_root.join("MachineIdentifier.bin"),
            auxiliary_storage_path: bundle_root.join("AuxiliaryStorage.bin"),
            disk_path: bundle_root.join("disk.img"),
            efi_variable_store_path: bundle_root.join("NVRAM.bin"),
            shared_folder_path: None,
            shared_folder_read_only: false,
            shared_folders: Vec::new(),
            installed: false,
            last_install_build: None,
            last_install_version: None,
            last_install_date: None,
            is_suspended: false,
            mac_address,
            port_forwards: Vec::new(),
            guest_os_type: None,
            installer_iso_path: None,
            icon_mode: None,
            legacy_name: None,
        }
    }
}

/// Expands a leading `~` path component to `$HOME`. Leaves `~username`
/// forms (no slash after the `~`) untouched, since there is no portable way
/// to resolve another user's home directory without a dedicated crate.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

/// Rewrites any path recorded under `bundle_root` as a bare filename
/// (relative to the bundle), expands a leading `~`, and rewrites any
/// remaining relative path outside the bundle to an absolute path. Returns
/// `true` if `path` was changed.
fn normalize_path(path: &mut PathBuf, bundle_root: &Path) -> bool {
    let original = path.clone();
    *path = expand_tilde(path);

    if let Ok(relative) = path.strip_prefix(bundle_root) {
        *path = relative.to_path_buf();
    } else if !path.is_absolute() {
        if let Ok(absolute) = bundle_root.join(&path).canonicalize() {
            *path = absolute;
        } else if let Ok(cwd) = std::env::current_dir() {
            *path = cwd.join(&path);
        }
    }

    *path != original
}

/// Loads and normalizes `config.json` from `bundle_root`. Returns the parsed
/// config and a flag indicating whether normalization changed any field
/// relative to what was on disk (the caller should then re-save).
pub fn load(bundle_root: &Path) -> Result<(StoredConfig, bool)> {
    let config_path = bundle_root.join("config.json");
    let text = std::fs::read_to_string(&config_path)
        .map_err(|_| Error::MissingConfig(config_path.clone()))?;
    let mut config: StoredConfig = serde_json::from_str(&text)
        .map_err(|e| Error::InvalidConfig(config_path.clone(), e))?;

    let mut changed = false;
    changed |= normalize_path(&mut config.hardware_model_path, bundle_root);
    changed |= normalize_path(&mut config.machine_identifier_path, bundle_root);
    changed |= normalize_path(&mut config.auxiliary_storage_path, bundle_root);
    changed |= normalize_path(&mut config.disk_path, bundle_root);
    changed |= normalize_path(&mut config.efi_variable_store_path, bundle_root);
    if let Some(path) = config.restore_image_path.as_mut() {
        changed |= normalize_path(path, bundle_root);
    }
    if let Some(path) = config.shared_folder_path.as_mut() {
        changed |= normalize_path(path, bundle_root);
    }
    for folder in &mut config.shared_folders {
        changed |= normalize_path(&mut folder.path, bundle_root);
    }
    if config.legacy_name.take().is_some() {
        changed = true;
    }

    Ok((config, changed))
}

/// Serializes `config` as pretty JSON and writes it atomically to
/// `bundle_root/config.json`.
pub fn save(bundle_root: &Path, config: &StoredConfig) -> Result<()> {
    let config_path = bundle_root.join("config.json");
    let text = serde_json::to_vec_pretty(config)
        .map_err(|e| Error::InvalidConfig(config_path.clone(), e))?;
    crate::lock::write_atomic(&config_path, &text)?;
    Ok(())
}
