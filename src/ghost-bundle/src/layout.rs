//! Bundle directory layout: a pure function from a bundle root path to the
//! child paths it contains (spec.md §4.3).

use std::path::{Path, PathBuf};

pub const BUNDLE_EXTENSION: &str = "GhostVM";
/// Legacy extension still accepted on read, case-insensitively (spec.md §6).
pub const LEGACY_BUNDLE_EXTENSION: &str = "vm";

/// `true` if `path`'s extension matches the canonical or legacy bundle
/// extension, case-insensitively.
pub fn is_bundle_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ext.eq_ignore_ascii_case(BUNDLE_EXTENSION)
                || ext.eq_ignore_ascii_case(LEGACY_BUNDLE_EXTENSION)
        })
        .unwrap_or(false)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleLayout {
    pub root: PathBuf,
}

impl BundleLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn config(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn disk(&self) -> PathBuf {
        self.root.join("disk.img")
    }

    pub fn hardware_model(&self) -> PathBuf {
        self.root.join("HardwareModel.bin")
    }

    pub fn machine_identifier(&self) -> PathBuf {
        self.root.join("MachineIdentifier.bin")
    }

    pub fn auxiliary_storage(&self) -> PathBuf {
        self.root.join("AuxiliaryStorage.bin")
    }

    pub fn nvram(&self) -> PathBuf {
        self.root.join("NVRAM.bin")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("Snapshots")
    }

    pub fn snapshot(&self, name: &str) -> PathBuf {
        self.snapshots_dir().join(name)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("pid")
    }

    pub fn suspend_file(&self) -> PathBuf {
        self.root.join("suspend.vzvmsave")
    }

    /// Creates the bundle root and its `Snapshots/` directory. Idempotent.
    pub fn ensure_bundle_directory(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.snapshots_dir())
    }
}

/// Sanitizes a snapshot name: alnum, `_`, `-`, `.` only. Rejects the empty
/// result (spec.md §4.5).
pub fn sanitize_snapshot_name(name: &str) -> Option<String> {
    let sanitized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || *c == '.')
        .collect();
    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized)
    }
}

/// Validates a bundle/snapshot display name per spec.md §4.5: not empty,
/// not `.` or `..`, and free of path separators.
pub fn validate_name(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    !name.contains(['/', ':', '\\'])
}
