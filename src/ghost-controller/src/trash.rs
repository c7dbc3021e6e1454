//! Trash is a platform adapter boundary like the hypervisor and COW clone
//! (spec.md §9). [`FilesystemTrash`] is the only implementation shipped
//! here: it moves a bundle into a sibling `.ghostvm-trash` directory rather
//! than calling into a desktop shell's actual trash can, which has no
//! cross-platform equivalent in this crate's dependency stack.

use std::path::Path;

pub trait Trash: Send + Sync {
    fn move_to_trash(&self, path: &Path) -> std::io::Result<()>;
}

pub struct FilesystemTrash;

impl Trash for FilesystemTrash {
    fn move_to_trash(&self, path: &Path) -> std::io::Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let trash_dir = parent.join(".ghostvm-trash");
        std::fs::create_dir_all(&trash_dir)?;
        let name = path
            .file_name()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"))?;
        let mut dest = trash_dir.join(name);
        let mut attempt = 1u32;
        while dest.exists() {
            dest = trash_dir.join(format!("{}_{attempt}", name.to_string_lossy()));
            attempt += 1;
        }
        std::fs::rename(path, dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_bundle_into_sibling_trash_directory() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("dev.GhostVM");
        std::fs::create_dir_all(&bundle).unwrap();

        FilesystemTrash.move_to_trash(&bundle).unwrap();

        assert!(!bundle.exists());
        assert!(dir.path().join(".ghostvm-trash/dev.GhostVM").exists());
    }

    #[test]
    fn deduplicates_on_name_collision() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("dev.GhostVM");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::create_dir_all(dir.path().join(".ghostvm-trash/dev.GhostVM")).unwrap();

        FilesystemTrash.move_to_trash(&bundle).unwrap();

        assert!(dir.path().join(".ghostvm-trash/dev.GhostVM_1").exists());
    }
}
