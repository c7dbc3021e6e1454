//! Copy-on-write file cloning via `FICLONE`, grounded on the reflink-copy
//! primitive used for bundle cloning.
//!
//! Unlike a general-purpose file copy, this never falls back to a byte copy
//! when the filesystem can't reflink: a clone that silently turned into a
//! full copy would make bundle cloning slow and disk-hungry without telling
//! the caller, so any `FICLONE` failure is reported as
//! [`Error::CowUnsupported`].

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::error::{Error, Result};

/// Clones `src` to `dst` using `ioctl(FICLONE)`. `dst` must not already
/// exist.
pub fn clone_file(src: &Path, dst: &Path) -> Result<()> {
    let src_file = File::open(src)?;
    let dst_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dst)?;

    let ret = unsafe { libc::ioctl(dst_file.as_raw_fd(), libc::FICLONE as _, src_file.as_raw_fd()) };
    if ret == 0 {
        return Ok(());
    }

    let errno = std::io::Error::last_os_error();
    // clean up the empty file we created so a retry with a full copy (by
    // the caller, not us) doesn't trip over `create_new`.
    let _ = std::fs::remove_file(dst);
    tracing::warn!(?src, ?dst, %errno, "FICLONE clone failed");
    Err(Error::CowUnsupported(src.to_path_buf()))
}

/// Clones an entire bundle directory tree, file by file, using
/// [`clone_file`] for every regular file and recursing into
/// subdirectories. Fails atomically: on any single-file failure the whole
/// destination tree (as far as it was created) is removed.
pub fn clone_tree(src: &Path, dst: &Path) -> Result<()> {
    match clone_tree_inner(src, dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_dir_all(dst);
            Err(e)
        }
    }
}

fn clone_tree_inner(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if file_type.is_dir() {
            clone_tree_inner(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            clone_file(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_file_refuses_to_overwrite_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.img");
        let dst = dir.path().join("dst.img");
        std::fs::write(&src, b"data").unwrap();
        std::fs::write(&dst, b"already here").unwrap();

        let result = clone_file(&src, &dst);
        assert!(result.is_err());
    }

    #[test]
    fn clone_tree_cleans_up_destination_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src-bundle");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("ok.bin"), b"data").unwrap();
        let dst = dir.path().join("dst-bundle");
        // pre-create dst/ok.bin so the inner clone_file fails via create_new.
        std::fs::create_dir_all(&dst).unwrap();
        std::fs::write(dst.join("ok.bin"), b"existing").unwrap();

        let result = clone_tree(&src, &dst);
        assert!(result.is_err());
        assert!(!dst.exists());
    }
}
