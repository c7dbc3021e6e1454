//! Cross-process PID lock protocol (spec.md §4.3).

use std::fs;
use std::io::Write;
use std::path::Path;

use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockOwner {
    Cli(u32),
    Embedded(u32),
}

impl LockOwner {
    pub fn pid(self) -> u32 {
        match self {
            LockOwner::Cli(pid) | LockOwner::Embedded(pid) => pid,
        }
    }

    fn serialize(self) -> String {
        match self {
            LockOwner::Cli(pid) => format!("{pid}\n"),
            LockOwner::Embedded(pid) => format!("embedded:{pid}\n"),
        }
    }

    fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(rest) = trimmed.strip_prefix("embedded:") {
            return rest.parse().ok().map(LockOwner::Embedded);
        }
        trimmed.parse().ok().map(LockOwner::Cli)
    }

    /// POSIX signal-0 liveness probe.
    fn is_alive(self) -> bool {
        kill(Pid::from_raw(self.pid() as i32), None).is_ok()
    }
}

/// Writes `path` atomically: write to a temp file in the same directory,
/// then rename over the destination (spec.md §5: "config file is rewritten
/// atomically", applied here to the lock file too).
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("lock"),
        std::process::id()
    ));
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
}

/// Reads the lock file at `path`. Returns `None` if absent, unreadable,
/// empty, or textually malformed. A stale lock (recorded pid no longer
/// alive) is reaped (the file removed) and `None` is returned.
pub fn read_lock(path: &Path) -> Option<LockOwner> {
    let text = fs::read_to_string(path).ok()?;
    let owner = LockOwner::parse(&text)?;
    if owner.is_alive() {
        Some(owner)
    } else {
        tracing::info!(pid = owner.pid(), "reaping stale lock");
        let _ = fs::remove_file(path);
        None
    }
}

/// Acquires the lock unconditionally, overwriting any existing (necessarily
/// non-live, per `read_lock`'s reaping) file.
pub fn acquire_lock(path: &Path, owner: LockOwner) -> Result<()> {
    write_atomic(path, owner.serialize().as_bytes())?;
    Ok(())
}

pub fn release_lock(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_cli_and_embedded_owners() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pid");

        acquire_lock(&path, LockOwner::Cli(std::process::id())).unwrap();
        assert_eq!(read_lock(&path), Some(LockOwner::Cli(std::process::id())));

        acquire_lock(&path, LockOwner::Embedded(std::process::id())).unwrap();
        assert_eq!(read_lock(&path), Some(LockOwner::Embedded(std::process::id())));
    }

    #[test]
    fn malformed_contents_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pid");
        std::fs::write(&path, "not-a-pid\n").unwrap();
        assert_eq!(read_lock(&path), None);
    }

    #[test]
    fn absent_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_lock(&dir.path().join("pid")), None);
    }

    #[test]
    fn stale_lock_is_reaped_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pid");
        // pid 1 almost certainly exists but we can't kill it; use a pid that
        // is very unlikely to be alive instead (a huge value beyond pid_max).
        acquire_lock(&path, LockOwner::Cli(0x7fff_ffff)).unwrap();
        assert_eq!(read_lock(&path), None);
        assert!(!path.exists());
    }

    #[test]
    fn trailing_whitespace_is_trimmed() {
        assert_eq!(LockOwner::parse("42\n"), Some(LockOwner::Cli(42)));
        assert_eq!(LockOwner::parse("embedded:42\n"), Some(LockOwner::Embedded(42)));
        assert_eq!(LockOwner::parse(""), None);
        assert_eq!(LockOwner::parse("42 trailing"), None);
    }
}
