//! Atomic, verified file replacement.
//!
//! Every file the engine owns is replaced the same way: write into a
//! temporary file in the destination directory, fsync, read it back and
//! compare, apply the final mode, then rename over the destination. A reader
//! (or the daemon) sees either the old file or the complete new one, never a
//! truncated one.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::{Error, Result};

/// Mode for engine-rendered configuration files.
pub const CONFIG_MODE: u32 = 0o644;

/// What a write did to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The destination was created or replaced.
    Written,
    /// The content was identical but the permission bits were fixed.
    ModeCorrected,
    /// The destination already had identical content and mode.
    Unchanged,
}

impl WriteOutcome {
    /// `true` unless the destination was left untouched.
    #[must_use]
    pub fn changed(self) -> bool {
        self != Self::Unchanged
    }
}

/// Read a file, mapping "not found" to `None`.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::fs(path, e)),
    }
}

/// Replace `path` with `contents` unless it already holds exactly that.
///
/// When the content is unchanged only the mode is corrected (if it differs),
/// so correctly-moded read-only mounts are accepted untouched.
pub fn write_if_changed(path: &Path, contents: &[u8], mode: u32) -> Result<WriteOutcome> {
    if read_optional(path)?.as_deref() == Some(contents) {
        return Ok(if ensure_mode(path, mode)? {
            WriteOutcome::ModeCorrected
        } else {
            WriteOutcome::Unchanged
        });
    }
    write_atomic(path, contents, mode)?;
    Ok(WriteOutcome::Written)
}

/// Write-then-verify-then-place.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| Error::fs(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::fs(dir, e))?;
    tmp.write_all(contents)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| Error::fs(tmp.path(), e))?;

    let written = fs::read(tmp.path()).map_err(|e| Error::fs(tmp.path(), e))?;
    if written != contents {
        return Err(Error::fs(
            tmp.path(),
            io::Error::other("read-back does not match the written content"),
        ));
    }

    set_mode(tmp.path(), mode)?;
    tmp.persist(path).map_err(|e| Error::fs(path, e.error))?;

    debug!(path = %path.display(), bytes = contents.len(), mode = %format!("{mode:o}"), "File replaced");
    Ok(())
}

/// Remove `path` if it exists.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::fs(path, e)),
    }
}

/// Set the permission bits of `path` when they differ from `mode`.
///
/// Returns whether a change was made.
#[cfg(unix)]
pub fn ensure_mode(path: &Path, mode: u32) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let current = fs::metadata(path)
        .map_err(|e| Error::fs(path, e))?
        .permissions()
        .mode()
        & 0o7777;
    if current == mode {
        return Ok(false);
    }
    set_mode(path, mode)?;
    Ok(true)
}

/// Permission bits are not managed on this platform.
#[cfg(not(unix))]
pub fn ensure_mode(_path: &Path, _mode: u32) -> Result<bool> {
    Ok(false)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| Error::fs(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
