//! Config installer: compare a desired file with the installed one and
//! replace the installed file only when the bytes differ.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{IoOp, NodePrepError, Result};

/// Mode of every installed file (rw-r--r--)
pub const FILE_MODE: u32 = 0o644;

/// Mode of directories created for destinations (rwxr-xr-x)
pub const DIR_MODE: u32 = 0o755;

/// Read a file, treating a missing file as empty
fn read_or_empty(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(NodePrepError::io(IoOp::Read, path, e)),
    }
}

/// Desired bytes for `source`, or None when there is no desired file
fn read_desired(source: &Path) -> Result<Option<Vec<u8>>> {
    match fs::metadata(source) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(NodePrepError::io(IoOp::Read, source, e)),
    }
    fs::read(source)
        .map(Some)
        .map_err(|e| NodePrepError::io(IoOp::Read, source, e))
}

/// Report whether installing `source` over `dest` would change anything.
///
/// Never writes.
pub fn would_change(source: &Path, dest: &Path) -> Result<bool> {
    let Some(desired) = read_desired(source)? else {
        return Ok(false);
    };
    let current = read_or_empty(dest)?;
    Ok(current != desired)
}

/// Install `source` at `dest` if their contents differ.
///
/// Returns `Ok(true)` when `dest` was rewritten. A missing `source` is not an
/// error and leaves `dest` untouched. Equal contents leave `dest` (and its
/// permissions) untouched. The parent of `dest` must already exist.
pub fn install_if_changed(source: &Path, dest: &Path) -> Result<bool> {
    let Some(desired) = read_desired(source)? else {
        debug!("{} absent, skipping {}", source.display(), dest.display());
        return Ok(false);
    };
    let current = read_or_empty(dest)?;

    if current == desired {
        info!("{} already configured", dest.display());
        return Ok(false);
    }

    info!(
        "Updating {}:\n{}",
        dest.display(),
        String::from_utf8_lossy(&desired)
    );
    write_atomic(dest, &desired)?;
    Ok(true)
}

/// Write `content` to a temp file beside `dest`, then rename it into place
fn write_atomic(dest: &Path, content: &[u8]) -> Result<()> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let write_err = |e: io::Error| NodePrepError::io(IoOp::Write, dest, e);

    let mut tmp = tempfile::Builder::new()
        .prefix(".nodeprep-")
        .tempfile_in(parent)
        .map_err(write_err)?;
    tmp.write_all(content).map_err(write_err)?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(FILE_MODE))
        .map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(dest).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Create `dir` and any missing parents with DIR_MODE
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(dir)
        .map_err(|e| NodePrepError::io(IoOp::CreateDir, dir, e))
}
