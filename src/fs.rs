//! Filesystem helpers shared by every persisted artifact.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tracing::debug;

/// Write-to-temp, fsync, rename, fsync the parent directory.
///
/// Every index rebuild and merge goes through this, so a crash at any
/// point leaves either the old file or the new file — never a torn one.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    fsync_dir(path.parent().unwrap_or(Path::new(".")))?;
    debug!(path = %path.display(), bytes = bytes.len(), "atomic write");
    Ok(())
}

/// Make a rename durable by fsyncing its directory.
pub fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
