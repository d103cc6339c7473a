//! Anonymous temp files under the repository root.
//!
//! Stored objects and spilled PDUs are staged here before being hard-linked
//! (or dropped). Files are unlinked when their handle drops, so nothing
//! leaks across a reset; a startup sweep clears anything a crash left
//! behind.

use std::{fs, io, path::{Path, PathBuf}};

use tempfile::NamedTempFile;

/// Prefix of staged temp files; the sweep only touches these.
const TMP_PREFIX: &str = "asn-";

/// Pool of anonymous temp files under `<root>/tmp`.
#[derive(Debug, Clone)]
pub struct TmpStore {
    dir: PathBuf,
}

impl TmpStore {
    /// Create the pool directory and sweep stale entries.
    pub fn open(root: &Path) -> io::Result<Self> {
        let dir = root.join("tmp");
        fs::create_dir_all(&dir)?;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let stale = entry.file_name().to_str().is_some_and(|n| n.starts_with(TMP_PREFIX));
            if stale {
                tracing::debug!(path = %entry.path().display(), "sweeping stale temp file");
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(Self { dir })
    }

    /// Allocate an empty temp file, unlinked when the handle drops.
    pub fn create(&self) -> io::Result<NamedTempFile> {
        tempfile::Builder::new().prefix(TMP_PREFIX).tempfile_in(&self.dir)
    }

    /// The pool directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
