//! Ownership guard for a destination file that is still being written

use std::path::PathBuf;
use tracing::{debug, warn};

/// Removes the destination file unless the transfer is committed
///
/// Every path out of the fetch worker other than a successful commit ends in
/// [`PartialFile::discard`]. If the worker unwinds or its task is aborted
/// before that, `Drop` removes the file synchronously instead.
#[derive(Debug)]
pub(crate) struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    /// Take ownership of `path` for the lifetime of a transfer
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    #[cfg(test)]
    pub(crate) fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Keep the file: the transfer completed
    pub(crate) fn commit(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }

    /// Remove whatever was written so far
    pub(crate) async fn discard(mut self) {
        self.armed = false;
        match crate::utils::remove_file_if_exists(&self.path).await {
            Ok(true) => debug!(path = ?self.path, "removed partial download"),
            Ok(false) => {}
            Err(e) => warn!(path = ?self.path, error = %e, "failed to remove partial download"),
        }
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = ?self.path, "removed partial download on unwind"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?self.path, error = %e, "failed to remove partial download"),
        }
    }
}
