//! Per-installer scratch directory (`bootsetup.<bootloader>-XXXXXX`)

use crate::config::Bootloader;
use crate::disk::MountTable;
use crate::utils::error::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Name prefix shared by every scratch directory
pub const SCRATCH_PREFIX: &str = "bootsetup.";

#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
    table: MountTable,
}

impl ScratchDir {
    pub fn new(root: &Path, bootloader: Bootloader, table: MountTable) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}-", SCRATCH_PREFIX, bootloader))
            .rand_bytes(6)
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        debug!("tmp dir = {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
            table,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parent directory of the ephemeral mount points
    pub fn mounts_dir(&self) -> PathBuf {
        self.path.join("mounts")
    }

    /// Remove the directory. If anything is still mounted beneath it, the
    /// directory is left in place: a recursive removal would delete data on
    /// the mounted filesystem.
    pub fn close(&mut self) -> Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        let busy = self.table.mounts_under(&self.path).unwrap_or_else(|e| {
            warn!("Cannot read mount table {}: {}", self.table.source().display(), e);
            vec![self.path.clone()]
        });
        if !busy.is_empty() {
            warn!(
                "{} still has mounts beneath it, not removing it (run bootsetup --cleanup)",
                self.path.display()
            );
            // Dropping the TempDir would remove it recursively
            std::mem::forget(dir);
            return Ok(());
        }

        debug!("Removing {}", self.path.display());
        dir.close()?;
        Ok(())
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}
