//! Mounting partitions on ephemeral mount points
//!
//! The manager only ever unmounts what it mounted itself. A partition that
//! is already mounted (by the running system, a user or another service) is
//! reused in place and left mounted afterwards.

use crate::config::{device_path, strip_dev};
use crate::disk::mounts::MountTable;
use crate::utils::command::CommandRunner;
use crate::utils::error::{BootSetupError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Resources held on behalf of one install or configure call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSession {
    /// Where the target partition is reachable
    pub target_mount_point: PathBuf,
    /// Whether this session mounted the partition (and must unmount it)
    pub owns_mount: bool,
    /// Mounts made beneath the target, in creation order
    pub bound_paths: Vec<PathBuf>,
    /// Whether `/boot` was mounted inside the target through chroot
    pub chroot_boot_mounted: bool,
}

impl MountSession {
    pub fn new(target_mount_point: impl Into<PathBuf>, owns_mount: bool) -> Self {
        Self {
            target_mount_point: target_mount_point.into(),
            owns_mount,
            bound_paths: Vec::new(),
            chroot_boot_mounted: false,
        }
    }

    /// The target is the running system's root
    pub fn is_live_root(&self) -> bool {
        self.target_mount_point == Path::new("/")
    }

    /// Absolute path of `relative` inside the target
    pub fn path_in_target(&self, relative: &str) -> PathBuf {
        self.target_mount_point
            .join(relative.trim_start_matches('/'))
    }

    /// Nothing is left bound or mounted beneath the target
    pub fn is_released(&self) -> bool {
        self.bound_paths.is_empty() && !self.chroot_boot_mounted
    }
}

/// `umount`, falling back to a lazy unmount when the target is busy
pub(crate) fn force_unmount(cmd: &CommandRunner, path: &Path) -> Result<()> {
    let target = path.to_string_lossy();
    info!("Unmounting {}", target);
    if let Err(e) = cmd.run("umount", &[&target]) {
        warn!("Failed to unmount {}: {} (trying lazy unmount)", target, e);
        if let Err(e2) = cmd.run("umount", &["-l", &target]) {
            warn!("Lazy unmount also failed for {}: {}", target, e2);
            return Err(BootSetupError::MountError(format!(
                "cannot unmount {}: {}",
                target, e2
            )));
        }
    }
    Ok(())
}

#[derive(Debug)]
pub struct MountManager {
    table: MountTable,
    mounts_dir: PathBuf,
    owned: BTreeSet<PathBuf>,
}

impl MountManager {
    /// Ephemeral mount points are created under `mounts_dir`.
    pub fn new(table: MountTable, mounts_dir: impl Into<PathBuf>) -> Self {
        Self {
            table,
            mounts_dir: mounts_dir.into(),
            owned: BTreeSet::new(),
        }
    }

    pub fn table(&self) -> &MountTable {
        &self.table
    }

    pub fn is_mounted(&self, device: &str) -> Result<bool> {
        Ok(self.table.find_device(&device_path(device))?.is_some())
    }

    /// Existing mount point of an already-mounted device
    pub fn mount_point(&self, device: &str) -> Result<PathBuf> {
        let device = device_path(device);
        self.table
            .find_device(&device)?
            .map(|entry| entry.mount_point)
            .ok_or(BootSetupError::NotMounted(device))
    }

    /// Make `device` reachable. An existing mount is reused and is not owned
    /// by the returned session.
    pub fn mount(&mut self, cmd: &CommandRunner, device: &str) -> Result<MountSession> {
        let device = device_path(device);

        if let Some(entry) = self.table.find_device(&device)? {
            debug!(
                "{} already mounted on {}",
                device,
                entry.mount_point.display()
            );
            return Ok(MountSession::new(entry.mount_point, false));
        }

        let mount_point = self.mounts_dir.join(strip_dev(&device).replace('/', "_"));
        fs::create_dir_all(&mount_point)?;

        info!("Mounting {} on {}", device, mount_point.display());
        if let Err(e) = cmd.run("mount", &[&device, &mount_point.to_string_lossy()]) {
            let _ = fs::remove_dir(&mount_point);
            return Err(BootSetupError::MountError(format!(
                "cannot mount {}: {}",
                device, e
            )));
        }

        self.owned.insert(mount_point.clone());
        Ok(MountSession::new(mount_point, true))
    }

    /// Unmount `path` and remove its ephemeral directory. Paths this manager
    /// did not mount are left alone.
    pub fn unmount(&mut self, cmd: &CommandRunner, path: &Path) -> Result<()> {
        if !self.owned.remove(path) {
            debug!("{} was not mounted by bootsetup, leaving it", path.display());
            return Ok(());
        }

        force_unmount(cmd, path)?;

        // Non-recursive: never walk into a filesystem that might still be
        // mounted
        if let Err(e) = fs::remove_dir(path) {
            debug!("Could not remove {}: {}", path.display(), e);
        }
        Ok(())
    }

    /// Mount points this manager still owns
    pub fn owned_mounts(&self) -> Vec<PathBuf> {
        self.owned.iter().cloned().collect()
    }

    /// Unmount everything still owned, deepest first. Every mount is tried;
    /// the first error is returned.
    pub fn release_all(&mut self, cmd: &CommandRunner) -> Result<()> {
        let mut pending = self.owned_mounts();
        pending.sort_by_key(|mp| std::cmp::Reverse(mp.components().count()));

        let mut first_error = None;
        for mount_point in pending {
            if let Err(e) = self.unmount(cmd, &mount_point) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
