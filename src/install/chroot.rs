//! Preparing a target root for chrooted boot loader tools

use crate::config::device_path;
use crate::disk::manager::force_unmount;
use crate::disk::{MountManager, MountSession};
use crate::utils::command::CommandRunner;
use crate::utils::error::{BootSetupError, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Host filesystems boot loader tools expect inside a chroot
pub const PSEUDO_FILESYSTEMS: [&str; 3] = ["/dev", "/proc", "/sys"];

/// Whether an fstab declares a separate `/boot`
pub fn fstab_mounts_boot(fstab: &Path) -> bool {
    let Ok(content) = fs::read_to_string(fstab) else {
        return false;
    };
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .any(|line| line.split_whitespace().nth(1) == Some("/boot"))
}

/// Binds and submounts inside a target root. Everything done is recorded in
/// the [`MountSession`] so it can be undone exactly.
pub struct ChrootEnvironment<'a> {
    cmd: &'a CommandRunner,
}

impl<'a> ChrootEnvironment<'a> {
    pub fn new(cmd: &'a CommandRunner) -> Self {
        Self { cmd }
    }

    /// Bind host `/dev`, `/proc` and `/sys` into the target
    pub fn bind_pseudo_filesystems(&self, session: &mut MountSession) -> Result<()> {
        self.bind(session, &PSEUDO_FILESYSTEMS)
    }

    /// Bind host paths to the same paths inside the target. Skipped when the
    /// target is the running root.
    pub fn bind(&self, session: &mut MountSession, sources: &[&str]) -> Result<()> {
        if session.is_live_root() {
            debug!("Target is /, nothing to bind");
            return Ok(());
        }

        for source in sources {
            let target = session.path_in_target(source);
            if session.bound_paths.contains(&target) {
                continue;
            }
            if !self.cmd.is_dry_run() {
                fs::create_dir_all(&target)?;
            }
            let target_str = target.to_string_lossy().to_string();
            self.cmd
                .run("mount", &["--bind", source, &target_str])
                .map_err(|e| {
                    BootSetupError::MountError(format!("cannot bind {}: {}", source, e))
                })?;
            session.bound_paths.push(target);
        }
        Ok(())
    }

    /// Make another partition visible at `relative` inside the target. An
    /// already-mounted partition is bound from its current mount point.
    pub fn mount_nested(
        &self,
        mounts: &MountManager,
        session: &mut MountSession,
        device: &str,
        relative: &str,
    ) -> Result<()> {
        let device = device_path(device);
        let target = session.path_in_target(relative);
        if session.bound_paths.contains(&target) {
            return Ok(());
        }
        if !self.cmd.is_dry_run() {
            fs::create_dir_all(&target)?;
        }

        let target_str = target.to_string_lossy().to_string();
        let result = match mounts.table().find_device(&device)? {
            Some(entry) => {
                let source = entry.mount_point.to_string_lossy().to_string();
                self.cmd.run("mount", &["--bind", &source, &target_str])
            }
            None => self.cmd.run("mount", &[&device, &target_str]),
        };
        result.map_err(|e| {
            BootSetupError::MountError(format!("cannot mount {} on {}: {}", device, target_str, e))
        })?;

        session.bound_paths.push(target);
        Ok(())
    }

    /// Undo every bind and nested mount of the session, most recent first.
    /// All of them are attempted; the list is empty afterwards.
    pub fn unbind_pseudo_filesystems(&self, session: &mut MountSession) -> Result<()> {
        let mut first_error = None;
        while let Some(path) = session.bound_paths.pop() {
            if let Err(e) = force_unmount(self.cmd, &path) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Mount the target's own `/boot` from inside the chroot when its fstab
    /// declares one. Best effort: a failure only means there is no separate
    /// `/boot` to worry about.
    pub fn mount_boot_if_chrootable(&self, session: &mut MountSession) {
        if session.is_live_root() || session.chroot_boot_mounted {
            return;
        }
        if !fstab_mounts_boot(&session.path_in_target("etc/fstab")) {
            debug!(
                "No /boot entry in {}/etc/fstab",
                session.target_mount_point.display()
            );
            return;
        }

        match self
            .cmd
            .run_in_chroot(&session.target_mount_point, "mount", &["/boot"])
        {
            Ok(()) => {
                info!("/boot mounted in {}", session.target_mount_point.display());
                session.chroot_boot_mounted = true;
            }
            Err(e) => debug!("/boot could not be mounted: {}", e),
        }
    }

    pub fn unmount_boot_if_mounted(&self, session: &mut MountSession) -> Result<()> {
        if !session.chroot_boot_mounted {
            return Ok(());
        }
        session.chroot_boot_mounted = false;
        force_unmount(self.cmd, &session.path_in_target("boot"))
    }
}

/// Release everything a session holds: binds and nested mounts, the chroot
/// `/boot`, then the target itself if the session mounted it. Every step
/// runs even when an earlier one fails; the first error is returned.
pub fn release_session(
    cmd: &CommandRunner,
    mounts: &mut MountManager,
    session: &mut MountSession,
) -> Result<()> {
    debug!("Releasing {}", session.target_mount_point.display());
    let env = ChrootEnvironment::new(cmd);
    let mut first_error = None;

    if let Err(e) = env.unbind_pseudo_filesystems(session) {
        first_error.get_or_insert(e);
    }
    if let Err(e) = env.unmount_boot_if_mounted(session) {
        first_error.get_or_insert(e);
    }
    if session.owns_mount && !session.is_live_root() {
        session.owns_mount = false;
        if let Err(e) = mounts.unmount(cmd, &session.target_mount_point) {
            first_error.get_or_insert(e);
        }
    }

    first_error.map_or(Ok(()), Err)
}
