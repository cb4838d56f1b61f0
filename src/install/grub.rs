//! Grub2 installation

use crate::config::{device_path, Bootloader, GrubSettings, Settings};
use crate::disk::{MountManager, MountSession, MountTable};
use crate::install::chroot::{release_session, ChrootEnvironment};
use crate::utils::command::CommandRunner;
use crate::utils::error::{BootSetupError, Result};
use crate::utils::scratch::ScratchDir;
use tracing::info;

/// Installs Grub2 on an MBR device from a boot partition.
///
/// Each `install` call mounts what it needs and releases it before
/// returning, whatever the outcome, so a failed call can simply be retried.
pub struct GrubInstaller {
    cmd: CommandRunner,
    mounts: MountManager,
    scratch: ScratchDir,
    tools: GrubSettings,
}

impl GrubInstaller {
    pub fn new(settings: &Settings, dry_run: bool) -> Result<Self> {
        let table = MountTable::new(&settings.paths.mount_table);
        let scratch = ScratchDir::new(&settings.paths.scratch_root, Bootloader::Grub2, table.clone())?;
        let mounts = MountManager::new(table, scratch.mounts_dir());
        Ok(Self {
            cmd: CommandRunner::new(dry_run).with_timeout(settings.command_timeout()),
            mounts,
            scratch,
            tools: settings.grub.clone(),
        })
    }

    /// Install Grub2 on `mbr_device` with its files on `boot_partition`.
    /// A failing `grub-install` is reported as [`BootSetupError::GrubInstall`]
    /// and no configuration is generated.
    pub fn install(&mut self, mbr_device: &str, boot_partition: &str) -> Result<()> {
        let mbr = device_path(mbr_device);
        info!(
            "Installing Grub2 on {} (boot partition {})",
            mbr,
            device_path(boot_partition)
        );

        let mut session = self.mounts.mount(&self.cmd, boot_partition)?;
        let outcome = self.install_in(&mut session, &mbr);
        let released = release_session(&self.cmd, &mut self.mounts, &mut session);
        outcome?;
        released?;

        info!("Grub2 installed on {}", mbr);
        Ok(())
    }

    fn install_in(&self, session: &mut MountSession, mbr: &str) -> Result<()> {
        ChrootEnvironment::new(&self.cmd).mount_boot_if_chrootable(session);

        let boot_dir = session.path_in_target("boot");
        self.cmd
            .run(
                &self.tools.grub_install,
                &["--boot-directory", &boot_dir.to_string_lossy(), "--no-floppy", mbr],
            )
            .map_err(|e| BootSetupError::GrubInstall {
                device: mbr.to_string(),
                reason: e.to_string(),
            })?;

        self.generate_config(session)
    }

    /// Prefer the target's own `update-grub`, which knows its distribution's
    /// defaults; fall back to the host's `grub-mkconfig`.
    fn generate_config(&self, session: &mut MountSession) -> Result<()> {
        let has_defaults = session.path_in_target("etc/default/grub").is_file();
        let has_update_grub = session.path_in_target(&self.tools.update_grub).is_file();

        if has_defaults && has_update_grub {
            info!("Generating grub.cfg with update-grub");
            ChrootEnvironment::new(&self.cmd).bind_pseudo_filesystems(session)?;
            self.cmd
                .run_in_chroot(&session.target_mount_point, &self.tools.update_grub, &[])
        } else {
            let grub_cfg = session.path_in_target("boot/grub/grub.cfg");
            info!("Generating {}", grub_cfg.display());
            self.cmd.run(
                &self.tools.grub_mkconfig,
                &["-o", &grub_cfg.to_string_lossy()],
            )
        }
    }

    /// Commands issued so far
    pub fn history(&self) -> Vec<String> {
        self.cmd.history()
    }

    /// Release any leftover mount and remove the scratch directory
    pub fn close(mut self) -> Result<()> {
        let released = self.mounts.release_all(&self.cmd);
        let closed = self.scratch.close();
        released.and(closed)
    }
}

#[cfg(test)]
impl GrubInstaller {
    fn with_runner(mut self, cmd: CommandRunner) -> Self {
        self.cmd = cmd;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn settings(root: &Path, mount_table: &str) -> Settings {
        let scratch_root = root.join("tmp");
        fs::create_dir_all(&scratch_root).unwrap();
        let table = root.join("mounts");
        fs::write(&table, mount_table).unwrap();

        let mut settings = Settings::default();
        settings.paths.scratch_root = scratch_root;
        settings.paths.mount_table = table;
        settings
    }

    #[test]
    fn dry_run_sequence_for_unmounted_partition() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path(), "/dev/sda1 / ext4 rw 0 0\n");
        let mut grub = GrubInstaller::new(&settings, true).unwrap();
        let p = grub.scratch.mounts_dir().join("sda5");

        grub.install("sda", "sda5").unwrap();

        let p = p.display();
        assert_eq!(
            grub.history(),
            vec![
                format!("mount /dev/sda5 {}", p),
                format!(
                    "/usr/sbin/grub-install --boot-directory {}/boot --no-floppy /dev/sda",
                    p
                ),
                format!("/usr/sbin/grub-mkconfig -o {}/boot/grub/grub.cfg", p),
                format!("umount {}", p),
            ]
        );
        assert!(grub.mounts.owned_mounts().is_empty());

        let scratch = grub.scratch.path().to_path_buf();
        grub.close().unwrap();
        assert!(!scratch.exists());
    }

    #[test]
    fn repeated_dry_runs_are_identical() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path(), "");
        let mut grub = GrubInstaller::new(&settings, true).unwrap();

        grub.install("sda", "sda5").unwrap();
        grub.install("sda", "sda5").unwrap();

        let history = grub.history();
        assert_eq!(history.len(), 8);
        assert_eq!(history[..4], history[4..]);
    }

    #[test]
    fn failed_grub_install_skips_config_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path(), "");
        let mut grub = GrubInstaller::new(&settings, true)
            .unwrap()
            .with_runner(CommandRunner::new(true).fail_on("grub-install"));
        let p = grub.scratch.mounts_dir().join("sda5");

        let err = grub.install("/dev/sda", "/dev/sda5").unwrap_err();
        match err {
            BootSetupError::GrubInstall { device, .. } => assert_eq!(device, "/dev/sda"),
            other => panic!("unexpected error: {other}"),
        }

        let history = grub.history();
        assert_eq!(history.len(), 3);
        assert!(!history.iter().any(|l| l.contains("grub-mkconfig")));
        assert_eq!(history[2], format!("umount {}", p.display()));
        assert!(grub.mounts.owned_mounts().is_empty());

        // The installer stays usable
        grub = grub.with_runner(CommandRunner::new(true));
        grub.install("sda", "sda5").unwrap();
    }

    #[test]
    fn update_grub_runs_in_bound_chroot() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("target");
        fs::create_dir_all(target.join("etc/default")).unwrap();
        fs::create_dir_all(target.join("usr/sbin")).unwrap();
        fs::write(target.join("etc/default/grub"), "GRUB_TIMEOUT=5\n").unwrap();
        fs::write(target.join("usr/sbin/update-grub"), "#!/bin/sh\n").unwrap();
        fs::write(
            target.join("etc/fstab"),
            "/dev/sda5 / ext4 defaults 1 1\n/dev/sda2 /boot ext2 defaults 1 2\n",
        )
        .unwrap();

        let settings = settings(
            root.path(),
            &format!("/dev/sda5 {} ext4 rw 0 0\n", target.display()),
        );
        let mut grub = GrubInstaller::new(&settings, true).unwrap();
        grub.install("sda", "sda5").unwrap();

        let t = target.display();
        assert_eq!(
            grub.history(),
            vec![
                format!("chroot {} mount /boot", t),
                format!(
                    "/usr/sbin/grub-install --boot-directory {}/boot --no-floppy /dev/sda",
                    t
                ),
                format!("mount --bind /dev {}/dev", t),
                format!("mount --bind /proc {}/proc", t),
                format!("mount --bind /sys {}/sys", t),
                format!("chroot {} /usr/sbin/update-grub", t),
                format!("umount {}/sys", t),
                format!("umount {}/proc", t),
                format!("umount {}/dev", t),
                format!("umount {}/boot", t),
            ]
        );
    }

    #[test]
    fn cleanup_after_failed_update_grub() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("target");
        fs::create_dir_all(target.join("etc/default")).unwrap();
        fs::create_dir_all(target.join("usr/sbin")).unwrap();
        fs::write(target.join("etc/default/grub"), "").unwrap();
        fs::write(target.join("usr/sbin/update-grub"), "").unwrap();

        let settings = settings(
            root.path(),
            &format!("/dev/sda5 {} ext4 rw 0 0\n", target.display()),
        );
        let mut grub = GrubInstaller::new(&settings, true)
            .unwrap()
            .with_runner(CommandRunner::new(true).fail_on("update-grub"));
        assert!(grub.install("sda", "sda5").is_err());

        let history = grub.history();
        assert_eq!(
            history.iter().filter(|l| l.starts_with("umount")).count(),
            3
        );
        assert_eq!(history.last().unwrap(), &format!("umount {}/dev", target.display()));
    }

    #[test]
    fn live_root_is_installed_in_place() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path(), "/dev/sda5 / ext4 rw 0 0\n");
        let mut grub = GrubInstaller::new(&settings, true).unwrap();
        grub.install("sda", "sda5").unwrap();

        let history = grub.history();
        assert_eq!(
            history[0],
            "/usr/sbin/grub-install --boot-directory /boot --no-floppy /dev/sda"
        );
        assert!(!history.iter().any(|l| l.starts_with("mount") || l.starts_with("umount")));
    }
}
