//! LiLo configuration and installation

use crate::config::{
    device_path, is_label_valid, strip_dev, BootCandidate, Bootloader, LabelValidity,
    LiloSettings, Settings,
};
use crate::configure::kernel::{find_boot_images, BootImages};
use crate::configure::lilo_conf::{LiloConfig, LiloEntry};
use crate::disk::{MountManager, MountSession, MountTable};
use crate::install::chroot::{release_session, ChrootEnvironment};
use crate::utils::command::CommandRunner;
use crate::utils::error::{BootSetupError, Result};
use crate::utils::scratch::ScratchDir;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where the other Linux partitions are mounted inside the boot partition
/// while `lilo` runs
pub const NESTED_MOUNT_ROOT: &str = "/mnt/bootsetup";

/// Path of the configuration inside the target
const TARGET_CONF: &str = "/etc/lilo.conf";

/// What `install` needs to know about the last generated configuration
#[derive(Debug, Clone)]
struct InstallPlan {
    boot_partition: String,
    other_linux: Vec<String>,
}

pub struct LiloInstaller {
    cmd: CommandRunner,
    mounts: MountManager,
    scratch: ScratchDir,
    settings: LiloSettings,
    config_path: PathBuf,
    plan: Option<InstallPlan>,
}

fn nested_mount_point(device: &str) -> String {
    format!("{}/{}", NESTED_MOUNT_ROOT, strip_dev(device))
}

/// Every label must be accepted by LiLo and appear only once
fn validate_labels(candidates: &[BootCandidate]) -> Result<()> {
    let mut seen = HashSet::new();
    for candidate in candidates {
        let label = &candidate.menu_label;
        let validity = is_label_valid(label);
        if validity != LabelValidity::Ok {
            return Err(BootSetupError::InvalidLabel {
                label: label.clone(),
                validity,
            });
        }
        if !seen.insert(label.as_str()) {
            return Err(BootSetupError::ValidationError(format!(
                "menu label '{}' is used more than once",
                label
            )));
        }
    }
    Ok(())
}

fn into_install_error(e: BootSetupError) -> BootSetupError {
    match e {
        e @ BootSetupError::LiloInstall(_) => e,
        other => BootSetupError::LiloInstall(other.to_string()),
    }
}

impl LiloInstaller {
    pub fn new(settings: &Settings, dry_run: bool) -> Result<Self> {
        let table = MountTable::new(&settings.paths.mount_table);
        let scratch = ScratchDir::new(&settings.paths.scratch_root, Bootloader::Lilo, table.clone())?;
        let mounts = MountManager::new(table, scratch.mounts_dir());
        let config_path = scratch.path().join("lilo.conf");
        Ok(Self {
            cmd: CommandRunner::new(dry_run).with_timeout(settings.command_timeout()),
            mounts,
            scratch,
            settings: settings.lilo.clone(),
            config_path,
            plan: None,
        })
    }

    /// The generated file, for hand editing
    pub fn configuration_path(&self) -> &Path {
        &self.config_path
    }

    pub fn has_configuration(&self) -> bool {
        self.config_path.is_file()
    }

    /// Partition chosen by the last `create_configuration`
    pub fn boot_partition(&self) -> Option<&str> {
        self.plan.as_ref().map(|p| p.boot_partition.as_str())
    }

    /// Write a configuration booting `candidates` in the given order.
    ///
    /// The first Linux candidate becomes the boot partition and the default
    /// entry; `boot_partition` is only a hint. Nothing is mounted or written
    /// when a label is invalid or no Linux candidate exists.
    pub fn create_configuration(
        &mut self,
        mbr_device: &str,
        boot_partition: &str,
        candidates: &[BootCandidate],
    ) -> Result<()> {
        validate_labels(candidates)?;

        let boot = candidates
            .iter()
            .find(|c| c.is_linux())
            .ok_or(BootSetupError::NoLinuxPartition)?;
        let boot_device = strip_dev(&boot.device).to_string();
        if strip_dev(boot_partition) != boot_device {
            debug!(
                "Using {} as boot partition instead of {}: it is the first Linux entry",
                boot_device, boot_partition
            );
        }

        let mut config = LiloConfig::new(mbr_device, &self.settings);
        let mut other_linux = Vec::new();
        for candidate in candidates {
            let device = strip_dev(&candidate.device);
            if !candidate.is_linux() {
                config.push(LiloEntry::Other {
                    device: device_path(device),
                    label: candidate.menu_label.clone(),
                });
                continue;
            }

            let is_boot = device == boot_device;
            let images = self.detect_boot_images(device, is_boot)?;
            let prefix = if is_boot {
                String::new()
            } else {
                other_linux.push(device.to_string());
                nested_mount_point(device)
            };
            config.push(LiloEntry::Linux {
                image: format!("{}/boot/{}", prefix, images.kernel),
                initrd: images.initrd.map(|i| format!("{}/boot/{}", prefix, i)),
                root: device_path(device),
                label: candidate.menu_label.clone(),
            });
        }

        fs::write(&self.config_path, config.render())?;
        info!(
            "LiLo configuration written to {} ({} entries)",
            self.config_path.display(),
            config.entries().len()
        );

        self.plan = Some(InstallPlan {
            boot_partition: boot_device,
            other_linux,
        });
        Ok(())
    }

    /// Mount a Linux partition just long enough to find its kernel
    fn detect_boot_images(&mut self, device: &str, is_boot: bool) -> Result<BootImages> {
        let mut session = self.mounts.mount(&self.cmd, device)?;
        let found = self.scan_boot_dir(&mut session, is_boot);
        let released = release_session(&self.cmd, &mut self.mounts, &mut session);
        let found = found?;
        released?;

        Ok(found.unwrap_or_else(|| {
            warn!("No kernel found on {}, assuming /boot/vmlinuz", device);
            BootImages::fallback()
        }))
    }

    fn scan_boot_dir(&self, session: &mut MountSession, is_boot: bool) -> Result<Option<BootImages>> {
        if is_boot {
            let env = ChrootEnvironment::new(&self.cmd);
            env.bind(session, &["/dev"])?;
            env.mount_boot_if_chrootable(session);
        }
        find_boot_images(&session.path_in_target("boot"))
    }

    /// Discard the generated (or hand-edited) configuration
    pub fn remove_configuration(&mut self) -> Result<()> {
        if self.has_configuration() {
            fs::remove_file(&self.config_path)?;
            info!("Removed {}", self.config_path.display());
        }
        self.plan = None;
        Ok(())
    }

    /// Copy the configuration into the boot partition and run `lilo`.
    pub fn install(&mut self) -> Result<()> {
        let plan = match (&self.plan, self.has_configuration()) {
            (Some(plan), true) => plan.clone(),
            _ => return Err(BootSetupError::MissingConfiguration(self.config_path.clone())),
        };
        info!("Installing LiLo from {}", device_path(&plan.boot_partition));

        let mut session = self
            .mounts
            .mount(&self.cmd, &plan.boot_partition)
            .map_err(into_install_error)?;
        let outcome = self.install_in(&mut session, &plan);
        let released = release_session(&self.cmd, &mut self.mounts, &mut session);
        outcome.and(released).map_err(into_install_error)?;

        info!("LiLo installed");
        Ok(())
    }

    fn install_in(&self, session: &mut MountSession, plan: &InstallPlan) -> Result<()> {
        let env = ChrootEnvironment::new(&self.cmd);
        env.bind(session, &["/dev"])?;
        env.mount_boot_if_chrootable(session);
        for device in &plan.other_linux {
            env.mount_nested(&self.mounts, session, device, &nested_mount_point(device))?;
        }

        let source = self.config_path.to_string_lossy();
        let target_conf = session.path_in_target(TARGET_CONF);
        let target = target_conf.to_string_lossy();
        self.cmd.run("cp", &[source.as_ref(), target.as_ref()])?;
        self.cmd.run_in_chroot(
            &session.target_mount_point,
            &self.settings.lilo,
            &["-C", TARGET_CONF],
        )
    }

    /// Commands issued so far
    pub fn history(&self) -> Vec<String> {
        self.cmd.history()
    }

    /// Release any leftover mount and remove the scratch directory along
    /// with the configuration
    pub fn close(mut self) -> Result<()> {
        let released = self.mounts.release_all(&self.cmd);
        let closed = self.scratch.close();
        released.and(closed)
    }
}

#[cfg(test)]
impl LiloInstaller {
    fn with_runner(mut self, cmd: CommandRunner) -> Self {
        self.cmd = cmd;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OsKind;
    use crate::configure::lilo_conf::parse_labels;

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

    fn candidates() -> Vec<BootCandidate> {
        vec![
            BootCandidate::new("sda1", "ntfs", OsKind::Chain, "Windows Vista")
                .with_menu_label("WinVista"),
            BootCandidate::new("sda5", "ext2", OsKind::Linux, "Salix"),
            BootCandidate::new("sdb2", "ext4", OsKind::Linux, "Debian GNU/Linux")
                .with_menu_label("Debian"),
        ]
    }

    #[test]
    fn first_linux_candidate_is_the_boot_partition() {
        let root = tempfile::tempdir().unwrap();
        let mut lilo = LiloInstaller::new(&settings(root.path(), ""), true).unwrap();

        lilo.create_configuration("sda", "sda1", &candidates()).unwrap();
        assert_eq!(lilo.boot_partition(), Some("sda5"));

        let text = fs::read_to_string(lilo.configuration_path()).unwrap();
        assert!(text.contains("boot = /dev/sda\n"));
        assert!(text.contains("default = Salix\n"));
        assert!(text.contains("other = /dev/sda1\n  label = WinVista\n"));
        assert!(text.contains("image = /boot/vmlinuz\n  root = /dev/sda5\n  label = Salix\n"));
        assert!(text.contains(
            "image = /mnt/bootsetup/sdb2/boot/vmlinuz\n  root = /dev/sdb2\n  label = Debian\n"
        ));

        // Every Linux partition was mounted and released again
        let history = lilo.history();
        let mounts = history.iter().filter(|l| l.starts_with("mount")).count();
        let umounts = history.iter().filter(|l| l.starts_with("umount")).count();
        assert_eq!(mounts, 3);
        assert_eq!(umounts, 3);
        assert!(lilo.mounts.owned_mounts().is_empty());
    }

    #[test]
    fn no_linux_candidate_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let mut lilo = LiloInstaller::new(&settings(root.path(), ""), true).unwrap();
        let only_windows = vec![candidates().remove(0)];

        let err = lilo
            .create_configuration("sda", "sda1", &only_windows)
            .unwrap_err();
        assert!(matches!(err, BootSetupError::NoLinuxPartition));
        assert!(!lilo.has_configuration());
        assert!(lilo.history().is_empty());
    }

    #[test]
    fn failed_creation_keeps_previous_file() {
        let root = tempfile::tempdir().unwrap();
        let mut lilo = LiloInstaller::new(&settings(root.path(), ""), true).unwrap();
        lilo.create_configuration("sda", "sda5", &candidates()).unwrap();
        let before = fs::read_to_string(lilo.configuration_path()).unwrap();

        let err = lilo
            .create_configuration("sda", "sda1", &candidates()[..1])
            .unwrap_err();
        assert!(matches!(err, BootSetupError::NoLinuxPartition));
        assert_eq!(fs::read_to_string(lilo.configuration_path()).unwrap(), before);
    }

    #[test]
    fn labels_round_trip_through_the_file() {
        let root = tempfile::tempdir().unwrap();
        let mut lilo = LiloInstaller::new(&settings(root.path(), ""), true).unwrap();
        let mut list = candidates();
        list[1].menu_label = "Salix-15.0_x64".to_string();
        list[2].menu_label = "deb.Bookworm".to_string();

        lilo.create_configuration("sda", "sda5", &list).unwrap();
        let text = fs::read_to_string(lilo.configuration_path()).unwrap();
        let expected: Vec<String> = list.iter().map(|c| c.menu_label.clone()).collect();
        assert_eq!(parse_labels(&text), expected);

        // Labels that would not read back verbatim never reach the file
        for label in ["Salix\t", "\"Salix\"", "Sal\nix", "Sal#ix", ""] {
            let mut list = candidates();
            list[1].menu_label = label.to_string();
            let err = lilo.create_configuration("sda", "sda5", &list).unwrap_err();
            assert!(
                matches!(err, BootSetupError::InvalidLabel { .. }),
                "{:?} gave {:?}",
                label,
                err
            );
            assert_eq!(fs::read_to_string(lilo.configuration_path()).unwrap(), text);
        }
    }

    #[test]
    fn invalid_labels_are_rejected_before_anything_happens() {
        let root = tempfile::tempdir().unwrap();
        let mut lilo = LiloInstaller::new(&settings(root.path(), ""), true).unwrap();

        let mut spaced = candidates();
        spaced[1].menu_label = "Salix OS".to_string();
        let err = lilo.create_configuration("sda", "sda5", &spaced).unwrap_err();
        assert!(matches!(
            err,
            BootSetupError::InvalidLabel {
                validity: LabelValidity::Space,
                ..
            }
        ));

        let mut duplicated = candidates();
        duplicated[2].menu_label = "Salix".to_string();
        let err = lilo
            .create_configuration("sda", "sda5", &duplicated)
            .unwrap_err();
        assert!(matches!(err, BootSetupError::ValidationError(_)));

        assert!(!lilo.has_configuration());
        assert!(lilo.history().is_empty());
    }

    #[test]
    fn kernels_are_detected_on_mounted_partitions() {
        let root = tempfile::tempdir().unwrap();
        let salix = root.path().join("salix");
        fs::create_dir_all(salix.join("boot")).unwrap();
        fs::write(salix.join("boot/vmlinuz-huge-5.15.19"), "").unwrap();
        fs::write(salix.join("boot/initrd-huge-5.15.19.gz"), "").unwrap();

        let settings = settings(
            root.path(),
            &format!("/dev/sda5 {} ext4 rw 0 0\n", salix.display()),
        );
        let mut lilo = LiloInstaller::new(&settings, true).unwrap();
        lilo.create_configuration("sda", "sda5", &candidates()[..2])
            .unwrap();

        let text = fs::read_to_string(lilo.configuration_path()).unwrap();
        assert!(text.contains("image = /boot/vmlinuz-huge-5.15.19\n"));
        assert!(text.contains("  initrd = /boot/initrd-huge-5.15.19.gz\n"));
    }

    #[test]
    fn install_without_configuration_fails() {
        let root = tempfile::tempdir().unwrap();
        let mut lilo = LiloInstaller::new(&settings(root.path(), ""), true).unwrap();
        let err = lilo.install().unwrap_err();
        assert!(matches!(err, BootSetupError::MissingConfiguration(_)));

        lilo.create_configuration("sda", "sda5", &candidates()).unwrap();
        lilo.remove_configuration().unwrap();
        assert!(!lilo.has_configuration());
        assert!(matches!(
            lilo.install().unwrap_err(),
            BootSetupError::MissingConfiguration(_)
        ));
    }

    #[test]
    fn install_sequence() {
        let root = tempfile::tempdir().unwrap();
        let mut lilo = LiloInstaller::new(&settings(root.path(), ""), true).unwrap();
        lilo.create_configuration("sda", "sda5", &candidates()).unwrap();
        let skip = lilo.history().len();

        lilo.install().unwrap();

        let p = lilo.scratch.mounts_dir().join("sda5");
        let p = p.display();
        let conf = lilo.configuration_path().display().to_string();
        assert_eq!(
            lilo.history()[skip..],
            [
                format!("mount /dev/sda5 {}", p),
                format!("mount --bind /dev {}/dev", p),
                format!("mount /dev/sdb2 {}/mnt/bootsetup/sdb2", p),
                format!("cp {} {}/etc/lilo.conf", conf, p),
                format!("chroot {} /sbin/lilo -C /etc/lilo.conf", p),
                format!("umount {}/mnt/bootsetup/sdb2", p),
                format!("umount {}/dev", p),
                format!("umount {}", p),
            ]
        );
    }

    #[test]
    fn failed_lilo_run_still_releases_everything() {
        for failing in ["lilo", "cp"] {
            let root = tempfile::tempdir().unwrap();
            let mut lilo = LiloInstaller::new(&settings(root.path(), ""), true).unwrap();
            lilo.create_configuration("sda", "sda5", &candidates()).unwrap();

            lilo = lilo.with_runner(CommandRunner::new(true).fail_on(failing));
            let err = lilo.install().unwrap_err();
            assert!(matches!(err, BootSetupError::LiloInstall(_)));

            let history = lilo.history();
            let mounts = history.iter().filter(|l| l.starts_with("mount")).count();
            let umounts = history.iter().filter(|l| l.starts_with("umount")).count();
            assert_eq!(mounts, 3, "{failing}");
            assert_eq!(umounts, 3, "{failing}");
            assert!(lilo.mounts.owned_mounts().is_empty());
            if failing == "cp" {
                assert!(!history.iter().any(|l| l.contains("-C")));
            }
        }
    }

    #[test]
    fn close_removes_configuration() {
        let root = tempfile::tempdir().unwrap();
        let mut lilo = LiloInstaller::new(&settings(root.path(), ""), true).unwrap();
        lilo.create_configuration("sda", "sda5", &candidates()).unwrap();
        let path = lilo.configuration_path().to_path_buf();
        assert!(path.is_file());
        lilo.close().unwrap();
        assert!(!path.exists());
    }
}
