//! Inventory of the machine bootsetup runs on

use super::SystemInventory;
use crate::config::{sanitize_label, strip_dev, BootCandidate, Disk, OsKind, Partition, Settings};
use crate::disk::detection::{self, probe_filesystem, probe_label, SYSFS_BLOCK};
use crate::disk::MountTable;
use crate::utils::command::{command_exists, run_command_output};
use crate::utils::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct HostInventory {
    sysfs_block: PathBuf,
    mount_table: MountTable,
    live_markers: Vec<PathBuf>,
    /// Treat the host as live whatever the markers say (test mode)
    force_live: bool,
    os_release: PathBuf,
}

impl HostInventory {
    pub fn new(settings: &Settings, force_live: bool) -> Self {
        Self {
            sysfs_block: PathBuf::from(SYSFS_BLOCK),
            mount_table: MountTable::new(&settings.paths.mount_table),
            live_markers: settings.paths.live_markers.clone(),
            force_live,
            os_release: PathBuf::from("/etc/os-release"),
        }
    }

    fn all_partitions(&self) -> Result<Vec<Partition>> {
        let mut partitions = Vec::new();
        for disk in self.list_disks()? {
            partitions.extend(self.list_partitions(&disk.device)?);
        }
        Ok(partitions)
    }

    /// os-prober never reports the running system, so it is added by hand
    fn root_candidate(&self) -> Result<Option<BootCandidate>> {
        let Some(root) = self.mount_table.find_mount_point(Path::new("/"))? else {
            return Ok(None);
        };
        if !root.device.starts_with("/dev/") {
            debug!("Root filesystem on {} is not a block device", root.device);
            return Ok(None);
        }
        let name = fs::read_to_string(&self.os_release)
            .ok()
            .and_then(|content| parse_os_release_name(&content))
            .unwrap_or_else(|| "Linux".to_string());
        Ok(Some(BootCandidate::new(
            &root.device,
            &root.fstype,
            OsKind::Linux,
            &name,
        )))
    }

    /// Put the running system first unless the host is a live environment
    fn add_running_system(&self, candidates: &mut Vec<BootCandidate>) -> Result<()> {
        if self.is_live_environment() {
            return Ok(());
        }
        if let Some(root) = self.root_candidate()? {
            if !candidates.iter().any(|c| c.device == root.device) {
                candidates.insert(0, root);
            }
        }
        Ok(())
    }
}

impl SystemInventory for HostInventory {
    fn list_disks(&self) -> Result<Vec<Disk>> {
        Ok(detection::list_disks(&self.sysfs_block)?
            .into_iter()
            .map(|dev| Disk {
                description: format!(
                    "{} ({})",
                    dev.model.as_deref().unwrap_or("Unknown"),
                    dev.size_human()
                ),
                device: dev.name,
            })
            .collect())
    }

    fn list_partitions(&self, disk: &str) -> Result<Vec<Partition>> {
        let mut partitions = Vec::new();
        for dev in detection::list_partitions(&self.sysfs_block, disk)? {
            let path = format!("/dev/{}", dev.name);
            // Extended partitions have no filesystem, swap cannot boot
            let Some(filesystem) = probe_filesystem(&path).filter(|fs| fs != "swap") else {
                continue;
            };
            let label = probe_label(&path).unwrap_or_else(|| dev.name.clone());
            partitions.push(Partition {
                description: format!("{} ({})", label, dev.size_human()),
                device: dev.name,
                filesystem,
            });
        }
        Ok(partitions)
    }

    fn probe_operating_systems(&self) -> Result<Vec<BootCandidate>> {
        let partitions = self.all_partitions()?;

        let mut candidates = if command_exists("os-prober") {
            match run_command_output("os-prober", &[]) {
                Ok(output) => parse_os_prober(&output, &partitions),
                Err(e) => {
                    warn!("os-prober failed: {}", e);
                    Vec::new()
                }
            }
        } else {
            warn!("os-prober not found, only the running system will be listed");
            Vec::new()
        };

        self.add_running_system(&mut candidates)?;
        Ok(candidates)
    }

    fn is_live_environment(&self) -> bool {
        self.force_live
            || !self.live_markers.is_empty() && self.live_markers.iter().all(|m| m.is_file())
    }
}

/// Parse os-prober lines (`device:long name:short label:type`). The
/// filesystem comes from `partitions`, falling back to blkid.
pub fn parse_os_prober(output: &str, partitions: &[Partition]) -> Vec<BootCandidate> {
    let mut candidates: Vec<BootCandidate> = Vec::new();

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut tail = line.rsplitn(3, ':');
        let (Some(kind), Some(short), Some(head)) = (tail.next(), tail.next(), tail.next()) else {
            debug!("Ignoring os-prober line: {}", line);
            continue;
        };
        let (device, long) = head.split_once(':').unwrap_or((head, short));
        // EFI entries look like /dev/sda1@/efi/...
        let device = strip_dev(device.split('@').next().unwrap_or(device));

        if candidates.iter().any(|c| c.device == device) {
            continue;
        }

        let filesystem = partitions
            .iter()
            .find(|p| p.device == device)
            .map(|p| p.filesystem.clone())
            .or_else(|| probe_filesystem(&format!("/dev/{}", device)))
            .unwrap_or_else(|| "unknown".to_string());

        let label = sanitize_label(if short.is_empty() { long } else { short });
        candidates.push(
            BootCandidate::new(device, &filesystem, OsKind::from_prober_type(kind), long)
                .with_menu_label(&label),
        );
    }

    candidates
}

/// `NAME` from an os-release file
pub fn parse_os_release_name(content: &str) -> Option<String> {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "NAME")
        .map(|(_, value)| value.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partitions() -> Vec<Partition> {
        vec![
            Partition {
                device: "sda1".to_string(),
                filesystem: "ntfs".to_string(),
                description: "Windows (20G)".to_string(),
            },
            Partition {
                device: "sda5".to_string(),
                filesystem: "ext4".to_string(),
                description: "Salix (80G)".to_string(),
            },
        ]
    }

    #[test]
    fn parses_os_prober_output() {
        let output = "\
/dev/sda1:Windows Vista (loader):Windows:chain
/dev/sda5:Slackware Linux:Slackware:linux
/dev/sda1@/efi/Microsoft/Boot/bootmgfw.efi:Windows Boot Manager:Windows:efi
";
        let candidates = parse_os_prober(output, &partitions());
        assert_eq!(candidates.len(), 2);

        assert_eq!(candidates[0].device, "sda1");
        assert_eq!(candidates[0].filesystem, "ntfs");
        assert_eq!(candidates[0].os_kind, OsKind::Chain);
        assert_eq!(candidates[0].os_label, "Windows Vista (loader)");
        assert_eq!(candidates[0].menu_label, "Windows");

        assert_eq!(candidates[1].device, "sda5");
        assert_eq!(candidates[1].os_kind, OsKind::Linux);
        assert_eq!(candidates[1].menu_label, "Slackware");
    }

    #[test]
    fn unknown_boot_types_are_other() {
        let output = "/dev/sda5:Mac OS X:MacOSX:macosx\n";
        let candidates = parse_os_prober(output, &partitions());
        assert_eq!(candidates[0].os_kind, OsKind::Other);
        assert_eq!(candidates[0].filesystem, "ext4");
    }

    #[test]
    fn os_release_name() {
        let content = "ID=salix\nNAME=\"Salix OS\"\nVERSION=15.0\n";
        assert_eq!(parse_os_release_name(content).as_deref(), Some("Salix OS"));
        assert_eq!(parse_os_release_name("ID=x\n"), None);
    }

    #[test]
    fn root_is_prepended_outside_live_environment() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("mounts");
        fs::write(&table, "/dev/sda5 / ext4 rw 0 0\n").unwrap();
        let os_release = dir.path().join("os-release");
        fs::write(&os_release, "NAME=\"Salix OS\"\n").unwrap();

        let inventory = HostInventory {
            sysfs_block: dir.path().join("block"),
            mount_table: MountTable::new(&table),
            live_markers: vec![dir.path().join("missing-marker")],
            force_live: false,
            os_release,
        };
        assert!(!inventory.is_live_environment());

        let root = inventory.root_candidate().unwrap().unwrap();
        assert_eq!(root.device, "sda5");
        assert_eq!(root.filesystem, "ext4");
        assert_eq!(root.os_kind, OsKind::Linux);
        assert_eq!(root.menu_label, "SalixOS");

        let mut candidates = vec![BootCandidate::new("sdb2", "ext4", OsKind::Linux, "Debian")];
        inventory.add_running_system(&mut candidates).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].device, "sda5");
    }

    #[test]
    fn test_mode_host_counts_as_live() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("mounts");
        fs::write(&table, "/dev/sda5 / ext4 rw 0 0\n").unwrap();
        let mut settings = Settings::default();
        settings.paths.mount_table = table;
        settings.paths.live_markers = vec![dir.path().join("missing-marker")];

        assert!(!HostInventory::new(&settings, false).is_live_environment());
        let inventory = HostInventory::new(&settings, true);
        assert!(inventory.is_live_environment());

        let mut candidates = vec![BootCandidate::new("sdb2", "ext4", OsKind::Linux, "Debian")];
        inventory.add_running_system(&mut candidates).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].device, "sdb2");
    }

    #[test]
    fn live_markers_must_all_exist() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("salt-version");
        fs::write(&first, "1").unwrap();
        let mut inventory = HostInventory::new(&Settings::default(), false);
        inventory.live_markers = vec![first.clone(), dir.path().join("distro_infos")];
        assert!(!inventory.is_live_environment());
        fs::write(dir.path().join("distro_infos"), "x").unwrap();
        assert!(inventory.is_live_environment());
    }
}
