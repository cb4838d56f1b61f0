//! Static inventory for `--test --data`

use super::SystemInventory;
use crate::config::{BootCandidate, Disk, OsKind, Partition};
use crate::utils::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureInventory;

fn partition(device: &str, filesystem: &str, description: &str) -> Partition {
    Partition {
        device: device.to_string(),
        filesystem: filesystem.to_string(),
        description: description.to_string(),
    }
}

impl SystemInventory for FixtureInventory {
    fn list_disks(&self) -> Result<Vec<Disk>> {
        Ok(vec![
            Disk {
                device: "sda".to_string(),
                description: "WDC100 (100GB)".to_string(),
            },
            Disk {
                device: "sdb".to_string(),
                description: "SGT350 (350GB)".to_string(),
            },
        ])
    }

    fn list_partitions(&self, disk: &str) -> Result<Vec<Partition>> {
        Ok(match disk {
            "sda" => vec![
                partition("sda1", "ntfs", "WinVista (20GB)"),
                partition("sda5", "ext2", "Salix (80GB)"),
            ],
            "sdb" => vec![
                partition("sdb1", "vfat", "Data (300GB)"),
                partition("sdb2", "ext4", "Debian (50GB)"),
            ],
            _ => Vec::new(),
        })
    }

    fn probe_operating_systems(&self) -> Result<Vec<BootCandidate>> {
        Ok(vec![
            BootCandidate::new("sda1", "ntfs", OsKind::Chain, "Windows Vista")
                .with_menu_label("WinVista"),
            BootCandidate::new("sda5", "ext2", OsKind::Linux, "Salix"),
            BootCandidate::new("sdb2", "ext4", OsKind::Linux, "Debian GNU/Linux")
                .with_menu_label("Debian"),
        ])
    }

    fn is_live_environment(&self) -> bool {
        true
    }
}
