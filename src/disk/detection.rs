//! Disk and partition detection through sysfs and blkid

use crate::utils::command::run_command_optional;
use crate::utils::error::Result;
use std::fs;
use std::path::Path;

/// Default sysfs block directory
pub const SYSFS_BLOCK: &str = "/sys/block";

/// The kernel always reports `size` in 512-byte sectors
const SECTOR_SIZE: u64 = 512;

/// Information about a block device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    /// Device name (e.g., sda, sda5)
    pub name: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Device model (if available)
    pub model: Option<String>,
}

impl BlockDevice {
    /// Get human-readable size
    pub fn size_human(&self) -> String {
        const KIB: u64 = 1024;
        const MIB: u64 = KIB * 1024;
        const GIB: u64 = MIB * 1024;
        const TIB: u64 = GIB * 1024;

        if self.size_bytes >= TIB {
            format!("{:.1}T", self.size_bytes as f64 / TIB as f64)
        } else if self.size_bytes >= GIB {
            format!("{:.1}G", self.size_bytes as f64 / GIB as f64)
        } else if self.size_bytes >= MIB {
            format!("{:.1}M", self.size_bytes as f64 / MIB as f64)
        } else if self.size_bytes >= KIB {
            format!("{:.1}K", self.size_bytes as f64 / KIB as f64)
        } else {
            format!("{}B", self.size_bytes)
        }
    }
}

fn read_sysfs_attr(dir: &Path, attr: &str) -> Option<String> {
    fs::read_to_string(dir.join(attr))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn read_size(dir: &Path) -> u64 {
    read_sysfs_attr(dir, "size")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0)
        * SECTOR_SIZE
}

/// Devices that can never hold a boot loader
fn is_virtual(name: &str) -> bool {
    ["loop", "ram", "zram", "sr", "fd", "dm-", "nbd"]
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// List whole disks that could receive a boot loader, sorted by name
pub fn list_disks(sysfs_block: &Path) -> Result<Vec<BlockDevice>> {
    let mut disks = Vec::new();

    for entry in fs::read_dir(sysfs_block)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if is_virtual(&name) {
            continue;
        }

        let dir = entry.path();
        let size_bytes = read_size(&dir);
        if size_bytes == 0 {
            continue;
        }

        let model = read_sysfs_attr(&dir, "device/model")
            .or_else(|| read_sysfs_attr(&dir, "device/name"));

        disks.push(BlockDevice {
            name,
            size_bytes,
            model,
        });
    }

    disks.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(disks)
}

/// List the partitions of `disk`, sorted by name
pub fn list_partitions(sysfs_block: &Path, disk: &str) -> Result<Vec<BlockDevice>> {
    let disk_dir = sysfs_block.join(disk);
    let mut partitions = Vec::new();

    for entry in fs::read_dir(&disk_dir)? {
        let entry = entry?;
        let dir = entry.path();
        if !dir.join("partition").exists() {
            continue;
        }
        partitions.push(BlockDevice {
            name: entry.file_name().to_string_lossy().to_string(),
            size_bytes: read_size(&dir),
            model: None,
        });
    }

    partitions.sort_by(|a, b| natural_key(&a.name).cmp(&natural_key(&b.name)));
    Ok(partitions)
}

/// Sort key placing `sda2` before `sda10`
fn natural_key(name: &str) -> (String, u64) {
    let prefix = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let number = name[prefix.len()..].parse().unwrap_or(0);
    (prefix.to_string(), number)
}

/// Filesystem type of a partition as reported by blkid
pub fn probe_filesystem(device_path: &str) -> Option<String> {
    run_command_optional("blkid", &["-s", "TYPE", "-o", "value", device_path])
        .filter(|s| !s.is_empty())
}

/// Filesystem label of a partition as reported by blkid
pub fn probe_label(device_path: &str) -> Option<String> {
    run_command_optional("blkid", &["-s", "LABEL", "-o", "value", device_path])
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn fake_sysfs() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let block = root.path();
        write(&block.join("sda/size"), "209715200\n");
        write(&block.join("sda/device/model"), "WDC WD1003\n");
        write(&block.join("sda/sda1/partition"), "1\n");
        write(&block.join("sda/sda1/size"), "2048\n");
        write(&block.join("sda/sda10/partition"), "10\n");
        write(&block.join("sda/sda10/size"), "4096\n");
        write(&block.join("sda/sda2/partition"), "2\n");
        write(&block.join("sda/sda2/size"), "4096\n");
        write(&block.join("loop0/size"), "1000\n");
        write(&block.join("sdb/size"), "0\n");
        root
    }

    #[test]
    fn test_size_human() {
        let dev = BlockDevice {
            name: "sda".to_string(),
            size_bytes: 100 * 1024 * 1024 * 1024,
            model: None,
        };
        assert_eq!(dev.size_human(), "100.0G");
    }

    #[test]
    fn lists_real_disks_only() {
        let sysfs = fake_sysfs();
        let disks = list_disks(sysfs.path()).unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].name, "sda");
        assert_eq!(disks[0].model.as_deref(), Some("WDC WD1003"));
        assert_eq!(disks[0].size_bytes, 209715200 * 512);
    }

    #[test]
    fn lists_partitions_in_natural_order() {
        let sysfs = fake_sysfs();
        let names: Vec<String> = list_partitions(sysfs.path(), "sda")
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["sda1", "sda2", "sda10"]);
    }
}
