//! Recovery after a forced exit (`bootsetup --cleanup`)
//!
//! An installer killed mid-operation can leave partitions mounted beneath
//! its scratch directory. The cleaner unmounts them and removes the
//! directories once nothing is mounted there anymore.

use crate::config::Settings;
use crate::disk::manager::force_unmount;
use crate::disk::MountTable;
use crate::utils::command::CommandRunner;
use crate::utils::error::Result;
use crate::utils::scratch::SCRATCH_PREFIX;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// What a cleanup run did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub unmounted: usize,
    pub removed: usize,
    /// Scratch directories left in place because something is still mounted
    pub kept: Vec<PathBuf>,
}

/// Cleanup utility
pub struct Cleaner {
    cmd: CommandRunner,
    table: MountTable,
    scratch_root: PathBuf,
}

impl Cleaner {
    pub fn new(settings: &Settings, dry_run: bool) -> Self {
        Self {
            cmd: CommandRunner::new(dry_run).with_timeout(settings.command_timeout()),
            table: MountTable::new(&settings.paths.mount_table),
            scratch_root: settings.paths.scratch_root.clone(),
        }
    }

    /// Scratch directories left by earlier runs
    pub fn scratch_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.scratch_root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(SCRATCH_PREFIX))
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    /// Unmount everything beneath the scratch directories, deepest first,
    /// then remove the directories that are free.
    pub fn cleanup(&self) -> Result<CleanupReport> {
        info!("Cleaning up scratch directories in {}", self.scratch_root.display());
        let mut report = CleanupReport::default();

        for dir in self.scratch_dirs()? {
            let mut busy = false;
            for mount_point in self.table.mounts_under(&dir)? {
                match force_unmount(&self.cmd, &mount_point) {
                    Ok(()) => report.unmounted += 1,
                    Err(e) => {
                        warn!("{}", e);
                        busy = true;
                    }
                }
            }

            // A dry run leaves the mount table as it was
            if !self.cmd.is_dry_run() && !busy {
                busy = !self.table.mounts_under(&dir)?.is_empty();
            }
            if busy {
                warn!("Keeping {}: still mounted", dir.display());
                report.kept.push(dir);
                continue;
            }

            if self.cmd.is_dry_run() {
                info!("[dry-run] Would remove {}", dir.display());
            } else {
                fs::remove_dir_all(&dir)?;
                info!("Removed {}", dir.display());
            }
            report.removed += 1;
        }

        info!(
            "Cleanup complete: {} unmounted, {} removed, {} kept",
            report.unmounted,
            report.removed,
            report.kept.len()
        );
        Ok(report)
    }

    /// Commands issued so far
    pub fn history(&self) -> Vec<String> {
        self.cmd.history()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn settings(root: &Path, mount_table: &str) -> Settings {
        let table = root.join("mounts");
        fs::write(&table, mount_table).unwrap();
        let scratch_root = root.join("tmp");
        fs::create_dir_all(&scratch_root).unwrap();

        let mut settings = Settings::default();
        settings.paths.mount_table = table;
        settings.paths.scratch_root = scratch_root;
        settings
    }

    #[test]
    fn unmounts_leftovers_deepest_first() {
        let root = tempfile::tempdir().unwrap();
        let lilo = root.path().join("tmp/bootsetup.lilo-a1b2c3");
        let mp = lilo.join("mounts/sda5");
        fs::create_dir_all(&mp).unwrap();
        let settings = settings(
            root.path(),
            &format!(
                "/dev/sda1 / ext4 rw 0 0\n/dev/sda5 {mp} ext4 rw 0 0\ndevtmpfs {mp}/dev devtmpfs rw 0 0\n",
                mp = mp.display()
            ),
        );

        let cleaner = Cleaner::new(&settings, true);
        let report = cleaner.cleanup().unwrap();
        assert_eq!(report.unmounted, 2);
        assert_eq!(report.removed, 1);
        assert_eq!(
            cleaner.history(),
            vec![
                format!("umount {}/dev", mp.display()),
                format!("umount {}", mp.display()),
            ]
        );
        // Dry run leaves the directory alone
        assert!(lilo.exists());
    }

    #[test]
    fn removes_idle_scratch_dirs_only() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path(), "/dev/sda1 / ext4 rw 0 0\n");
        let idle = root.path().join("tmp/bootsetup.grub2-zzzzzz");
        fs::create_dir_all(idle.join("mounts/sdb2")).unwrap();
        let unrelated = root.path().join("tmp/other");
        fs::create_dir_all(&unrelated).unwrap();

        let cleaner = Cleaner::new(&settings, false);
        assert_eq!(cleaner.scratch_dirs().unwrap(), vec![idle.clone()]);

        let report = cleaner.cleanup().unwrap();
        assert_eq!(report.removed, 1);
        assert!(report.kept.is_empty());
        assert!(!idle.exists());
        assert!(unrelated.exists());
        assert!(cleaner.history().is_empty());
    }

    #[test]
    fn failed_unmount_keeps_directory() {
        let root = tempfile::tempdir().unwrap();
        let lilo = root.path().join("tmp/bootsetup.lilo-a1b2c3");
        let mp = lilo.join("mounts/sda5");
        fs::create_dir_all(&mp).unwrap();
        let settings = settings(
            root.path(),
            &format!("/dev/sda5 {} ext4 rw 0 0\n", mp.display()),
        );

        let mut cleaner = Cleaner::new(&settings, true);
        cleaner.cmd = CommandRunner::new(true).fail_on("umount");
        let report = cleaner.cleanup().unwrap();
        assert_eq!(report.kept, vec![lilo]);
        assert_eq!(report.removed, 0);
    }
}
