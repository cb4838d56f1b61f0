//! Per-run snapshot of disks, partitions, boot candidates and the user's
//! current choices.

use crate::inventory::SystemInventory;
use crate::utils::error::{BootSetupError, Result};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Longest menu label LiLo accepts.
pub const MAX_LABEL_LEN: usize = 15;

/// A whole-disk block device (e.g. `sda`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    pub device: String,
    pub description: String,
}

/// A partition block device (e.g. `sda1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub device: String,
    pub filesystem: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsKind {
    Linux,
    Chain,
    Other,
}

impl OsKind {
    /// Map an os-prober boot type (`linux`, `chain`, `macosx`, `hurd`, ...)
    pub fn from_prober_type(kind: &str) -> Self {
        match kind.trim() {
            "linux" => Self::Linux,
            "chain" => Self::Chain,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for OsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Chain => write!(f, "chain"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// One bootable operating system found on a partition. Only `menu_label`
/// changes after discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootCandidate {
    pub device: String,
    pub filesystem: String,
    pub os_kind: OsKind,
    pub os_label: String,
    pub menu_label: String,
}

impl BootCandidate {
    pub fn new(device: &str, filesystem: &str, os_kind: OsKind, os_label: &str) -> Self {
        Self {
            device: strip_dev(device).to_string(),
            filesystem: filesystem.to_string(),
            os_kind,
            os_label: os_label.to_string(),
            menu_label: sanitize_label(os_label),
        }
    }

    pub fn with_menu_label(mut self, label: &str) -> Self {
        self.menu_label = label.to_string();
        self
    }

    pub fn is_linux(&self) -> bool {
        self.os_kind == OsKind::Linux
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootloader {
    Lilo,
    Grub2,
}

impl Bootloader {
    /// Parse a command-line bootloader name; `_` means "not chosen yet".
    pub fn parse_choice(value: &str) -> Result<Option<Self>> {
        match value {
            "_" => Ok(None),
            other => other.parse().map(Some),
        }
    }
}

impl FromStr for Bootloader {
    type Err = BootSetupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lilo" => Ok(Self::Lilo),
            "grub2" | "grub" => Ok(Self::Grub2),
            other => Err(BootSetupError::ConfigError(format!(
                "unknown boot loader '{}' (expected lilo, grub2 or _)",
                other
            ))),
        }
    }
}

impl fmt::Display for Bootloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lilo => write!(f, "lilo"),
            Self::Grub2 => write!(f, "grub2"),
        }
    }
}

/// Outcome of checking a menu label against LiLo's restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelValidity {
    Ok,
    /// The label contains a space.
    Space,
    /// The label is longer than [`MAX_LABEL_LEN`] characters.
    Max,
    Empty,
    /// The label holds a character `lilo.conf` cannot carry verbatim:
    /// other whitespace, a control character, `"` or `#`.
    Character,
}

impl fmt::Display for LabelValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "valid"),
            Self::Space => write!(f, "a label must not contain spaces"),
            Self::Max => write!(
                f,
                "a label must be at most {} characters long",
                MAX_LABEL_LEN
            ),
            Self::Empty => write!(f, "a label must not be empty"),
            Self::Character => write!(
                f,
                "a label must not contain tabs, control characters, '\"' or '#'"
            ),
        }
    }
}

pub fn is_label_valid(label: &str) -> LabelValidity {
    if label.contains(' ') {
        LabelValidity::Space
    } else if label.chars().count() > MAX_LABEL_LEN {
        LabelValidity::Max
    } else if label.is_empty() {
        LabelValidity::Empty
    } else if label
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '"' || c == '#')
    {
        LabelValidity::Character
    } else {
        LabelValidity::Ok
    }
}

/// Derive a valid default menu label from an OS name.
pub fn sanitize_label(name: &str) -> String {
    name.chars()
        .filter(|c| !(c.is_whitespace() || c.is_control() || *c == '"' || *c == '#'))
        .take(MAX_LABEL_LEN)
        .collect()
}

pub fn strip_dev(device: &str) -> &str {
    device.strip_prefix("/dev/").unwrap_or(device)
}

/// Resolve a device name to its node path (`sda5` -> `/dev/sda5`)
pub fn device_path(device: &str) -> String {
    if device.starts_with('/') {
        device.to_string()
    } else {
        format!("/dev/{}", device)
    }
}

/// Strip the partition suffix from a partition name
/// (`sda5` -> `sda`, `nvme0n1p2` -> `nvme0n1`, `mmcblk0p1` -> `mmcblk0`)
pub fn parent_disk(partition: &str) -> String {
    let name = strip_dev(partition);
    let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if base.len() == name.len() {
        return name.to_string();
    }
    // Devices whose own name ends with a digit separate partitions with 'p'
    if let Some(disk) = base.strip_suffix('p') {
        if disk.ends_with(|c: char| c.is_ascii_digit()) {
            return disk.to_string();
        }
    }
    base.to_string()
}

/// How a [`Configuration`] is gathered.
#[derive(Debug, Clone, Default)]
pub struct GatherOptions {
    pub bootloader: Option<Bootloader>,
    pub target_partition: Option<String>,
    pub test_mode: bool,
    pub uses_fixture_data: bool,
}

/// Everything the installers need to know for one session.
#[derive(Debug, Clone)]
pub struct Configuration {
    bootloader: Option<Bootloader>,
    disks: Vec<Disk>,
    partitions: Vec<Partition>,
    boot_candidates: Vec<BootCandidate>,
    mbr_device: String,
    boot_partition: Option<String>,
    is_live: bool,
    test_mode: bool,
    uses_fixture_data: bool,
}

impl Configuration {
    /// Gather the current configuration from the inventory
    pub fn gather(inventory: &dyn SystemInventory, options: &GatherOptions) -> Result<Self> {
        info!("Gathering current configuration");

        let is_live = options.test_mode || inventory.is_live_environment();
        let disks = inventory.list_disks()?;
        let mut partitions = Vec::new();
        for disk in &disks {
            partitions.extend(inventory.list_partitions(&disk.device)?);
        }
        let boot_candidates = inventory.probe_operating_systems()?;

        let mut config = Self::from_parts(disks, partitions, boot_candidates)?;
        config.bootloader = options.bootloader;
        config.is_live = is_live;
        config.test_mode = options.test_mode;
        config.uses_fixture_data = options.uses_fixture_data;

        if let Some(target) = &options.target_partition {
            config.set_boot_partition(target)?;
        }

        debug!(
            "{} disks, {} partitions, {} boot candidates, mbr={}, boot={:?}",
            config.disks.len(),
            config.partitions.len(),
            config.boot_candidates.len(),
            config.mbr_device,
            config.boot_partition
        );
        Ok(config)
    }

    /// Build a configuration from already-gathered inventory data, deriving
    /// the default selection.
    pub fn from_parts(
        disks: Vec<Disk>,
        partitions: Vec<Partition>,
        boot_candidates: Vec<BootCandidate>,
    ) -> Result<Self> {
        let mbr_device = disks
            .first()
            .map(|d| d.device.clone())
            .ok_or_else(|| BootSetupError::ConfigError("No disk found".to_string()))?;

        let boot_partition = boot_candidates
            .iter()
            .find(|c| c.is_linux() && partitions.iter().any(|p| p.device == c.device))
            .map(|c| c.device.clone())
            .or_else(|| partitions.first().map(|p| p.device.clone()));

        Ok(Self {
            bootloader: None,
            disks,
            partitions,
            boot_candidates,
            mbr_device,
            boot_partition,
            is_live: false,
            test_mode: false,
            uses_fixture_data: false,
        })
    }

    pub fn bootloader(&self) -> Option<Bootloader> {
        self.bootloader
    }

    pub fn set_bootloader(&mut self, bootloader: Bootloader) {
        self.bootloader = Some(bootloader);
    }

    pub fn disks(&self) -> &[Disk] {
        &self.disks
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn boot_candidates(&self) -> &[BootCandidate] {
        &self.boot_candidates
    }

    pub fn mbr_device(&self) -> &str {
        &self.mbr_device
    }

    pub fn boot_partition(&self) -> Option<&str> {
        self.boot_partition.as_deref()
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    pub fn uses_fixture_data(&self) -> bool {
        self.uses_fixture_data
    }

    pub fn set_mbr_device(&mut self, device: &str) -> Result<()> {
        let device = strip_dev(device);
        if !self.disks.iter().any(|d| d.device == device) {
            return Err(BootSetupError::DeviceNotFound(device.to_string()));
        }
        self.mbr_device = device.to_string();
        Ok(())
    }

    /// Select the boot partition; the MBR device follows its parent disk.
    pub fn set_boot_partition(&mut self, partition: &str) -> Result<()> {
        let partition = strip_dev(partition);
        if !self.partitions.iter().any(|p| p.device == partition) {
            return Err(BootSetupError::DeviceNotFound(partition.to_string()));
        }
        self.boot_partition = Some(partition.to_string());

        let disk = parent_disk(partition);
        if self.disks.iter().any(|d| d.device == disk) {
            self.mbr_device = disk;
        }
        Ok(())
    }

    /// Change a candidate's menu label. Invalid labels leave the candidate
    /// untouched and report why.
    pub fn set_menu_label(&mut self, index: usize, label: &str) -> Result<LabelValidity> {
        let candidate = self.boot_candidates.get_mut(index).ok_or_else(|| {
            BootSetupError::ValidationError(format!("no boot candidate at index {}", index))
        })?;
        let validity = is_label_valid(label);
        if validity == LabelValidity::Ok {
            candidate.menu_label = label.to_string();
        }
        Ok(validity)
    }

    /// Move a candidate one position earlier. Returns false at the top.
    pub fn move_candidate_up(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.boot_candidates.len() {
            return false;
        }
        self.boot_candidates.swap(index - 1, index);
        true
    }

    /// Move a candidate one position later. Returns false at the bottom.
    pub fn move_candidate_down(&mut self, index: usize) -> bool {
        if index + 1 >= self.boot_candidates.len() {
            return false;
        }
        self.boot_candidates.swap(index, index + 1);
        true
    }
}
