//! Mount table lookups (`/proc/mounts` format)

use crate::utils::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fstype: String,
}

/// Decode the octal escapes the kernel uses for whitespace and backslashes
/// (`\040`, `\011`, `\012`, `\134`).
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fstype = fields.next().unwrap_or_default();
            Some(MountEntry {
                device: unescape(device),
                mount_point: PathBuf::from(unescape(mount_point)),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// Compare device paths literally, then through symlinks
/// (`/dev/disk/by-uuid/...` and friends).
fn same_device(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Handle on a mount table file, re-read on every query so it always
/// reflects the live state.
#[derive(Debug, Clone)]
pub struct MountTable {
    source: PathBuf,
}

impl MountTable {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn entries(&self) -> Result<Vec<MountEntry>> {
        let content = fs::read_to_string(&self.source)?;
        Ok(parse_mounts(&content))
    }

    /// First mount of `device`, if any
    pub fn find_device(&self, device: &str) -> Result<Option<MountEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|e| same_device(&e.device, device)))
    }

    /// The entry mounted at `path` (the last one wins when stacked)
    pub fn find_mount_point(&self, path: &Path) -> Result<Option<MountEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.mount_point == path)
            .last())
    }

    /// Mount points at or beneath `dir`, deepest first
    pub fn mounts_under(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut points: Vec<PathBuf> = self
            .entries()?
            .into_iter()
            .map(|e| e.mount_point)
            .filter(|mp| mp.starts_with(dir))
            .collect();
        points.sort_by_key(|mp| std::cmp::Reverse(mp.components().count()));
        points.dedup();
        Ok(points)
    }
}
