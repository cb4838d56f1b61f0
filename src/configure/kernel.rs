//! Kernel and initrd detection in a `/boot` directory

use crate::utils::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use tracing::debug;

static KERNEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:vmlinuz|bzImage|kernel)(?:-(?P<ver>.+))?$").expect("valid kernel regex")
});

static INITRD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:initrd|initramfs)(?:\.img)?(?:-(?P<ver>.+?))?(?:\.img|\.gz)?$")
        .expect("valid initrd regex")
});

/// Kernel and initrd file names found in a boot directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImages {
    pub kernel: String,
    pub initrd: Option<String>,
}

impl BootImages {
    /// What is assumed when a partition shows no kernel at all
    pub fn fallback() -> Self {
        Self {
            kernel: "vmlinuz".to_string(),
            initrd: None,
        }
    }
}

/// Compare strings treating digit runs as numbers (`5.9` < `5.10`)
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();
    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut left = String::new();
                while let Some(c) = a.next_if(char::is_ascii_digit) {
                    left.push(c);
                }
                let mut right = String::new();
                while let Some(c) = b.next_if(char::is_ascii_digit) {
                    right.push(c);
                }
                let left = left.trim_start_matches('0');
                let right = right.trim_start_matches('0');
                let ord = left.len().cmp(&right.len()).then_with(|| left.cmp(right));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a.next();
                b.next();
            }
        }
    }
}

/// Pick the kernel and matching initrd among file names.
///
/// An unversioned kernel (usually a symlink to the current one) wins,
/// otherwise the highest version. The initrd must carry the kernel's
/// version; an unversioned initrd is the fallback.
pub fn select_boot_images<S: AsRef<str>>(names: &[S]) -> Option<BootImages> {
    let kernels: Vec<(&str, Option<&str>)> = names
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            KERNEL_RE
                .captures(name)
                .map(|caps| (name, caps.name("ver").map(|m| m.as_str())))
        })
        .collect();

    let (kernel, version) = kernels
        .iter()
        .find(|(_, ver)| ver.is_none())
        .or_else(|| {
            kernels
                .iter()
                .max_by(|(_, a), (_, b)| natural_cmp(a.unwrap_or(""), b.unwrap_or("")))
        })
        .copied()?;

    let initrds: Vec<(&str, Option<&str>)> = names
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            INITRD_RE
                .captures(name)
                .map(|caps| (name, caps.name("ver").map(|m| m.as_str())))
        })
        .collect();

    let initrd = initrds
        .iter()
        .find(|(_, ver)| version.is_some() && *ver == version)
        .or_else(|| initrds.iter().find(|(_, ver)| ver.is_none()))
        .map(|(name, _)| name.to_string());

    Some(BootImages {
        kernel: kernel.to_string(),
        initrd,
    })
}

/// Scan `boot_dir`. `None` when it is missing or holds no kernel.
pub fn find_boot_images(boot_dir: &Path) -> Result<Option<BootImages>> {
    if !boot_dir.is_dir() {
        debug!("{} does not exist", boot_dir.display());
        return Ok(None);
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(boot_dir)? {
        let entry = entry?;
        // is_file follows symlinks, dangling ones are skipped
        if entry.path().is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();

    let images = select_boot_images(&names);
    debug!("Boot images in {}: {:?}", boot_dir.display(), images);
    Ok(images)
}
