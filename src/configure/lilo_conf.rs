//! `lilo.conf` generation

use crate::config::{device_path, LiloSettings};
use std::fmt::Write;

/// One boot menu stanza
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiloEntry {
    Linux {
        /// Kernel path as seen from the boot partition's root
        image: String,
        initrd: Option<String>,
        /// Root device (`/dev/sda5`)
        root: String,
        label: String,
    },
    /// Chain-loaded system (Windows, another boot loader)
    Other { device: String, label: String },
}

impl LiloEntry {
    pub fn label(&self) -> &str {
        match self {
            Self::Linux { label, .. } | Self::Other { label, .. } => label,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiloConfig {
    boot_device: String,
    timeout: u32,
    vga: String,
    lba32: bool,
    append: Option<String>,
    entries: Vec<LiloEntry>,
}

impl LiloConfig {
    pub fn new(mbr_device: &str, settings: &LiloSettings) -> Self {
        Self {
            boot_device: device_path(mbr_device),
            timeout: settings.timeout,
            vga: settings.vga.clone(),
            lba32: settings.lba32,
            append: settings.append.clone().filter(|a| !a.trim().is_empty()),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: LiloEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LiloEntry] {
        &self.entries
    }

    /// The first Linux entry boots by default
    pub fn default_label(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| matches!(e, LiloEntry::Linux { .. }))
            .map(LiloEntry::label)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "# LILO configuration file")?;
        writeln!(out, "# Generated by bootsetup")?;
        writeln!(out, "#")?;
        writeln!(out, "# Global LILO settings")?;
        if self.lba32 {
            writeln!(out, "lba32")?;
        }
        writeln!(out, "boot = {}", self.boot_device)?;
        writeln!(out, "compact")?;
        writeln!(out, "prompt")?;
        writeln!(out, "timeout = {}", self.timeout)?;
        writeln!(out, "vga = {}", self.vga)?;
        if let Some(append) = &self.append {
            writeln!(out, "append = \"{}\"", append)?;
        }
        if let Some(label) = self.default_label() {
            writeln!(out, "default = {}", label)?;
        }

        for entry in &self.entries {
            writeln!(out)?;
            match entry {
                LiloEntry::Linux {
                    image,
                    initrd,
                    root,
                    label,
                } => {
                    writeln!(out, "# Linux bootable partition config begins")?;
                    writeln!(out, "image = {}", image)?;
                    if let Some(initrd) = initrd {
                        writeln!(out, "  initrd = {}", initrd)?;
                    }
                    writeln!(out, "  root = {}", root)?;
                    writeln!(out, "  label = {}", label)?;
                    writeln!(out, "  read-only")?;
                    writeln!(out, "# Linux bootable partition config ends")?;
                }
                LiloEntry::Other { device, label } => {
                    writeln!(out, "# Other bootable partition config begins")?;
                    writeln!(out, "other = {}", device)?;
                    writeln!(out, "  label = {}", label)?;
                    writeln!(out, "# Other bootable partition config ends")?;
                }
            }
        }
        Ok(())
    }
}

/// Menu labels declared in a `lilo.conf`, in file order
pub fn parse_labels(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| key.trim() == "label")
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .collect()
}
