//! Settings file (`/etc/bootsetup/bootsetup.toml`)

use crate::utils::error::{BootSetupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Location read when no `--config` is given
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/bootsetup/bootsetup.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub commands: CommandSettings,
    pub grub: GrubSettings,
    pub lilo: LiloSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathSettings {
    /// Parent of the per-installer scratch directories
    pub scratch_root: PathBuf,
    /// Mount table in /proc/mounts format
    pub mount_table: PathBuf,
    /// Files whose joint presence marks a live environment
    pub live_markers: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandSettings {
    /// Limit for any external tool, in seconds (0 = unlimited)
    pub timeout_secs: u64,
    /// Editor for hand-editing the LiLo configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GrubSettings {
    pub grub_install: String,
    pub grub_mkconfig: String,
    pub update_grub: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LiloSettings {
    pub lilo: String,
    /// Menu timeout in tenths of a second
    pub timeout: u32,
    pub vga: String,
    pub lba32: bool,
    /// Kernel parameters appended to every Linux entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append: Option<String>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir(),
            mount_table: PathBuf::from("/proc/mounts"),
            live_markers: vec![
                PathBuf::from("/mnt/salt/salt-version"),
                PathBuf::from("/mnt/salt/tmp/distro_infos"),
            ],
        }
    }
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            editor: None,
        }
    }
}

impl Default for GrubSettings {
    fn default() -> Self {
        Self {
            grub_install: "/usr/sbin/grub-install".to_string(),
            grub_mkconfig: "/usr/sbin/grub-mkconfig".to_string(),
            update_grub: "/usr/sbin/update-grub".to_string(),
        }
    }
}

impl Default for LiloSettings {
    fn default() -> Self {
        Self {
            lilo: "/sbin/lilo".to_string(),
            timeout: 50,
            vga: "normal".to_string(),
            lba32: true,
            append: None,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load an explicitly requested file, or the default file if present,
    /// or built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                info!("Loading settings from {}", path.display());
                if !path.exists() {
                    return Err(BootSetupError::ConfigError(format!(
                        "settings file {} does not exist",
                        path.display()
                    )));
                }
                Self::from_file(path)
            }
            None if Path::new(DEFAULT_SETTINGS_PATH).exists() => {
                info!("Loading settings from {}", DEFAULT_SETTINGS_PATH);
                Self::from_file(Path::new(DEFAULT_SETTINGS_PATH))
            }
            None => {
                debug!("No settings file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.commands.timeout_secs)
    }

    /// Editor from the settings, then `$EDITOR`, then `vi`
    pub fn editor(&self) -> String {
        self.commands
            .editor
            .clone()
            .or_else(|| std::env::var("EDITOR").ok().filter(|e| !e.is_empty()))
            .unwrap_or_else(|| "vi".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [lilo]
            timeout = 100

            [commands]
            timeout_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(settings.lilo.timeout, 100);
        assert_eq!(settings.lilo.vga, "normal");
        assert_eq!(settings.command_timeout(), Duration::from_secs(30));
        assert_eq!(settings.grub, GrubSettings::default());
        assert_eq!(settings.paths.mount_table, PathBuf::from("/proc/mounts"));
    }

    #[test]
    fn settings_survive_toml_output() {
        let mut settings = Settings::default();
        settings.lilo.append = Some("quiet".to_string());
        let text = settings.to_toml().unwrap();
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/bootsetup.toml"))).unwrap_err();
        assert!(matches!(err, BootSetupError::ConfigError(_)));
    }

    #[test]
    fn configured_editor_wins() {
        let mut settings = Settings::default();
        settings.commands.editor = Some("nano".to_string());
        assert_eq!(settings.editor(), "nano");
    }
}
