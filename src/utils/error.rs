//! Error types for BootSetup

use crate::config::LabelValidity;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootSetupError {
    #[error("Must be run as root")]
    NotRoot,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Mount error: {0}")]
    MountError(String),

    #[error("Device is not mounted: {0}")]
    NotMounted(String),

    #[error("Command failed: {command}\n{stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command timed out after {seconds}s: {command}")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("No Linux partition found among the boot candidates")]
    NoLinuxPartition,

    #[error("Grub2 cannot be installed on {device}: {reason}")]
    GrubInstall { device: String, reason: String },

    #[error("LiLo installation failed: {0}")]
    LiloInstall(String),

    #[error("No boot loader configuration at {}", .0.display())]
    MissingConfiguration(PathBuf),

    #[error("Invalid menu label '{label}': {validity}")]
    InvalidLabel {
        label: String,
        validity: LabelValidity,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User cancelled operation")]
    UserCancelled,

    #[error("Interrupted by signal")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Nix error: {0}")]
    Nix(#[from] nix::Error),
}

pub type Result<T> = std::result::Result<T, BootSetupError>;
