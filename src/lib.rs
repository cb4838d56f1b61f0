//! BootSetup library - LiLo and Grub2 installation

pub mod cleanup;
pub mod config;
pub mod configure;
pub mod disk;
pub mod frontend;
pub mod install;
pub mod inventory;
pub mod utils;

pub use config::{Bootloader, Configuration, Settings};
pub use install::{GrubInstaller, LiloInstaller};
pub use utils::error::BootSetupError;
