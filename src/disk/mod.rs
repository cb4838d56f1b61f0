//! Disk detection and mount primitives

pub mod detection;
pub mod manager;
pub mod mounts;

pub use manager::{MountManager, MountSession};
pub use mounts::{MountEntry, MountTable};
