//! System inventory: what disks, partitions and operating systems exist

mod fixture;
mod host;

pub use fixture::FixtureInventory;
pub use host::{parse_os_prober, parse_os_release_name, HostInventory};

use crate::config::{BootCandidate, Disk, Partition};
use crate::utils::error::Result;

/// Source of the data a [`crate::config::Configuration`] is gathered from.
pub trait SystemInventory {
    fn list_disks(&self) -> Result<Vec<Disk>>;

    fn list_partitions(&self, disk: &str) -> Result<Vec<Partition>>;

    /// Bootable operating systems, in menu order
    fn probe_operating_systems(&self) -> Result<Vec<BootCandidate>>;

    fn is_live_environment(&self) -> bool;
}
