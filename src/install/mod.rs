//! Boot loader installers

pub mod chroot;
mod grub;
mod lilo;

pub use chroot::{release_session, ChrootEnvironment};
pub use grub::GrubInstaller;
pub use lilo::{LiloInstaller, NESTED_MOUNT_ROOT};
