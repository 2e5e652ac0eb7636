//! Wrapper around the syscalls that change kernel state.
//!
//! The hook only needs two of them: `mount(2)` and `setns(2)`. Reads such as
//! `stat` and `open` stay on `std::fs` and are tested against temporary
//! directory trees.

pub mod linux;
#[cfg(any(test, feature = "test-utils"))]
pub mod test;

use std::any::Any;
use std::os::fd::BorrowedFd;
use std::path::Path;

use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sched::CloneFlags;

pub use linux::LinuxSyscall;

/// Kernel operations required by the mount pipeline.
pub trait Syscall {
    /// Returns `self` for downcasting in tests.
    fn as_any(&self) -> &dyn Any;

    /// Associates the calling thread with the namespace behind `fd`.
    ///
    /// # Errors
    ///
    /// Returns the errno reported by `setns(2)`.
    fn set_ns(&self, fd: BorrowedFd<'_>, nstype: CloneFlags) -> Result<(), Errno>;

    /// Calls `mount(2)`.
    ///
    /// # Errors
    ///
    /// Returns the errno reported by `mount(2)`.
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), Errno>;
}
