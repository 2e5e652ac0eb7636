//! Recording syscall double for unit and integration tests.
//!
//! Calls are recorded in order, including the ones made to fail. A failure
//! can be injected at the n-th call (zero-based) of either syscall.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sched::CloneFlags;

use super::Syscall;

/// Arguments of one recorded `mount(2)` call.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MountArgs {
    /// Mount source.
    pub source: Option<PathBuf>,
    /// Mount target.
    pub target: PathBuf,
    /// Filesystem type.
    pub fstype: Option<String>,
    /// Mount flags.
    pub flags: MsFlags,
    /// Filesystem-specific data.
    pub data: Option<String>,
}

impl MountArgs {
    /// Returns `true` for the initial bind call of a bind mount.
    #[must_use]
    pub fn is_bind(&self) -> bool {
        self.flags.contains(MsFlags::MS_BIND) && !self.flags.contains(MsFlags::MS_REMOUNT)
    }
}

/// Arguments of one recorded `setns(2)` call.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SetNsArgs {
    /// Raw descriptor passed in.
    pub fd: RawFd,
    /// What `/proc/self/fd/<fd>` pointed at when the call was made.
    pub target: Option<PathBuf>,
    /// Namespace type.
    pub nstype: CloneFlags,
}

/// Syscall double that records arguments and never touches the kernel.
#[derive(Default)]
pub struct TestHelperSyscall {
    mount_args: RefCell<Vec<MountArgs>>,
    set_ns_args: RefCell<Vec<SetNsArgs>>,
    mount_failure: Cell<Option<(usize, Errno)>>,
    set_ns_failure: Cell<Option<(usize, Errno)>>,
}

impl TestHelperSyscall {
    /// Makes the `nth` mount call (zero-based) fail with `errno`.
    pub fn fail_mount_at(&self, nth: usize, errno: Errno) {
        self.mount_failure.set(Some((nth, errno)));
    }

    /// Makes the `nth` setns call (zero-based) fail with `errno`.
    pub fn fail_set_ns_at(&self, nth: usize, errno: Errno) {
        self.set_ns_failure.set(Some((nth, errno)));
    }

    /// Returns every recorded mount call.
    pub fn get_mount_args(&self) -> Vec<MountArgs> {
        self.mount_args.borrow().clone()
    }

    /// Returns every recorded setns call.
    pub fn get_set_ns_args(&self) -> Vec<SetNsArgs> {
        self.set_ns_args.borrow().clone()
    }

    /// Returns the number of initial bind calls, one per bind-mount attempt.
    pub fn bind_attempts(&self) -> usize {
        self.mount_args.borrow().iter().filter(|m| m.is_bind()).count()
    }
}

fn injected(failure: Option<(usize, Errno)>, call: usize) -> Result<(), Errno> {
    match failure {
        Some((nth, errno)) if nth == call => Err(errno),
        _ => Ok(()),
    }
}

impl Syscall for TestHelperSyscall {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_ns(&self, fd: BorrowedFd<'_>, nstype: CloneFlags) -> Result<(), Errno> {
        let raw = fd.as_raw_fd();
        let mut calls = self.set_ns_args.borrow_mut();
        let call = calls.len();
        calls.push(SetNsArgs {
            fd: raw,
            target: std::fs::read_link(format!("/proc/self/fd/{raw}")).ok(),
            nstype,
        });
        injected(self.set_ns_failure.get(), call)
    }

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), Errno> {
        let mut calls = self.mount_args.borrow_mut();
        let call = calls.len();
        calls.push(MountArgs {
            source: source.map(Path::to_path_buf),
            target: target.to_path_buf(),
            fstype: fstype.map(str::to_owned),
            flags,
            data: data.map(str::to_owned),
        });
        injected(self.mount_failure.get(), call)
    }
}

#[cfg(test)]
mod tests {
    use std::os::fd::AsFd;

    use super::*;

    #[test]
    fn records_calls_and_injects_failure_at_nth_call() {
        let syscall = TestHelperSyscall::default();
        syscall.fail_mount_at(1, Errno::EPERM);

        let first = syscall.mount(
            Some(Path::new("/dev/davinci0")),
            Path::new("/rootfs/dev/davinci0"),
            None,
            MsFlags::MS_BIND,
            None,
        );
        let second = syscall.mount(
            None,
            Path::new("/rootfs/dev/davinci0"),
            None,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT,
            None,
        );

        assert!(first.is_ok());
        assert_eq!(second, Err(Errno::EPERM));
        assert_eq!(syscall.get_mount_args().len(), 2);
        assert_eq!(syscall.bind_attempts(), 1);
    }

    #[test]
    fn set_ns_records_what_the_fd_points_at() {
        let syscall = TestHelperSyscall::default();
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        syscall
            .set_ns(file.as_file().as_fd(), CloneFlags::CLONE_NEWNS)
            .expect("set_ns");

        let args = syscall.get_set_ns_args();
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].target.as_deref(), Some(file.path()));
    }
}
