//! Mount namespace switching.
//!
//! The hook enters the container's mount namespace through
//! `/proc/<pid>/ns/mnt` and later returns through a descriptor on its own
//! namespace opened beforehand. That descriptor lives in a
//! [`NamespaceHandle`], which owns it and closes it exactly once when
//! dropped. [`NamespaceGuard`] holds the handle for the time the hook spends
//! in the container namespace and switches back when restored or dropped.

use std::fs::File;
use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};

use nix::sched::CloneFlags;

use accelhook_common::error::{HookError, Result};
use accelhook_common::types::NamespaceKind;

use crate::syscall::Syscall;

/// Maps a namespace kind to the `setns(2)` type argument.
#[must_use]
pub const fn clone_flag(kind: NamespaceKind) -> CloneFlags {
    match kind {
        NamespaceKind::Mnt => CloneFlags::CLONE_NEWNS,
    }
}

/// Returns `<proc_root>/<pid>/ns/<kind>` after checking that it exists.
///
/// # Errors
///
/// Returns [`HookError::ProcessLookup`] if `pid` is not positive or the
/// namespace file cannot be inspected, typically because the process exited.
pub fn namespace_path(proc_root: &Path, pid: i32, kind: NamespaceKind) -> Result<PathBuf> {
    if pid <= 0 {
        return Err(HookError::ProcessLookup {
            pid,
            message: "pid must be positive".into(),
        });
    }
    let path = proc_root
        .join(pid.to_string())
        .join("ns")
        .join(kind.proc_name());
    check_exists(&path, pid)?;
    Ok(path)
}

/// Returns `<proc_root>/self/ns/<kind>` for the calling process.
///
/// # Errors
///
/// Returns [`HookError::ProcessLookup`] if the namespace file cannot be
/// inspected.
pub fn self_namespace_path(proc_root: &Path, kind: NamespaceKind) -> Result<PathBuf> {
    let path = proc_root.join("self").join("ns").join(kind.proc_name());
    check_exists(&path, nix::unistd::getpid().as_raw())?;
    Ok(path)
}

fn check_exists(path: &Path, pid: i32) -> Result<()> {
    std::fs::metadata(path)
        .map(|_| ())
        .map_err(|e| HookError::ProcessLookup {
            pid,
            message: format!("cannot stat {}: {e}", path.display()),
        })
}

/// Open descriptor on a namespace file.
///
/// The descriptor is closed when the handle is dropped.
#[derive(Debug)]
pub struct NamespaceHandle {
    fd: OwnedFd,
    path: PathBuf,
    kind: NamespaceKind,
}

impl NamespaceHandle {
    /// Opens `path` read-only.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::NamespaceEntry`] if the file cannot be opened.
    pub fn open(path: &Path, kind: NamespaceKind) -> Result<Self> {
        let file = File::open(path).map_err(|e| entry_error(path, kind, e))?;
        tracing::debug!(path = %path.display(), %kind, "opened namespace file");
        Ok(Self {
            fd: OwnedFd::from(file),
            path: path.to_path_buf(),
            kind,
        })
    }

    /// Associates the calling thread with this namespace.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::NamespaceEntry`] if `setns(2)` fails.
    pub fn enter(&self, syscall: &dyn Syscall) -> Result<()> {
        syscall
            .set_ns(self.fd.as_fd(), clone_flag(self.kind))
            .map_err(|errno| entry_error(&self.path, self.kind, io::Error::from(errno)))?;
        tracing::debug!(path = %self.path.display(), kind = %self.kind, "entered namespace");
        Ok(())
    }

    /// Namespace file this handle was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Namespace kind.
    #[must_use]
    pub const fn kind(&self) -> NamespaceKind {
        self.kind
    }
}

impl AsFd for NamespaceHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

fn entry_error(path: &Path, kind: NamespaceKind, source: io::Error) -> HookError {
    tracing::error!(path = %path.display(), %kind, error = %source, "namespace entry failed");
    HookError::NamespaceEntry {
        kind,
        path: path.to_path_buf(),
        source,
    }
}

/// Opens the namespace at `path` and associates the calling thread with it.
///
/// The returned handle is no longer needed once the switch has happened;
/// dropping it closes the descriptor without affecting the namespace.
///
/// # Errors
///
/// Returns [`HookError::NamespaceEntry`] if the open or the `setns(2)` call
/// fails.
pub fn enter_namespace(
    path: &Path,
    kind: NamespaceKind,
    syscall: &dyn Syscall,
) -> Result<NamespaceHandle> {
    let handle = NamespaceHandle::open(path, kind)?;
    handle.enter(syscall)?;
    Ok(handle)
}

/// Keeps the hook's original namespace while it works in another one.
///
/// Created by [`NamespaceGuard::enter`], which switches into the target
/// namespace. [`NamespaceGuard::restore`] switches back and reports the
/// outcome. A guard dropped without being restored switches back on its
/// own and logs a failure, since `Drop` cannot return one. Either way the
/// original descriptor is closed once, after the switch back was attempted.
pub struct NamespaceGuard<'s> {
    original: Option<NamespaceHandle>,
    syscall: &'s dyn Syscall,
}

impl<'s> NamespaceGuard<'s> {
    /// Enters the namespace at `target`, holding on to `original`.
    ///
    /// On failure the thread has not left `original`, so the handle is
    /// dropped without any restore attempt.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::NamespaceEntry`] if `target` cannot be opened or
    /// entered.
    pub fn enter(
        original: NamespaceHandle,
        target: &Path,
        syscall: &'s dyn Syscall,
    ) -> Result<Self> {
        let _ = enter_namespace(target, original.kind(), syscall)?;
        tracing::info!(namespace = %target.display(), "entered target namespace");
        Ok(Self {
            original: Some(original),
            syscall,
        })
    }

    /// Path of the namespace the guard returns to.
    #[must_use]
    pub fn original_path(&self) -> Option<&Path> {
        self.original.as_ref().map(NamespaceHandle::path)
    }

    /// Switches back to the original namespace and closes its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::Restore`] if `setns(2)` on the original
    /// descriptor fails. The descriptor is closed regardless.
    pub fn restore(mut self) -> Result<()> {
        match self.original.take() {
            Some(original) => switch_back(&original, self.syscall),
            None => Ok(()),
        }
    }
}

impl Drop for NamespaceGuard<'_> {
    fn drop(&mut self) {
        if let Some(original) = self.original.take() {
            tracing::warn!("namespace guard dropped without restore, switching back");
            if let Err(e) = switch_back(&original, self.syscall) {
                tracing::error!(error = %e, "could not return to the original namespace");
            }
        }
    }
}

fn switch_back(original: &NamespaceHandle, syscall: &dyn Syscall) -> Result<()> {
    syscall
        .set_ns(original.as_fd(), clone_flag(original.kind()))
        .map_err(|errno| {
            tracing::error!(
                path = %original.path().display(),
                %errno,
                "failed to return to original namespace, process may be left in the container namespace"
            );
            HookError::Restore {
                path: original.path().to_path_buf(),
                source: io::Error::from(errno),
                primary: None,
            }
        })?;
    tracing::info!(namespace = %original.path().display(), "returned to original namespace");
    Ok(())
}
