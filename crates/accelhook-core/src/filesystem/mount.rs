//! Read-only bind mounts and mount-point creation.

use std::fs::{DirBuilder, FileType, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, OpenOptionsExt};
use std::path::Path;

use nix::mount::MsFlags;

use accelhook_common::constants::DEFAULT_DIR_MODE;
use accelhook_common::error::{HookError, MountPhase, Result};

use crate::syscall::Syscall;

/// File type of a mount source or destination, as far as mounting cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Character device node.
    CharDevice,
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Anything else, including symlinks and block devices.
    Other,
}

impl NodeKind {
    /// Classifies a raw `st_mode` value.
    #[must_use]
    pub const fn from_mode(mode: u32) -> Self {
        match mode & libc::S_IFMT {
            libc::S_IFCHR => Self::CharDevice,
            libc::S_IFREG => Self::File,
            libc::S_IFDIR => Self::Directory,
            _ => Self::Other,
        }
    }

    /// Classifies a [`FileType`] obtained without following symlinks.
    #[must_use]
    pub fn from_file_type(file_type: FileType) -> Self {
        if file_type.is_char_device() {
            Self::CharDevice
        } else if file_type.is_file() {
            Self::File
        } else if file_type.is_dir() {
            Self::Directory
        } else {
            Self::Other
        }
    }

    /// Human-readable name used in conflict errors.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::CharDevice => "character device",
            Self::File => "regular file",
            Self::Directory => "directory",
            Self::Other => "special file",
        }
    }

    /// Whether an existing destination of kind `found` can receive a bind
    /// mount of a source of this kind.
    const fn accepts(self, found: Self) -> bool {
        matches!(
            (self, found),
            (Self::CharDevice, Self::CharDevice | Self::File)
                | (Self::File, Self::File)
                | (Self::Directory, Self::Directory)
        )
    }
}

/// Outcome of [`ensure_mount_point`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountPoint {
    /// The mount point was created.
    Created,
    /// A compatible node was already there.
    Existing,
}

/// Bind-mounts `src` onto `dst`, then remounts `dst` read-only and no-suid.
///
/// Nothing is undone if the remount fails: the bind stays in place.
///
/// # Errors
///
/// Returns [`HookError::Mount`] naming the phase that failed.
pub fn bind_mount(syscall: &dyn Syscall, src: &Path, dst: &Path) -> Result<()> {
    tracing::debug!(src = %src.display(), dst = %dst.display(), "bind mounting");
    syscall
        .mount(Some(src), dst, None, MsFlags::MS_BIND, None)
        .map_err(|errno| mount_error(MountPhase::Bind, src, dst, errno))?;
    let remount = MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_NOSUID;
    syscall
        .mount(None, dst, None, remount, None)
        .map_err(|errno| mount_error(MountPhase::Remount, src, dst, errno))?;
    Ok(())
}

fn mount_error(phase: MountPhase, src: &Path, dst: &Path, errno: nix::errno::Errno) -> HookError {
    tracing::error!(
        %phase,
        src = %src.display(),
        dst = %dst.display(),
        %errno,
        "mount failed"
    );
    HookError::Mount {
        phase,
        src: src.to_path_buf(),
        dst: dst.to_path_buf(),
        source: io::Error::from(errno),
    }
}

/// Makes sure `path` exists with a type suitable for a bind mount of a
/// source whose `st_mode` is `source_mode`.
///
/// Directories are created with their parents. For any other source an
/// empty regular file is created, after creating its parent directories,
/// with the permission bits of the source. The final component is never
/// followed if it is a symlink.
///
/// # Errors
///
/// Returns [`HookError::Conflict`] if `path` exists with an incompatible
/// type, or [`HookError::Io`] if it cannot be inspected or created.
pub fn ensure_mount_point(path: &Path, source_mode: u32) -> Result<MountPoint> {
    let expected = NodeKind::from_mode(source_mode);
    match std::fs::symlink_metadata(path) {
        Ok(meta) => {
            let found = NodeKind::from_file_type(meta.file_type());
            if expected.accepts(found) {
                return Ok(MountPoint::Existing);
            }
            return Err(HookError::Conflict {
                path: path.to_path_buf(),
                expected: expected.describe(),
                found: found.describe(),
            });
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_error(path, e)),
    }

    if expected == NodeKind::Directory {
        create_dirs(path)?;
    } else {
        if let Some(parent) = path.parent() {
            create_dirs(parent)?;
        }
        let _file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(source_mode & 0o777)
            .custom_flags(libc::O_NOFOLLOW)
            .open(path)
            .map_err(|e| io_error(path, e))?;
    }
    tracing::debug!(path = %path.display(), kind = expected.describe(), "created mount point");
    Ok(MountPoint::Created)
}

fn create_dirs(path: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(DEFAULT_DIR_MODE)
        .create(path)
        .map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, source: io::Error) -> HookError {
    HookError::Io {
        path: path.to_path_buf(),
        source,
    }
}
