//! Source and destination paths for bind mounts.
//!
//! A destination is never trusted in its unresolved form. Device
//! destinations are resolved the way `realpath(3)` would resolve them, then
//! checked for containment under the resolved rootfs. Auxiliary destinations
//! go through a scoped join, so symlinks inside the rootfs are interpreted
//! relative to the rootfs.

use std::io;
use std::path::{Component, Path, PathBuf};

use accelhook_common::constants::CONTAINER_DEV_DIR;
use accelhook_common::error::{HookError, Result};

/// Host source and container destination of one device mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePaths {
    /// Device node on the host, `<dev_root>/<name>`.
    pub src: PathBuf,
    /// Mount destination under the rootfs.
    pub dst: PathBuf,
}

/// Rejects paths containing a `..` segment.
///
/// # Errors
///
/// Returns [`HookError::PathResolution`] if any component is `..`.
pub fn reject_traversal(path: &Path) -> Result<()> {
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(HookError::unresolvable(
            path,
            "parent directory traversal is not allowed",
        ));
    }
    Ok(())
}

/// Checks that `name` is a single path segment usable under `/dev`.
///
/// # Errors
///
/// Returns [`HookError::PathResolution`] for an empty name, `.`/`..`, or a
/// name containing `/`.
pub fn validate_device_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(HookError::unresolvable(name, "not a valid device name"));
    }
    Ok(())
}

/// Validates an auxiliary host path given on the command line.
///
/// # Errors
///
/// Returns [`HookError::PathResolution`] for a relative path or one that
/// contains `..`.
pub fn validate_host_path(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(HookError::unresolvable(path, "mount path must be absolute"));
    }
    reject_traversal(path)
}

/// Resolves symlinks in `path` like `realpath(3)`, tolerating a tail that
/// does not exist yet.
///
/// The longest existing prefix is canonicalized and the missing components
/// are appended unchanged. A dangling symlink is an error, since its target
/// cannot be checked.
///
/// # Errors
///
/// Returns [`HookError::PathResolution`] if canonicalization fails for any
/// reason other than a missing component.
pub fn resolve_lenient(path: &Path) -> Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if std::fs::symlink_metadata(path).is_ok() {
                return Err(HookError::unresolvable(path, "dangling symlink"));
            }
            match (path.parent(), path.file_name()) {
                (Some(parent), Some(name)) => Ok(resolve_lenient(parent)?.join(name)),
                _ => Ok(path.to_path_buf()),
            }
        }
        Err(e) => Err(HookError::unresolvable(
            path,
            format!("cannot canonicalize: {e}"),
        )),
    }
}

/// Checks that `path`, once resolved, stays inside `rootfs`.
///
/// # Errors
///
/// Returns [`HookError::PathResolution`] if either path cannot be resolved or
/// the resolved path escapes the resolved rootfs.
pub fn ensure_within_rootfs(rootfs: &Path, path: &Path) -> Result<()> {
    let root = resolve_lenient(rootfs)?;
    let resolved = resolve_lenient(path)?;
    if !resolved.starts_with(&root) {
        return Err(HookError::unresolvable(
            path,
            format!(
                "resolves to {} outside rootfs {}",
                resolved.display(),
                root.display()
            ),
        ));
    }
    Ok(())
}

/// Builds the source and destination of a device bind mount.
///
/// The source is always `<dev_root>/<src_name>`. With an explicit
/// `dst_name` the destination is `<rootfs>/dev/<dst_name>`; otherwise it is
/// the resolved form of `<rootfs>/dev/<src_name>`.
///
/// # Errors
///
/// Returns [`HookError::PathResolution`] for an invalid device name, a
/// resolution failure other than a missing file, or a destination that
/// escapes the rootfs.
pub fn resolve_device_paths(
    dev_root: &Path,
    rootfs: &Path,
    src_name: &str,
    dst_name: Option<&str>,
) -> Result<DevicePaths> {
    validate_device_name(src_name)?;
    reject_traversal(rootfs)?;
    let container_dev = rootfs.join(CONTAINER_DEV_DIR);

    let dst = match dst_name {
        Some(name) => {
            validate_device_name(name)?;
            container_dev.join(name)
        }
        None => resolve_lenient(&container_dev.join(src_name))?,
    };
    ensure_within_rootfs(rootfs, &dst)?;

    Ok(DevicePaths {
        src: dev_root.join(src_name),
        dst,
    })
}

/// Joins an absolute host path under the rootfs without leaving it.
///
/// # Errors
///
/// Returns [`HookError::PathResolution`] if `host_path` is relative,
/// contains `..`, or the scoped join fails.
pub fn scoped_destination(rootfs: &Path, host_path: &Path) -> Result<PathBuf> {
    validate_host_path(host_path)?;
    let relative = host_path.strip_prefix("/").unwrap_or(host_path);
    safe_path::scoped_join(rootfs, relative).map_err(|e| {
        tracing::error!(
            rootfs = %rootfs.display(),
            path = %host_path.display(),
            "failed to join under rootfs: {e}"
        );
        HookError::unresolvable(host_path, format!("cannot join under rootfs: {e}"))
    })
}
