//! Unified error type for the accelhook workspace.
//!
//! Every component returns a [`HookError`] up to the prestart orchestrator.
//! Nothing in the workspace retries a failed syscall: a bad pid, a missing
//! path or a permission error does not resolve itself on a second attempt.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::NamespaceKind;

/// Which half of a read-only bind mount failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountPhase {
    /// The initial `MS_BIND` call.
    Bind,
    /// The follow-up `MS_REMOUNT | MS_RDONLY | MS_NOSUID` call.
    Remount,
}

impl fmt::Display for MountPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind => write!(f, "bind mount"),
            Self::Remount => write!(f, "read-only remount"),
        }
    }
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum HookError {
    /// Malformed or missing arguments, or a list exceeding its bound.
    #[error("invalid input: {message}")]
    InputValidation {
        /// Description of the rejected input.
        message: String,
    },

    /// A path contained traversal, escaped the rootfs, or could not be resolved.
    #[error("cannot resolve {}: {message}", .path.display())]
    PathResolution {
        /// Path that failed resolution.
        path: PathBuf,
        /// Why resolution failed.
        message: String,
    },

    /// The target process has no such namespace or cgroup (it may have exited).
    #[error("lookup for process {pid} failed: {message}")]
    ProcessLookup {
        /// Process id that was looked up.
        pid: i32,
        /// What could not be found.
        message: String,
    },

    /// Opening a namespace file or associating with it failed.
    #[error("failed to enter {kind} namespace {}: {source}", .path.display())]
    NamespaceEntry {
        /// Namespace kind being entered.
        kind: NamespaceKind,
        /// Namespace file.
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// One phase of a read-only bind mount failed.
    #[error("{phase} of {} onto {} failed: {source}", .src.display(), .dst.display())]
    Mount {
        /// Failing phase.
        phase: MountPhase,
        /// Mount source on the host.
        src: PathBuf,
        /// Mount destination under the rootfs.
        dst: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A mount destination already exists with the wrong file type.
    #[error("{} already exists as a {found}, expected a {expected}", .path.display())]
    Conflict {
        /// Conflicting destination.
        path: PathBuf,
        /// File type the mount source requires.
        expected: &'static str,
        /// File type found on disk.
        found: &'static str,
    },

    /// Writing a device-access rule to the cgroup failed.
    #[error("cannot write device cgroup rule to {}: {message}", .path.display())]
    CgroupWrite {
        /// Interface file or device node involved.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Returning to the original mount namespace failed.
    ///
    /// The hook process may now be running in the container's namespace.
    /// When the pipeline had already failed, that first failure is kept in
    /// `primary`.
    #[error(
        "failed to return to original namespace {}: {source}; process may be left in the container namespace{}",
        .path.display(),
        describe_primary(.primary.as_deref())
    )]
    Restore {
        /// Original namespace file the hook tried to re-enter.
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
        /// Pipeline failure that preceded the restore attempt.
        primary: Option<Box<HookError>>,
    },

    /// An I/O operation failed.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl HookError {
    /// Returns `true` when the hook could not return to its original namespace.
    #[must_use]
    pub const fn is_restore_failure(&self) -> bool {
        matches!(self, Self::Restore { .. })
    }

    /// Records `primary` as the failure that preceded a restore failure.
    ///
    /// Any other error is returned unchanged.
    #[must_use]
    pub fn after(self, primary: Self) -> Self {
        match self {
            Self::Restore { path, source, .. } => Self::Restore {
                path,
                source,
                primary: Some(Box::new(primary)),
            },
            other => other,
        }
    }

    /// Shorthand for an [`HookError::InputValidation`] error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InputValidation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`HookError::PathResolution`] error.
    pub fn unresolvable(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PathResolution {
            path: path.into(),
            message: message.into(),
        }
    }
}

fn describe_primary(primary: Option<&HookError>) -> String {
    primary.map_or_else(String::new, |err| format!(" (after: {err})"))
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, HookError>;
