//! Accelerator device planning and mounting.
//!
//! Turns a list of device ids into concrete device node names, then mounts
//! each node, the fixed control devices, and the optional driver files and
//! directories into the container rootfs.

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use accelhook_common::config::HookConfig;
use accelhook_common::constants::DEFAULT_DIR_MODE;
use accelhook_common::error::{HookError, Result};
use accelhook_common::types::{DeviceIdList, MountList};

use crate::filesystem::mount::{NodeKind, bind_mount, ensure_mount_point};
use crate::filesystem::path::{resolve_device_paths, scoped_destination};
use crate::syscall::Syscall;

/// Device naming on the host and inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLayout {
    device_prefix: String,
    virtual_device_prefix: String,
    container_device_prefix: String,
    control_devices: Vec<String>,
}

impl DeviceLayout {
    /// Extracts the naming scheme from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &HookConfig) -> Self {
        Self {
            device_prefix: config.device_prefix.clone(),
            virtual_device_prefix: config.virtual_device_prefix.clone(),
            container_device_prefix: config.container_device_prefix.clone(),
            control_devices: config.control_devices.clone(),
        }
    }

    /// Host name prefix of accelerator nodes in the given mode.
    #[must_use]
    pub fn host_prefix(&self, virtual_devices: bool) -> &str {
        if virtual_devices {
            &self.virtual_device_prefix
        } else {
            &self.device_prefix
        }
    }

    /// Control devices mounted for every container.
    #[must_use]
    pub fn control_devices(&self) -> &[String] {
        &self.control_devices
    }

    /// Host names of every device the container is granted: one accelerator
    /// per id, followed by the control devices.
    #[must_use]
    pub fn granted_device_names(&self, ids: &DeviceIdList, virtual_devices: bool) -> Vec<String> {
        let prefix = self.host_prefix(virtual_devices);
        ids.iter()
            .map(|id| id.device_name(prefix))
            .chain(self.control_devices.iter().cloned())
            .collect()
    }
}

impl Default for DeviceLayout {
    fn default() -> Self {
        Self::from_config(&HookConfig::default())
    }
}

/// Result of mounting a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// The node was bind-mounted.
    Mounted,
    /// Nothing needed or could be mounted.
    Skipped,
}

/// Counts of mounted and skipped entries for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountSummary {
    /// Entries that were bind-mounted.
    pub mounted: usize,
    /// Entries that were skipped.
    pub skipped: usize,
}

impl MountSummary {
    fn record(&mut self, outcome: MountOutcome) {
        match outcome {
            MountOutcome::Mounted => self.mounted += 1,
            MountOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Adds the counts of another batch.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            mounted: self.mounted + other.mounted,
            skipped: self.skipped + other.skipped,
        }
    }
}

/// What an auxiliary list holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuxKind {
    File,
    Dir,
}

impl AuxKind {
    const fn label(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Dir => "directory",
        }
    }
}

/// Mounts devices and driver paths into one container rootfs.
///
/// Must run inside the container's mount namespace.
pub struct DeviceMountPlanner<'a> {
    dev_root: &'a Path,
    rootfs: &'a Path,
    layout: &'a DeviceLayout,
    syscall: &'a dyn Syscall,
}

impl<'a> DeviceMountPlanner<'a> {
    /// Creates a planner for the container at `rootfs`, taking host device
    /// nodes from `dev_root`.
    #[must_use]
    pub fn new(
        dev_root: &'a Path,
        rootfs: &'a Path,
        layout: &'a DeviceLayout,
        syscall: &'a dyn Syscall,
    ) -> Self {
        Self {
            dev_root,
            rootfs,
            layout,
            syscall,
        }
    }

    /// Mounts one accelerator node per id.
    ///
    /// The host node `<prefix><id>` is mounted at `<rootfs>/dev/<name><id>`,
    /// where the container name is the same in both naming modes.
    ///
    /// # Errors
    ///
    /// Stops at the first device that fails and returns its error.
    pub fn plan_and_mount_devices(
        &self,
        ids: &DeviceIdList,
        virtual_devices: bool,
    ) -> Result<MountSummary> {
        let prefix = self.layout.host_prefix(virtual_devices);
        let mut summary = MountSummary::default();
        for id in ids {
            let src = id.device_name(prefix);
            let dst = id.device_name(&self.layout.container_device_prefix);
            summary.record(self.mount_device(&src, Some(&dst))?);
        }
        tracing::info!(
            mounted = summary.mounted,
            skipped = summary.skipped,
            virtual_devices,
            "accelerator devices mounted"
        );
        Ok(summary)
    }

    /// Mounts the control devices, independent of the granted ids.
    ///
    /// # Errors
    ///
    /// Stops at the first device that fails and returns its error.
    pub fn mount_fixed_control_devices(&self) -> Result<MountSummary> {
        let mut summary = MountSummary::default();
        for name in self.layout.control_devices() {
            summary.record(self.mount_device(name, None)?);
        }
        tracing::info!(
            mounted = summary.mounted,
            skipped = summary.skipped,
            "control devices mounted"
        );
        Ok(summary)
    }

    /// Mounts the host node `src_name` into the container's `/dev`.
    ///
    /// A destination that already exists as a character device is left
    /// alone: privileged containers get every host device already.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::Io`] if the host node cannot be inspected,
    /// [`HookError::Conflict`] if the destination exists as anything other
    /// than a character device, or any path or mount error.
    pub fn mount_device(&self, src_name: &str, dst_name: Option<&str>) -> Result<MountOutcome> {
        let paths = resolve_device_paths(self.dev_root, self.rootfs, src_name, dst_name)?;
        let src_meta = std::fs::metadata(&paths.src).map_err(|e| {
            tracing::error!(src = %paths.src.display(), error = %e, "cannot stat device");
            HookError::Io {
                path: paths.src.clone(),
                source: e,
            }
        })?;

        match std::fs::metadata(&paths.dst) {
            Ok(meta) => {
                let found = NodeKind::from_file_type(meta.file_type());
                if found == NodeKind::CharDevice {
                    tracing::info!(dst = %paths.dst.display(), "device already present, skipping");
                    return Ok(MountOutcome::Skipped);
                }
                return Err(HookError::Conflict {
                    path: paths.dst,
                    expected: NodeKind::CharDevice.describe(),
                    found: found.describe(),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(HookError::Io {
                    path: paths.dst,
                    source: e,
                });
            }
        }

        let _ = ensure_mount_point(&paths.dst, src_meta.mode())?;
        bind_mount(self.syscall, &paths.src, &paths.dst)?;
        Ok(MountOutcome::Mounted)
    }

    /// Mounts each listed host file at the same path inside the rootfs.
    ///
    /// Files absent from the host are skipped. A source that is a symlink
    /// is rejected unless `allow_link` is set.
    ///
    /// # Errors
    ///
    /// Stops at the first entry that fails and returns its error.
    pub fn mount_auxiliary_files(&self, files: &MountList, allow_link: bool) -> Result<MountSummary> {
        self.mount_auxiliary(files, allow_link, AuxKind::File)
    }

    /// Mounts each listed host directory at the same path inside the rootfs.
    ///
    /// Same skip and symlink rules as [`Self::mount_auxiliary_files`].
    ///
    /// # Errors
    ///
    /// Stops at the first entry that fails and returns its error.
    pub fn mount_auxiliary_dirs(&self, dirs: &MountList, allow_link: bool) -> Result<MountSummary> {
        self.mount_auxiliary(dirs, allow_link, AuxKind::Dir)
    }

    fn mount_auxiliary(
        &self,
        list: &MountList,
        allow_link: bool,
        kind: AuxKind,
    ) -> Result<MountSummary> {
        let mut summary = MountSummary::default();
        for src in list {
            summary.record(self.mount_auxiliary_entry(src, allow_link, kind)?);
        }
        tracing::info!(
            kind = kind.label(),
            mounted = summary.mounted,
            skipped = summary.skipped,
            "auxiliary paths mounted"
        );
        Ok(summary)
    }

    fn mount_auxiliary_entry(
        &self,
        src: &Path,
        allow_link: bool,
        kind: AuxKind,
    ) -> Result<MountOutcome> {
        let dst = scoped_destination(self.rootfs, src)?;

        let Ok(link_meta) = std::fs::symlink_metadata(src) else {
            tracing::debug!(src = %src.display(), "source absent, skipping");
            return Ok(MountOutcome::Skipped);
        };
        if link_meta.file_type().is_symlink() && !allow_link {
            return Err(HookError::unresolvable(
                src,
                "source is a symlink and links are not allowed",
            ));
        }
        let Ok(src_meta) = std::fs::metadata(src) else {
            tracing::debug!(src = %src.display(), "source link is dangling, skipping");
            return Ok(MountOutcome::Skipped);
        };

        let mount_mode = match kind {
            AuxKind::File => src_meta.mode(),
            AuxKind::Dir => libc::S_IFDIR | DEFAULT_DIR_MODE,
        };
        let _ = ensure_mount_point(&dst, mount_mode)?;
        bind_mount(self.syscall, src, &dst)?;
        Ok(MountOutcome::Mounted)
    }
}
