//! Everything resolved before the hook leaves its own namespace.

use std::path::PathBuf;

use accelhook_common::config::HookConfig;
use accelhook_common::error::Result;
use accelhook_common::types::{DeviceIdList, MountList, NamespaceKind, RuntimeOptions};
use accelhook_core::cgroup::CgroupConfigurator;
use accelhook_core::namespace::{NamespaceHandle, namespace_path, self_namespace_path};

use crate::request::HookRequest;

/// What to mount and restrict once inside the container namespace.
#[derive(Debug, Clone)]
pub struct MountPlan {
    /// Container rootfs.
    pub rootfs: PathBuf,
    /// Granted accelerator ids.
    pub devices: DeviceIdList,
    /// Devices cgroup directory of the container process.
    pub cgroup_path: PathBuf,
    /// Auxiliary host files.
    pub mount_files: MountList,
    /// Auxiliary host directories.
    pub mount_dirs: MountList,
    /// Runtime options.
    pub options: RuntimeOptions,
    /// Follow symlinked auxiliary sources.
    pub allow_link: bool,
}

/// State of one invocation after preparation.
///
/// Owns the descriptor on the hook's original mount namespace. Dropping the
/// value closes it.
#[derive(Debug)]
pub struct ParsedConfig {
    /// Container mount namespace file, `<proc>/<pid>/ns/mnt`.
    pub container_ns_path: PathBuf,
    /// Open handle on the hook's own mount namespace.
    pub original_ns: NamespaceHandle,
    /// Work to do inside the container namespace.
    pub plan: MountPlan,
}

impl ParsedConfig {
    /// Resolves the container namespace and cgroup, then opens the hook's
    /// own mount namespace.
    ///
    /// The original namespace is opened last, so a failure in any lookup
    /// leaves no descriptor behind.
    ///
    /// # Errors
    ///
    /// Returns [`accelhook_common::error::HookError::ProcessLookup`] if the
    /// container process or its devices cgroup cannot be found, or
    /// [`accelhook_common::error::HookError::NamespaceEntry`] if the hook's
    /// own namespace cannot be opened.
    pub fn prepare(request: HookRequest, config: &HookConfig) -> Result<Self> {
        let container_ns_path = namespace_path(&config.proc_root, request.pid, NamespaceKind::Mnt)?;
        let cgroup_path = CgroupConfigurator::new(&config.dev_root, &config.proc_root)
            .cgroup_path(request.pid)?;
        let self_ns_path = self_namespace_path(&config.proc_root, NamespaceKind::Mnt)?;
        let original_ns = NamespaceHandle::open(&self_ns_path, NamespaceKind::Mnt)?;

        tracing::info!(
            pid = request.pid,
            container_ns = %container_ns_path.display(),
            cgroup = %cgroup_path.display(),
            "prepared hook configuration"
        );
        Ok(Self {
            container_ns_path,
            original_ns,
            plan: MountPlan {
                rootfs: request.rootfs,
                devices: request.devices,
                cgroup_path,
                mount_files: request.mount_files,
                mount_dirs: request.mount_dirs,
                options: request.options,
                allow_link: request.allow_link,
            },
        })
    }
}
