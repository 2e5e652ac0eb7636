//! Validated hook invocation.

use std::path::PathBuf;

use accelhook_common::config::HookConfig;
use accelhook_common::error::{HookError, Result};
use accelhook_common::types::{DeviceIdList, MountList, RuntimeOptions, parse_device_ids};
use accelhook_core::filesystem::path::{reject_traversal, validate_host_path};

/// Arguments as received from the command line, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawHookArgs {
    /// Comma-separated device ids.
    pub devices: String,
    /// Container process id.
    pub pid: i32,
    /// Container rootfs.
    pub rootfs: PathBuf,
    /// Comma-separated runtime options.
    pub options: Option<String>,
    /// Host files to mount.
    pub mount_files: Vec<PathBuf>,
    /// Host directories to mount.
    pub mount_dirs: Vec<PathBuf>,
    /// Follow symlinked auxiliary sources.
    pub allow_link: bool,
}

/// A hook invocation whose every field passed validation.
#[derive(Debug, Clone)]
pub struct HookRequest {
    /// Granted accelerator ids, in the order given.
    pub devices: DeviceIdList,
    /// Container process id, always positive.
    pub pid: i32,
    /// Absolute container rootfs.
    pub rootfs: PathBuf,
    /// Parsed runtime options.
    pub options: RuntimeOptions,
    /// Host files to mount when not in no-driver mode.
    pub mount_files: MountList,
    /// Host directories to mount when not in no-driver mode.
    pub mount_dirs: MountList,
    /// Follow symlinked auxiliary sources.
    pub allow_link: bool,
}

impl HookRequest {
    /// Validates raw arguments against the limits in `config`.
    ///
    /// Nothing outside the arguments themselves is inspected, so a rejected
    /// request has no side effects.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::InputValidation`] for a bad pid, rootfs, device
    /// list, option string or oversized mount list, and
    /// [`HookError::PathResolution`] for a relative or traversing mount path.
    pub fn from_raw(raw: RawHookArgs, config: &HookConfig) -> Result<Self> {
        if raw.pid <= 0 {
            return Err(HookError::invalid_input(format!(
                "pid must be positive, got {}",
                raw.pid
            )));
        }
        if raw.rootfs.as_os_str().is_empty() || !raw.rootfs.is_absolute() {
            return Err(HookError::invalid_input(format!(
                "rootfs must be an absolute path, got {:?}",
                raw.rootfs
            )));
        }
        reject_traversal(&raw.rootfs)?;

        let devices = parse_device_ids(&raw.devices, config.max_devices)?;
        let options = raw
            .options
            .as_deref()
            .map(str::parse::<RuntimeOptions>)
            .transpose()?
            .unwrap_or_default();
        let mount_files = mount_list("mount files", raw.mount_files, config.max_mounts)?;
        let mount_dirs = mount_list("mount directories", raw.mount_dirs, config.max_mounts)?;

        tracing::debug!(
            pid = raw.pid,
            rootfs = %raw.rootfs.display(),
            devices = devices.len(),
            ?options,
            "request validated"
        );
        Ok(Self {
            devices,
            pid: raw.pid,
            rootfs: raw.rootfs,
            options,
            mount_files,
            mount_dirs,
            allow_link: raw.allow_link,
        })
    }
}

fn mount_list(label: &'static str, paths: Vec<PathBuf>, limit: usize) -> Result<MountList> {
    let list = MountList::try_from_iter(label, limit, paths)?;
    for path in &list {
        validate_host_path(path)?;
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawHookArgs {
        RawHookArgs {
            devices: "0,1".into(),
            pid: 4242,
            rootfs: PathBuf::from("/var/lib/containers/abc/rootfs"),
            ..RawHookArgs::default()
        }
    }

    #[test]
    fn valid_arguments_are_accepted() {
        let request = HookRequest::from_raw(
            RawHookArgs {
                options: Some("NODRV".into()),
                mount_files: vec![PathBuf::from("/usr/local/bin/npu-smi")],
                ..raw()
            },
            &HookConfig::default(),
        )
        .expect("request");
        assert_eq!(request.devices.len(), 2);
        assert!(request.options.no_driver);
        assert_eq!(request.mount_files.len(), 1);
        assert!(request.mount_dirs.is_empty());
    }

    #[test]
    fn non_numeric_device_is_rejected() {
        let err = HookRequest::from_raw(
            RawHookArgs {
                devices: "1,2,abc".into(),
                ..raw()
            },
            &HookConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, HookError::InputValidation { .. }));
    }

    #[test]
    fn non_positive_pid_is_rejected() {
        let err = HookRequest::from_raw(RawHookArgs { pid: 0, ..raw() }, &HookConfig::default())
            .unwrap_err();
        assert!(matches!(err, HookError::InputValidation { .. }));
    }

    #[test]
    fn relative_rootfs_is_rejected() {
        for rootfs in ["", "rootfs", "/var/../rootfs"] {
            assert!(
                HookRequest::from_raw(
                    RawHookArgs {
                        rootfs: PathBuf::from(rootfs),
                        ..raw()
                    },
                    &HookConfig::default(),
                )
                .is_err(),
                "{rootfs:?} accepted"
            );
        }
    }

    #[test]
    fn too_many_mount_dirs_are_rejected() {
        let dirs = (0..11).map(|i| PathBuf::from(format!("/opt/driver{i}"))).collect();
        let err = HookRequest::from_raw(
            RawHookArgs {
                mount_dirs: dirs,
                ..raw()
            },
            &HookConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("too many mount directories"));
    }

    #[test]
    fn configured_device_limit_applies() {
        let config = HookConfig {
            max_devices: 1,
            ..HookConfig::default()
        };
        assert!(HookRequest::from_raw(raw(), &config).is_err());
    }

    #[test]
    fn traversing_mount_file_is_rejected() {
        let err = HookRequest::from_raw(
            RawHookArgs {
                mount_files: vec![PathBuf::from("/usr/../etc/shadow")],
                ..raw()
            },
            &HookConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, HookError::PathResolution { .. }));
    }

    #[test]
    fn unknown_option_is_rejected() {
        assert!(
            HookRequest::from_raw(
                RawHookArgs {
                    options: Some("TURBO".into()),
                    ..raw()
                },
                &HookConfig::default(),
            )
            .is_err()
        );
    }
}
