//! Host layout configuration for the prestart hook.
//!
//! Every field has a default matching a stock driver installation, so the
//! configuration file is optional. A partial file overrides only the fields
//! it names.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{HookError, Result};

/// Root configuration for the hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HookConfig {
    /// Host directory holding device nodes.
    pub dev_root: PathBuf,
    /// Host procfs mount point.
    pub proc_root: PathBuf,
    /// Host name prefix of physical accelerators.
    pub device_prefix: String,
    /// Host name prefix of virtual accelerators.
    pub virtual_device_prefix: String,
    /// Name prefix the devices get inside the container.
    pub container_device_prefix: String,
    /// Control devices mounted regardless of the granted ids.
    pub control_devices: Vec<String>,
    /// Maximum number of device ids per invocation.
    pub max_devices: usize,
    /// Maximum number of entries per auxiliary mount list.
    pub max_mounts: usize,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            dev_root: PathBuf::from(constants::DEFAULT_DEV_ROOT),
            proc_root: PathBuf::from(constants::DEFAULT_PROC_ROOT),
            device_prefix: constants::DEVICE_PREFIX.to_owned(),
            virtual_device_prefix: constants::VIRTUAL_DEVICE_PREFIX.to_owned(),
            container_device_prefix: constants::DEVICE_PREFIX.to_owned(),
            control_devices: vec![
                constants::DAVINCI_MANAGER.to_owned(),
                constants::DEVMM_SVM.to_owned(),
                constants::HISI_HDC.to_owned(),
            ],
            max_devices: constants::DEFAULT_MAX_DEVICES,
            max_mounts: constants::DEFAULT_MAX_MOUNTS,
        }
    }
}

impl HookConfig {
    /// Loads the configuration from `path`, or returns the defaults when no
    /// path is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails [`HookConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| HookError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that limits and names are usable.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::Config`] for a zero or over-cap limit, a relative
    /// root directory, or a device name containing a path separator.
    pub fn validate(&self) -> Result<()> {
        if self.max_devices == 0 || self.max_devices > constants::MAX_DEVICE_NR {
            return Err(HookError::Config {
                message: format!(
                    "max_devices must be within 1..={}, got {}",
                    constants::MAX_DEVICE_NR,
                    self.max_devices
                ),
            });
        }
        if self.max_mounts > constants::MAX_MOUNT_NR {
            return Err(HookError::Config {
                message: format!(
                    "max_mounts must be at most {}, got {}",
                    constants::MAX_MOUNT_NR,
                    self.max_mounts
                ),
            });
        }
        for (name, root) in [("dev_root", &self.dev_root), ("proc_root", &self.proc_root)] {
            if !root.is_absolute() {
                return Err(HookError::Config {
                    message: format!("{name} must be absolute, got {}", root.display()),
                });
            }
        }
        let names = [
            &self.device_prefix,
            &self.virtual_device_prefix,
            &self.container_device_prefix,
        ]
        .into_iter()
        .chain(&self.control_devices);
        for name in names {
            if name.is_empty() || name.contains('/') || name == "." || name == ".." {
                return Err(HookError::Config {
                    message: format!("invalid device name {name:?}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_driver_layout() {
        let config = HookConfig::default();
        assert_eq!(config.dev_root, PathBuf::from("/dev"));
        assert_eq!(config.device_prefix, "davinci");
        assert_eq!(config.virtual_device_prefix, "vdavinci");
        assert_eq!(
            config.control_devices,
            vec!["davinci_manager", "devmm_svm", "hisi_hdc"]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_without_path_returns_defaults() {
        assert_eq!(HookConfig::load(None).expect("load"), HookConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hook.json");
        std::fs::write(&path, r#"{ "max_devices": 16, "dev_root": "/host/dev" }"#)
            .expect("write");
        let config = HookConfig::load(Some(&path)).expect("load");
        assert_eq!(config.max_devices, 16);
        assert_eq!(config.dev_root, PathBuf::from("/host/dev"));
        assert_eq!(config.max_mounts, constants::DEFAULT_MAX_MOUNTS);
    }

    #[test]
    fn malformed_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hook.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert!(matches!(
            HookConfig::load(Some(&path)),
            Err(HookError::Serialization { .. })
        ));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hook.json");
        std::fs::write(&path, r#"{ "max_device": 16 }"#).expect("write");
        assert!(HookConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = HookConfig::load(Some(&dir.path().join("absent.json"))).unwrap_err();
        assert!(matches!(err, HookError::Io { .. }));
    }

    #[test]
    fn limits_above_hard_cap_are_rejected() {
        let config = HookConfig {
            max_devices: constants::MAX_DEVICE_NR + 1,
            ..HookConfig::default()
        };
        assert!(matches!(config.validate(), Err(HookError::Config { .. })));
    }

    #[test]
    fn device_names_with_separators_are_rejected() {
        let config = HookConfig {
            control_devices: vec!["../etc".to_owned()],
            ..HookConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
