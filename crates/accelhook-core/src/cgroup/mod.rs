//! Device cgroup (v1) configuration.
//!
//! Locates the `devices` controller hierarchy of the container process and
//! appends one `devices.allow` rule per accelerator and control device, so
//! the container can open exactly the nodes that were mounted into it.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use procfs::process::Process;

use accelhook_common::constants::{DEVICES_ALLOW_FILE, DEVICES_CONTROLLER};
use accelhook_common::error::{HookError, Result};

use crate::filesystem::path::reject_traversal;

/// Filesystem type of cgroup v1 hierarchies in mountinfo.
const CGROUP_FS_TYPE: &str = "cgroup";

/// Access rule for one character device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRule {
    /// Device major number.
    pub major: u64,
    /// Device minor number.
    pub minor: u64,
}

impl DeviceRule {
    /// Builds the rule for the character device at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::CgroupWrite`] if the node cannot be inspected or
    /// is not a character device.
    pub fn for_device(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|e| HookError::CgroupWrite {
            path: path.to_path_buf(),
            message: format!("cannot stat device: {e}"),
        })?;
        if !meta.file_type().is_char_device() {
            return Err(HookError::CgroupWrite {
                path: path.to_path_buf(),
                message: "not a character device".into(),
            });
        }
        let rdev = meta.rdev();
        Ok(Self {
            major: nix::sys::stat::major(rdev),
            minor: nix::sys::stat::minor(rdev),
        })
    }
}

impl fmt::Display for DeviceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c {}:{} rw", self.major, self.minor)
    }
}

/// Resolves device cgroups and writes their access rules.
#[derive(Debug, Clone)]
pub struct CgroupConfigurator {
    dev_root: PathBuf,
    proc_root: PathBuf,
}

impl CgroupConfigurator {
    /// Creates a configurator reading device nodes under `dev_root` and
    /// process information under `proc_root`.
    #[must_use]
    pub fn new(dev_root: impl Into<PathBuf>, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            dev_root: dev_root.into(),
            proc_root: proc_root.into(),
        }
    }

    /// Returns the `devices` cgroup directory of process `pid`.
    ///
    /// The process's membership in the `devices` hierarchy is taken from
    /// `<proc_root>/<pid>/cgroup`, and the hierarchy's mount point from the
    /// calling process's mountinfo, `<proc_root>/self/mountinfo`.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::ProcessLookup`] if either file cannot be read or
    /// no `devices` hierarchy is found.
    pub fn cgroup_path(&self, pid: i32) -> Result<PathBuf> {
        let lookup_error = |message: String| HookError::ProcessLookup { pid, message };

        let membership = Process::new_with_root(self.proc_root.join(pid.to_string()))
            .and_then(|p| p.cgroups())
            .map_err(|e| lookup_error(format!("cannot read cgroup membership: {e}")))?
            .into_iter()
            .find(|c| c.controllers.iter().any(|c| c == DEVICES_CONTROLLER))
            .ok_or_else(|| lookup_error("process is not in a devices cgroup".into()))?;

        let mount = Process::new_with_root(self.proc_root.join("self"))
            .and_then(|p| p.mountinfo())
            .map_err(|e| lookup_error(format!("cannot read mountinfo: {e}")))?
            .into_iter()
            .find(|m| {
                m.fs_type == CGROUP_FS_TYPE && m.super_options.contains_key(DEVICES_CONTROLLER)
            })
            .ok_or_else(|| lookup_error("devices cgroup hierarchy is not mounted".into()))?;

        let relative = Path::new(&membership.pathname)
            .strip_prefix(&mount.root)
            .unwrap_or_else(|_| Path::new(&membership.pathname));
        let relative = relative.strip_prefix("/").unwrap_or(relative);
        reject_traversal(relative)?;

        let path = mount.mount_point.join(relative);
        tracing::debug!(pid, cgroup = %path.display(), "resolved devices cgroup");
        Ok(path)
    }

    /// Appends an allow rule for every device in `device_names`, looked up
    /// under the configured device root.
    ///
    /// Every rule is built before the interface file is opened, so a bad
    /// device node leaves the cgroup untouched. Returns the number of rules
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::CgroupWrite`] if a device node is missing or not
    /// a character device, or if `devices.allow` is missing or not writable.
    pub fn restrict_device_access(
        &self,
        cgroup_path: &Path,
        device_names: &[String],
    ) -> Result<usize> {
        let rules = device_names
            .iter()
            .map(|name| DeviceRule::for_device(&self.dev_root.join(name)))
            .collect::<Result<Vec<_>>>()?;

        let allow = cgroup_path.join(DEVICES_ALLOW_FILE);
        let write_error = |e: std::io::Error| {
            tracing::error!(path = %allow.display(), error = %e, "cannot write device rule");
            HookError::CgroupWrite {
                path: allow.clone(),
                message: e.to_string(),
            }
        };
        let mut file = OpenOptions::new()
            .append(true)
            .open(&allow)
            .map_err(write_error)?;
        for rule in &rules {
            // The kernel parses one rule per write.
            file.write_all(rule.to_string().as_bytes())
                .map_err(write_error)?;
            tracing::debug!(rule = %rule, "allowed device");
        }
        tracing::info!(cgroup = %cgroup_path.display(), rules = rules.len(), "device cgroup configured");
        Ok(rules.len())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use super::*;

    struct FakeProc {
        root: tempfile::TempDir,
    }

    impl FakeProc {
        fn new(pid: i32, cgroup: &str, mountinfo: &str) -> Self {
            let root = tempfile::tempdir().expect("tempdir");
            let target = root.path().join(pid.to_string());
            std::fs::create_dir_all(&target).expect("mkdir");
            std::fs::write(target.join("cgroup"), cgroup).expect("write cgroup");

            let own_pid = std::process::id().to_string();
            let own = root.path().join(&own_pid);
            std::fs::create_dir_all(&own).expect("mkdir");
            std::fs::write(own.join("mountinfo"), mountinfo).expect("write mountinfo");
            symlink(&own_pid, root.path().join("self")).expect("self link");
            Self { root }
        }

        fn configurator(&self, dev_root: &Path) -> CgroupConfigurator {
            CgroupConfigurator::new(dev_root, self.root.path())
        }
    }

    const CGROUP_V1: &str = "\
12:pids:/docker/abc
11:devices:/docker/abc
1:name=systemd:/docker/abc
";

    const MOUNTINFO_V1: &str = "\
25 0 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
31 25 0:27 / /sys/fs/cgroup/pids rw,nosuid,nodev,noexec,relatime shared:12 - cgroup cgroup rw,pids
32 25 0:28 / /sys/fs/cgroup/devices rw,nosuid,nodev,noexec,relatime shared:13 - cgroup cgroup rw,devices
";

    #[test]
    fn resolves_devices_hierarchy() {
        let proc = FakeProc::new(4242, CGROUP_V1, MOUNTINFO_V1);
        let path = proc
            .configurator(Path::new("/dev"))
            .cgroup_path(4242)
            .expect("cgroup path");
        assert_eq!(path, PathBuf::from("/sys/fs/cgroup/devices/docker/abc"));
    }

    #[test]
    fn strips_mount_root_of_nested_hierarchy() {
        let mountinfo = "\
32 25 0:28 /docker /sys/fs/cgroup/devices rw,nosuid - cgroup cgroup rw,devices
";
        let proc = FakeProc::new(4242, CGROUP_V1, mountinfo);
        let path = proc
            .configurator(Path::new("/dev"))
            .cgroup_path(4242)
            .expect("cgroup path");
        assert_eq!(path, PathBuf::from("/sys/fs/cgroup/devices/abc"));
    }

    #[test]
    fn mountinfo_is_read_through_self() {
        let proc = FakeProc::new(4242, CGROUP_V1, MOUNTINFO_V1);
        std::fs::remove_file(proc.root.path().join("self")).expect("remove self link");
        let err = proc
            .configurator(Path::new("/dev"))
            .cgroup_path(4242)
            .unwrap_err();
        assert!(err.to_string().contains("mountinfo"));
    }

    #[test]
    fn missing_devices_controller_is_a_lookup_error() {
        let proc = FakeProc::new(4242, "0::/user.slice\n", MOUNTINFO_V1);
        let err = proc
            .configurator(Path::new("/dev"))
            .cgroup_path(4242)
            .unwrap_err();
        assert!(matches!(err, HookError::ProcessLookup { pid: 4242, .. }));
    }

    #[test]
    fn unmounted_devices_hierarchy_is_a_lookup_error() {
        let mountinfo = "\
25 0 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
";
        let proc = FakeProc::new(4242, CGROUP_V1, mountinfo);
        assert!(
            proc.configurator(Path::new("/dev"))
                .cgroup_path(4242)
                .is_err()
        );
    }

    #[test]
    fn exited_process_is_a_lookup_error() {
        let proc = FakeProc::new(4242, CGROUP_V1, MOUNTINFO_V1);
        assert!(matches!(
            proc.configurator(Path::new("/dev")).cgroup_path(4243),
            Err(HookError::ProcessLookup { pid: 4243, .. })
        ));
    }

    #[test]
    fn rule_uses_char_device_numbers() {
        let rule = DeviceRule::for_device(Path::new("/dev/null")).expect("rule");
        assert_eq!(rule, DeviceRule { major: 1, minor: 3 });
        assert_eq!(rule.to_string(), "c 1:3 rw");
    }

    #[test]
    fn regular_file_is_not_a_device() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        assert!(matches!(
            DeviceRule::for_device(file.path()),
            Err(HookError::CgroupWrite { .. })
        ));
    }

    #[test]
    fn writes_one_rule_per_device() {
        let dev = tempfile::tempdir().expect("tempdir");
        for name in ["davinci0", "davinci_manager"] {
            symlink("/dev/null", dev.path().join(name)).expect("symlink");
        }
        let cgroup = tempfile::tempdir().expect("tempdir");
        std::fs::write(cgroup.path().join(DEVICES_ALLOW_FILE), "").expect("write");

        let configurator = CgroupConfigurator::new(dev.path(), "/proc");
        let names = vec!["davinci0".to_owned(), "davinci_manager".to_owned()];
        let written = configurator
            .restrict_device_access(cgroup.path(), &names)
            .expect("restrict");

        assert_eq!(written, 2);
        let content =
            std::fs::read_to_string(cgroup.path().join(DEVICES_ALLOW_FILE)).expect("read");
        assert_eq!(content, "c 1:3 rwc 1:3 rw");
    }

    #[test]
    fn missing_interface_file_is_a_write_error() {
        let cgroup = tempfile::tempdir().expect("tempdir");
        let configurator = CgroupConfigurator::new("/dev", "/proc");
        let err = configurator
            .restrict_device_access(cgroup.path(), &["null".to_owned()])
            .unwrap_err();
        assert!(matches!(err, HookError::CgroupWrite { .. }));
        assert!(!cgroup.path().join(DEVICES_ALLOW_FILE).exists());
    }

    #[test]
    fn bad_device_leaves_cgroup_untouched() {
        let dev = tempfile::tempdir().expect("tempdir");
        symlink("/dev/null", dev.path().join("davinci0")).expect("symlink");
        let cgroup = tempfile::tempdir().expect("tempdir");
        std::fs::write(cgroup.path().join(DEVICES_ALLOW_FILE), "").expect("write");

        let configurator = CgroupConfigurator::new(dev.path(), "/proc");
        let names = vec!["davinci0".to_owned(), "davinci1".to_owned()];
        assert!(
            configurator
                .restrict_device_access(cgroup.path(), &names)
                .is_err()
        );
        let content =
            std::fs::read_to_string(cgroup.path().join(DEVICES_ALLOW_FILE)).expect("read");
        assert!(content.is_empty());
    }
}
