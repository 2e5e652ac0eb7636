//! System-wide constants and default paths.

/// Host directory holding device nodes.
pub const DEFAULT_DEV_ROOT: &str = "/dev";

/// Mount point of procfs on the host.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Directory, relative to the container rootfs, that receives device nodes.
pub const CONTAINER_DEV_DIR: &str = "dev";

/// Host device name prefix for physical accelerators (`davinci0`, `davinci1`, ...).
pub const DEVICE_PREFIX: &str = "davinci";

/// Host device name prefix for virtual accelerator slices.
pub const VIRTUAL_DEVICE_PREFIX: &str = "vdavinci";

/// Device management control node.
pub const DAVINCI_MANAGER: &str = "davinci_manager";

/// Shared virtual memory (memory-mapping) control node.
pub const DEVMM_SVM: &str = "devmm_svm";

/// Host-device communication control node.
pub const HISI_HDC: &str = "hisi_hdc";

/// Default number of accelerator ids accepted on one invocation.
pub const DEFAULT_MAX_DEVICES: usize = 128;

/// Default number of `--mount-file` or `--mount-dir` entries accepted.
pub const DEFAULT_MAX_MOUNTS: usize = 10;

/// Hard ceiling for the configurable device limit.
pub const MAX_DEVICE_NR: usize = 1024;

/// Hard ceiling for the configurable mount list limit.
pub const MAX_MOUNT_NR: usize = 512;

/// Longest accepted `--options` string, in bytes.
pub const MAX_OPTIONS_LEN: usize = 128;

/// Runtime option that skips auxiliary driver files and directories.
pub const OPTION_NO_DRIVER: &str = "NODRV";

/// Runtime option that selects the virtual device naming scheme.
pub const OPTION_VIRTUAL: &str = "VIRTUAL";

/// Name of the cgroup v1 device controller.
pub const DEVICES_CONTROLLER: &str = "devices";

/// Device controller interface file that grants access.
pub const DEVICES_ALLOW_FILE: &str = "devices.allow";

/// Mode used for directories created on the way to a mount point.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Environment variable naming an optional JSON configuration file.
pub const CONFIG_ENV: &str = "ACCELHOOK_CONFIG";

/// Application name used in log output.
pub const APP_NAME: &str = "accelhook";
