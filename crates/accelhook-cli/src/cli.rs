//! Command-line surface of the hook.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use accelhook_common::constants::{APP_NAME, CONFIG_ENV};
use accelhook_runtime::request::RawHookArgs;

/// Container prestart hook that exposes accelerator devices.
///
/// Enters the mount namespace of the container process, bind-mounts the
/// granted accelerators, their control devices and optional driver paths
/// read-only, allows the devices in the container's device cgroup, and
/// returns to its own namespace.
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Comma-separated accelerator ids to expose, e.g. `0,1,3`.
    #[arg(long, value_name = "IDS")]
    pub devices: String,

    /// Process id of the container init process.
    #[arg(long)]
    pub pid: i32,

    /// Absolute path of the container rootfs.
    #[arg(long, value_name = "PATH")]
    pub rootfs: PathBuf,

    /// Comma-separated runtime options (`NODRV`, `VIRTUAL`).
    #[arg(long, value_name = "OPTIONS")]
    pub options: Option<String>,

    /// Host file to bind-mount at the same path in the container.
    #[arg(long = "mount-file", value_name = "PATH")]
    pub mount_files: Vec<PathBuf>,

    /// Host directory to bind-mount at the same path in the container.
    #[arg(long = "mount-dir", value_name = "PATH")]
    pub mount_dirs: Vec<PathBuf>,

    /// Follow symlinked mount sources (`True` or `False`).
    #[arg(
        long,
        value_name = "BOOL",
        action = ArgAction::Set,
        default_value = "False",
        value_parser = parse_capitalized_bool
    )]
    pub allow_link: bool,

    /// JSON file overriding the host device layout.
    #[arg(long, value_name = "PATH", env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

impl Cli {
    /// Splits off the hook arguments for validation.
    #[must_use]
    pub fn raw_args(&self) -> RawHookArgs {
        RawHookArgs {
            devices: self.devices.clone(),
            pid: self.pid,
            rootfs: self.rootfs.clone(),
            options: self.options.clone(),
            mount_files: self.mount_files.clone(),
            mount_dirs: self.mount_dirs.clone(),
            allow_link: self.allow_link,
        }
    }
}

/// Container runtimes pass `True`/`False`; lowercase is accepted too.
fn parse_capitalized_bool(value: &str) -> Result<bool, String> {
    match value {
        "True" | "true" => Ok(true),
        "False" | "false" => Ok(false),
        other => Err(format!("expected True or False, got {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 7] = [
        "accelhook",
        "--devices",
        "0,1",
        "--pid",
        "4242",
        "--rootfs",
        "/var/lib/rootfs",
    ];

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(REQUIRED.iter().chain(extra))
    }

    #[test]
    fn parses_required_flags_with_defaults() {
        let cli = parse(&[]).expect("parse");
        assert_eq!(cli.devices, "0,1");
        assert_eq!(cli.pid, 4242);
        assert_eq!(cli.rootfs, PathBuf::from("/var/lib/rootfs"));
        assert!(!cli.allow_link);
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(cli.mount_files.is_empty());
    }

    #[test]
    fn mount_flags_are_repeatable() {
        let cli = parse(&[
            "--mount-file",
            "/usr/local/bin/npu-smi",
            "--mount-file",
            "/etc/hccn.conf",
            "--mount-dir",
            "/usr/local/Ascend/driver/lib64",
        ])
        .expect("parse");
        assert_eq!(cli.mount_files.len(), 2);
        assert_eq!(cli.raw_args().mount_dirs.len(), 1);
    }

    #[test]
    fn allow_link_takes_runtime_spelling() {
        assert!(parse(&["--allow-link", "True"]).expect("parse").allow_link);
        assert!(!parse(&["--allow-link", "False"]).expect("parse").allow_link);
        assert!(parse(&["--allow-link", "yes"]).is_err());
    }

    #[test]
    fn json_log_format_is_accepted() {
        let cli = parse(&["--log-format", "json", "--options", "NODRV"]).expect("parse");
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.raw_args().options.as_deref(), Some("NODRV"));
    }

    #[test]
    fn missing_pid_is_rejected() {
        assert!(
            Cli::try_parse_from(["accelhook", "--devices", "0", "--rootfs", "/r"]).is_err()
        );
    }

    #[test]
    fn non_numeric_pid_is_rejected() {
        assert!(
            Cli::try_parse_from([
                "accelhook",
                "--devices",
                "0",
                "--pid",
                "abc",
                "--rootfs",
                "/r"
            ])
            .is_err()
        );
    }
}
