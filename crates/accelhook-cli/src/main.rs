//! # accelhook
//!
//! Container prestart hook exposing accelerator devices.
//! Exits with 0 on success, 2 if the hook could not return to its own mount
//! namespace, and 1 on any other failure, including malformed arguments.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod cli;
mod logging;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use accelhook_common::config::HookConfig;
use accelhook_common::constants::APP_NAME;
use accelhook_common::error::HookError;
use accelhook_core::syscall::LinuxSyscall;
use accelhook_runtime::prestart::Prestart;
use accelhook_runtime::request::HookRequest;

use crate::cli::Cli;

/// Exit status for help and version output.
const EXIT_OK: u8 = 0;

/// Exit status for every failure that leaves the hook in its own namespace.
const EXIT_FAILED: u8 = 1;

/// Exit status when the process may be stuck in the container namespace.
const EXIT_RESTORE_FAILED: u8 = 2;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(usage_status(&err));
        }
    };
    logging::init(cli.log_format);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::from(failure_status(&err))
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "{APP_NAME} prestart hook starting");

    let config = HookConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let request =
        HookRequest::from_raw(cli.raw_args(), &config).context("invalid hook arguments")?;

    let syscall = LinuxSyscall;
    let mut prestart = Prestart::new(config, &syscall);
    let report = prestart.run(request).context("failed to set up container devices")?;

    tracing::info!(
        devices = report.devices.mounted,
        control_devices = report.control_devices.mounted,
        auxiliary = report.auxiliary.mounted,
        skipped = report.devices.skipped + report.control_devices.skipped + report.auxiliary.skipped,
        cgroup_rules = report.cgroup_rules,
        "prestart hook finished"
    );
    Ok(())
}

/// Status for a rejected command line; help and version output exit with 0.
fn usage_status(err: &clap::Error) -> u8 {
    if err.use_stderr() {
        EXIT_FAILED
    } else {
        EXIT_OK
    }
}

fn failure_status(err: &anyhow::Error) -> u8 {
    if is_restore_failure(err) {
        EXIT_RESTORE_FAILED
    } else {
        EXIT_FAILED
    }
}

fn is_restore_failure(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<HookError>())
        .any(HookError::is_restore_failure)
}

#[allow(clippy::print_stderr)]
fn report(err: &anyhow::Error) {
    eprintln!("{APP_NAME}: {err:#}");
}
