//! The prestart pipeline.
//!
//! ```text
//! Init -> Prepared -> InContainerNs -> Mounted -> CgroupConfigured -> Restored -> Done
//! ```
//!
//! Any stage can end in `Failed`. Once the container namespace has been
//! entered, the way back to the original namespace is always attempted
//! before a failure is reported. If that attempt fails too, the restore
//! failure is what the caller sees, with the pipeline failure attached.

use std::fmt;

use accelhook_common::config::HookConfig;
use accelhook_common::error::{HookError, Result};
use accelhook_core::cgroup::CgroupConfigurator;
use accelhook_core::device::{DeviceLayout, DeviceMountPlanner, MountSummary};
use accelhook_core::namespace::NamespaceGuard;
use accelhook_core::syscall::Syscall;

use crate::prepare::{MountPlan, ParsedConfig};
use crate::request::HookRequest;

/// Position of a run in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Nothing done yet.
    Init,
    /// Paths resolved and original namespace opened.
    Prepared,
    /// Running in the container's mount namespace.
    InContainerNs,
    /// Devices and auxiliary paths mounted.
    Mounted,
    /// Device cgroup rules written.
    CgroupConfigured,
    /// Back in the original namespace.
    Restored,
    /// Finished successfully.
    Done,
    /// Aborted.
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Prepared => "prepared",
            Self::InContainerNs => "in-container-ns",
            Self::Mounted => "mounted",
            Self::CgroupConfigured => "cgroup-configured",
            Self::Restored => "restored",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a successful run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrestartReport {
    /// Accelerator devices.
    pub devices: MountSummary,
    /// Control devices.
    pub control_devices: MountSummary,
    /// Auxiliary files and directories.
    pub auxiliary: MountSummary,
    /// Rules written to `devices.allow`.
    pub cgroup_rules: usize,
}

/// Drives one hook invocation through the pipeline.
pub struct Prestart<'s> {
    config: HookConfig,
    layout: DeviceLayout,
    syscall: &'s dyn Syscall,
    stage: Stage,
    failed_at: Option<Stage>,
}

impl<'s> Prestart<'s> {
    /// Creates a pipeline using `syscall` for every state-changing call.
    #[must_use]
    pub fn new(config: HookConfig, syscall: &'s dyn Syscall) -> Self {
        let layout = DeviceLayout::from_config(&config);
        Self {
            config,
            layout,
            syscall,
            stage: Stage::Init,
            failed_at: None,
        }
    }

    /// Current stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Last stage reached before the run failed.
    #[must_use]
    pub const fn failed_at(&self) -> Option<Stage> {
        self.failed_at
    }

    /// Runs the whole pipeline for `request`.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the pipeline. If returning to the
    /// original namespace fails, returns [`HookError::Restore`] carrying
    /// the earlier failure, if any.
    pub fn run(&mut self, request: HookRequest) -> Result<PrestartReport> {
        tracing::info!(pid = request.pid, rootfs = %request.rootfs.display(), "prestart hook started");

        let parsed = ParsedConfig::prepare(request, &self.config).map_err(|e| self.fail(e))?;
        self.advance(Stage::Prepared);

        let ParsedConfig {
            container_ns_path,
            original_ns,
            plan,
        } = parsed;
        let guard = NamespaceGuard::enter(original_ns, &container_ns_path, self.syscall)
            .map_err(|e| self.fail(e))?;
        self.advance(Stage::InContainerNs);

        let work = self.mount_and_restrict(&plan);

        match (work, guard.restore()) {
            (Ok(report), Ok(())) => {
                self.advance(Stage::Restored);
                self.advance(Stage::Done);
                Ok(report)
            }
            (Err(primary), Ok(())) => Err(self.fail(primary)),
            (Ok(_), Err(restore)) => Err(self.fail(restore)),
            (Err(primary), Err(restore)) => Err(self.fail(restore.after(primary))),
        }
    }

    fn mount_and_restrict(&mut self, plan: &MountPlan) -> Result<PrestartReport> {
        let planner = DeviceMountPlanner::new(
            &self.config.dev_root,
            &plan.rootfs,
            &self.layout,
            self.syscall,
        );
        let devices = planner.plan_and_mount_devices(&plan.devices, plan.options.virtual_devices)?;
        let control_devices = planner.mount_fixed_control_devices()?;
        let auxiliary = if plan.options.no_driver {
            tracing::info!("no-driver mode, skipping auxiliary files and directories");
            MountSummary::default()
        } else {
            let files = planner.mount_auxiliary_files(&plan.mount_files, plan.allow_link)?;
            let dirs = planner.mount_auxiliary_dirs(&plan.mount_dirs, plan.allow_link)?;
            files.merge(dirs)
        };
        self.advance(Stage::Mounted);

        let granted = self
            .layout
            .granted_device_names(&plan.devices, plan.options.virtual_devices);
        let cgroup_rules = CgroupConfigurator::new(&self.config.dev_root, &self.config.proc_root)
            .restrict_device_access(&plan.cgroup_path, &granted)?;
        self.advance(Stage::CgroupConfigured);

        Ok(PrestartReport {
            devices,
            control_devices,
            auxiliary,
            cgroup_rules,
        })
    }

    fn advance(&mut self, next: Stage) {
        tracing::info!(from = %self.stage, to = %next, "stage transition");
        self.stage = next;
    }

    fn fail(&mut self, err: HookError) -> HookError {
        tracing::error!(stage = %self.stage, error = %err, "prestart hook failed");
        self.failed_at = Some(self.stage);
        self.stage = Stage::Failed;
        err
    }
}
