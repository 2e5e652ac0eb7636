//! # accelhook-core
//!
//! Low-level Linux primitives for the accelhook prestart hook.
//!
//! This crate provides safe abstractions over:
//! - **Paths**: device and auxiliary mount path construction with rootfs
//!   containment checks.
//! - **Mounts**: two-phase read-only bind mounts and mount point creation.
//! - **Namespaces**: `/proc/<pid>/ns` lookup and `setns(2)` with an owned
//!   handle to the original namespace.
//! - **Cgroups**: device controller lookup and `devices.allow` rules.
//! - **Devices**: planning and mounting accelerator and control devices.
//!
//! Kernel calls that change state go through the [`syscall::Syscall`] trait
//! so the pipeline can be exercised without privileges.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod device;
pub mod filesystem;
pub mod namespace;
pub mod syscall;
