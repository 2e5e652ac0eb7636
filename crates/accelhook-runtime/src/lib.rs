//! Prestart orchestration for the accelhook container hook.
//!
//! A run goes through three layers:
//! - [`request`] validates the caller's arguments into bounded types,
//! - [`prepare`] resolves everything that needs the host view of `/proc`
//!   and opens the descriptor on the hook's own mount namespace,
//! - [`prestart`] enters the container namespace, mounts, configures the
//!   device cgroup, and returns.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod prepare;
pub mod prestart;
pub mod request;
