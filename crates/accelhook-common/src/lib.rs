//! # accelhook-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the accelhook workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and carries no Linux-specific code, so every bounded input
//! type can be validated before the hook touches a namespace.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
