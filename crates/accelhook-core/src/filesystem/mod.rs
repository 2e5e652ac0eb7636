//! Filesystem primitives for the mount pipeline.
//!
//! Path construction and validation live in [`path`], mount-point creation
//! and read-only bind mounts in [`mount`].

pub mod mount;
pub mod path;
