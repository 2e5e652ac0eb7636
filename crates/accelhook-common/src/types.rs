//! Domain primitive types used across the accelhook workspace.
//!
//! Every list the hook receives from its caller is bounded. Bounds are
//! enforced when an item is pushed, so an oversized input is rejected before
//! any namespace or mount work starts.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_OPTIONS_LEN, OPTION_NO_DRIVER, OPTION_VIRTUAL};
use crate::error::{HookError, Result};

/// Kind of Linux namespace, named as under `/proc/<pid>/ns/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    /// Mount namespace (`mnt`).
    Mnt,
}

impl NamespaceKind {
    /// Returns the entry name under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Mnt => "mnt",
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

/// Identifier of one accelerator device instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(u32);

impl DeviceId {
    /// Creates a device id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the numeric id.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Builds the device node name for this id under the given prefix.
    #[must_use]
    pub fn device_name(self, prefix: &str) -> String {
        format!("{prefix}{}", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|e| HookError::invalid_input(format!("invalid device id {s:?}: {e}")))
    }
}

/// Ordered sequence that can never grow past its capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedList<T> {
    label: &'static str,
    limit: usize,
    items: Vec<T>,
}

impl<T> BoundedList<T> {
    /// Creates an empty list accepting at most `limit` items.
    ///
    /// `label` names the list in validation errors.
    #[must_use]
    pub const fn new(label: &'static str, limit: usize) -> Self {
        Self {
            label,
            limit,
            items: Vec::new(),
        }
    }

    /// Appends an item.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::InputValidation`] if the list is already full.
    pub fn push(&mut self, item: T) -> Result<()> {
        if self.items.len() >= self.limit {
            return Err(HookError::invalid_input(format!(
                "too many {}, at most {} supported",
                self.label, self.limit
            )));
        }
        self.items.push(item);
        Ok(())
    }

    /// Builds a list from an iterator, failing on the first item past the bound.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::InputValidation`] if the iterator yields more than
    /// `limit` items.
    pub fn try_from_iter(
        label: &'static str,
        limit: usize,
        items: impl IntoIterator<Item = T>,
    ) -> Result<Self> {
        let mut list = Self::new(label, limit);
        for item in items {
            list.push(item)?;
        }
        Ok(list)
    }

    /// Returns the number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the list holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the maximum number of items.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the items as a slice, in insertion order.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Iterates over the items in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<'a, T> IntoIterator for &'a BoundedList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Accelerator ids granted to the container. Duplicates are kept as given.
pub type DeviceIdList = BoundedList<DeviceId>;

/// Host files or directories to bind-mount into the container.
pub type MountList = BoundedList<PathBuf>;

/// Parses a comma-separated device id list such as `"0,1,3"`.
///
/// Tokens are trimmed and empty tokens are ignored. The resulting list must
/// be non-empty.
///
/// # Errors
///
/// Returns [`HookError::InputValidation`] for a non-numeric token, an empty
/// list, or more than `limit` ids.
pub fn parse_device_ids(csv: &str, limit: usize) -> Result<DeviceIdList> {
    let mut ids = DeviceIdList::new("devices", limit);
    for token in csv.split(',').filter(|t| !t.trim().is_empty()) {
        ids.push(token.parse()?)?;
    }
    if ids.is_empty() {
        return Err(HookError::invalid_input("no device ids given"));
    }
    Ok(ids)
}

/// Runtime options passed through `--options`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeOptions {
    /// Skip auxiliary driver files and directories (`NODRV`).
    pub no_driver: bool,
    /// Use the virtual host device naming scheme (`VIRTUAL`).
    pub virtual_devices: bool,
}

impl FromStr for RuntimeOptions {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() > MAX_OPTIONS_LEN {
            return Err(HookError::invalid_input(format!(
                "runtime options longer than {MAX_OPTIONS_LEN} bytes"
            )));
        }
        let mut options = Self::default();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match token {
                OPTION_NO_DRIVER => options.no_driver = true,
                OPTION_VIRTUAL => options.virtual_devices = true,
                other => {
                    return Err(HookError::invalid_input(format!(
                        "unknown runtime option {other:?}"
                    )));
                }
            }
        }
        Ok(options)
    }
}
