//! Rootfs measurement and the system-data size correction.

use super::align_up;
use crate::gadget::VolumeStructure;
use anyhow::{Context, Result};
use std::fmt;
use std::path::Path;
use walkdir::WalkDir;

/// Apparent size of every file below `path`, symlinks not followed.
///
/// A missing directory measures 0.
pub fn calculate_dir_size(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }

    let mut total = 0;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry =
            entry.with_context(|| format!("Error measuring rootfs {}", path.display()))?;
        let metadata = entry
            .metadata()
            .with_context(|| format!("Error reading {}", entry.path().display()))?;
        if !metadata.is_dir() {
            total += metadata.len();
        }
    }

    Ok(total)
}

/// Format a byte count with binary prefixes: `0 B`, `1.50 KiB`.
pub fn iec_string(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// The declared system-data size was smaller than its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootfsSizeWarning {
    pub declared: u64,
    pub measured: u64,
}

impl fmt::Display for RootfsSizeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WARNING: rootfs structure size {} smaller than actual rootfs contents {}",
            iec_string(self.declared),
            iec_string(self.measured)
        )
    }
}

/// Grow `structure` to hold `rootfs_size` bytes if it is too small.
///
/// The new size is rounded up to whole sectors so the partition ends on a
/// sector boundary.
pub fn reconcile_rootfs_size(
    structure: &mut VolumeStructure,
    rootfs_size: u64,
    sector_size: u64,
) -> Option<RootfsSizeWarning> {
    if structure.size >= rootfs_size {
        return None;
    }
    let warning = RootfsSizeWarning {
        declared: structure.size,
        measured: rootfs_size,
    };
    structure.size = align_up(rootfs_size, sector_size);
    Some(warning)
}
