//! Preflight checks for build validation.
//!
//! Validates that the host system has the tools a build will shell out to,
//! so that a missing `mkfs.vfat` is reported before the first step runs
//! rather than halfway through `make_disk`.

use anyhow::{bail, Result};

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools every build uses to produce disk images.
///
/// Each tuple is (command_name, package_name).
pub const IMAGE_TOOLS: &[(&str, &str)] = &[
    ("sfdisk", "util-linux"),
    ("mkfs.vfat", "dosfstools"),
    ("mkfs.ext4", "e2fsprogs"),
    ("mcopy", "mtools"),
];

/// Additional tools for snap builds.
pub const SNAP_TOOLS: &[(&str, &str)] = &[("snap", "snapd")];

/// Additional tools for classic builds that create their own rootfs.
pub const CLASSIC_TOOLS: &[(&str, &str)] = &[
    ("germinate", "germinate"),
    ("debootstrap", "debootstrap"),
    ("chroot", "coreutils"),
];

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check the tools a snap build needs.
pub fn check_snap_tools() -> Result<()> {
    let tools: Vec<_> = IMAGE_TOOLS.iter().chain(SNAP_TOOLS).copied().collect();
    check_required_tools(&tools)
}

/// Check the tools a classic build needs. With a prebuilt filesystem no
/// rootfs tooling is involved.
pub fn check_classic_tools(prebuilt_filesystem: bool) -> Result<()> {
    let mut tools: Vec<_> = IMAGE_TOOLS.to_vec();
    if !prebuilt_filesystem {
        tools.extend_from_slice(CLASSIC_TOOLS);
    }
    check_required_tools(&tools)
}
