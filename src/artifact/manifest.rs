//! Build manifests written next to the disk images.

use crate::classic::generate_package_manifest_cmd;
use crate::process::CommandRunner;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const SEED_MANIFEST: &str = "seed.manifest";
pub const PACKAGE_MANIFEST: &str = "filesystem.manifest";

/// `name revision` for every `<name>_<revision>.snap` in `snaps_dir`,
/// sorted by name.
pub fn snap_manifest_lines(snaps_dir: &Path) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for entry in fs::read_dir(snaps_dir)
        .with_context(|| format!("Error reading snaps dir {}", snaps_dir.display()))?
    {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        let Some(stem) = name.strip_suffix(".snap") else {
            continue;
        };
        if let Some((snap, revision)) = stem.rsplit_once('_') {
            lines.push(format!("{} {}", snap, revision));
        }
    }
    lines.sort();
    Ok(lines)
}

/// Write `seed.manifest` into `output_dir` and return its path.
pub fn write_snap_manifest(snaps_dir: &Path, output_dir: &Path) -> Result<PathBuf> {
    let lines = snap_manifest_lines(snaps_dir)?;
    let path = output_dir.join(SEED_MANIFEST);
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(&path, content)
        .with_context(|| format!("Error writing {}", path.display()))?;
    Ok(path)
}

/// Query the packages installed in `rootfs` and write `filesystem.manifest`
/// into `output_dir`.
pub fn write_package_manifest(
    runner: &dyn CommandRunner,
    rootfs: &Path,
    output_dir: &Path,
) -> Result<PathBuf> {
    let output = generate_package_manifest_cmd(rootfs).run_with(runner)?;
    let path = output_dir.join(PACKAGE_MANIFEST);
    fs::write(&path, &output.stdout)
        .with_context(|| format!("Error writing {}", path.display()))?;
    Ok(path)
}
