//! mtools operations for populating FAT images without mounting them.

use crate::process::{Cmd, CommandRunner};
use anyhow::Result;
use std::path::Path;

/// Copy a file or directory tree into a FAT image using mcopy.
pub fn mtools_copy(runner: &dyn CommandRunner, image: &Path, src: &Path, dest: &str) -> Result<()> {
    Cmd::new("mcopy")
        .args(["-s", "-p", "-i"])
        .arg_path(image)
        .arg_path(src)
        .arg(format!("::{}", dest))
        .error_msg(&format!("mcopy failed: {} -> {}", src.display(), dest))
        .run_with(runner)?;
    Ok(())
}

/// Copy every entry of `dir` into the root of a FAT image.
pub fn mtools_copy_tree(runner: &dyn CommandRunner, image: &Path, dir: &Path) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    for entry in entries {
        mtools_copy(runner, image, &entry, "/")?;
    }
    Ok(())
}
