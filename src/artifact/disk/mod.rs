//! Image writer.
//!
//! Builds one raw disk image per gadget volume without root privileges:
//! every structure is first rendered into its own part image
//! (`volumes/<volume>/part<N>.img`), then [`assembly`] lays the part images
//! out in `<volume>.img` behind an sfdisk-written partition table.
//!
//! All I/O goes through the [`FileOps`] and [`CommandRunner`] capabilities
//! held by [`ImageWriter`].

pub mod assembly;
pub mod mtools;
pub mod partitions;

use crate::host::FileOps;
use crate::process::CommandRunner;
use std::path::{Path, PathBuf};

/// Chunk size for blob and part-image copies.
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Offset of the 4-byte disk signature in an MBR.
pub const MBR_DISK_ID_OFFSET: u64 = 440;

pub struct ImageWriter<'a> {
    fs: &'a dyn FileOps,
    runner: &'a dyn CommandRunner,
    block_size: usize,
}

impl<'a> ImageWriter<'a> {
    pub fn new(fs: &'a dyn FileOps, runner: &'a dyn CommandRunner) -> Self {
        Self {
            fs,
            runner,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }
}

/// Where a structure's content comes from.
#[derive(Debug, Clone)]
pub struct PartitionSources {
    /// Unpacked gadget tree; raw image blobs are relative to it.
    pub gadget_dir: PathBuf,
    /// Staged rootfs used for the system-data structure.
    pub rootfs_dir: PathBuf,
    /// Measured size of `rootfs_dir`.
    pub rootfs_size: u64,
    /// Staged filesystem content for any other structure.
    pub content_dir: PathBuf,
}

/// `volumes/<volume>/part<N>.img`
pub fn part_image_path(volumes_dir: &Path, volume: &str, index: usize) -> PathBuf {
    volumes_dir.join(volume).join(format!("part{}.img", index))
}

/// `volumes/<volume>/part<N>/`
pub fn part_content_dir(volumes_dir: &Path, volume: &str, index: usize) -> PathBuf {
    volumes_dir.join(volume).join(format!("part{}", index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_paths() {
        let volumes = Path::new("/work/volumes");
        assert_eq!(
            part_image_path(volumes, "pc", 2),
            Path::new("/work/volumes/pc/part2.img")
        );
        assert_eq!(
            part_content_dir(volumes, "pc", 2),
            Path::new("/work/volumes/pc/part2")
        );
    }
}
