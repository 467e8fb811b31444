//! Per-structure part images.

use super::mtools;
use super::{ImageWriter, PartitionSources};
use crate::artifact::filesystem::dir_is_empty;
use crate::gadget::{ContentItem, Filesystem, Volume, VolumeStructure};
use crate::layout::{reconcile_rootfs_size, RootfsSizeWarning};
use crate::process::Cmd;
use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::debug;

impl ImageWriter<'_> {
    /// Render structure `index` of `volume` into `part_image`.
    ///
    /// Raw structures get their image blobs copied at the running offset.
    /// Filesystem structures get a fresh filesystem, populated from the
    /// staged content (or the rootfs for system-data) when there is any.
    /// A system-data structure smaller than the rootfs is grown first and
    /// the returned warning reports it.
    pub fn copy_structure_content(
        &self,
        volume: &mut Volume,
        index: usize,
        sources: &PartitionSources,
        part_image: &Path,
    ) -> Result<Option<RootfsSizeWarning>> {
        let sector_size = volume.sector_size;
        let Some(structure) = volume.structures.get_mut(index) else {
            bail!("volume '{}' has no structure {}", volume.name, index);
        };

        if structure.filesystem.is_none() {
            self.copy_raw_content(structure, &sources.gadget_dir, part_image)?;
            return Ok(None);
        }

        let mut warning = None;
        let content_root = if structure.is_system_data() {
            warning = reconcile_rootfs_size(structure, sources.rootfs_size, sector_size);
            sources.rootfs_dir.as_path()
        } else {
            sources.content_dir.as_path()
        };
        let has_content = content_root.is_dir()
            && !dir_is_empty(content_root)
                .with_context(|| format!("Error reading {}", content_root.display()))?;

        self.fs
            .zero_fill(part_image, structure.size)
            .context("Error zeroing image file")?;

        if has_content {
            self.make_filesystem(structure, sector_size, part_image, Some(content_root))
                .context("Error running mkfs with content")?;
        } else {
            self.make_filesystem(structure, sector_size, part_image, None)
                .context("Error running mkfs")?;
        }

        Ok(warning)
    }

    fn copy_raw_content(
        &self,
        structure: &VolumeStructure,
        gadget_dir: &Path,
        part_image: &Path,
    ) -> Result<()> {
        self.fs
            .zero_fill(part_image, structure.size)
            .context("Error zeroing partition")?;

        let mut offset = 0u64;
        for item in &structure.content {
            let ContentItem::Image {
                image,
                offset: explicit,
                size,
            } = item
            else {
                continue;
            };
            if let Some(explicit) = explicit {
                offset = *explicit;
            }
            let blob = gadget_dir.join(image);
            let len = self
                .fs
                .file_len(&blob)
                .with_context(|| format!("Error copying image blob {}", blob.display()))?;
            if offset.checked_add(len).map_or(true, |end| end > structure.size) {
                bail!(
                    "Error copying image blob {}: {} bytes at offset {} do not fit in \
                     structure '{}' of {} bytes",
                    blob.display(),
                    len,
                    offset,
                    structure.name,
                    structure.size
                );
            }
            debug!(blob = %blob.display(), offset, "copying image blob");
            let copied = self
                .fs
                .copy_range(&blob, part_image, offset, self.block_size)
                .with_context(|| format!("Error copying image blob {}", blob.display()))?;
            offset += size.unwrap_or(copied);
        }

        Ok(())
    }

    /// Create the structure's filesystem in `image`, optionally populated
    /// from `content`.
    fn make_filesystem(
        &self,
        structure: &VolumeStructure,
        sector_size: u64,
        image: &Path,
        content: Option<&Path>,
    ) -> Result<()> {
        let Some(filesystem) = structure.filesystem else {
            bail!("structure '{}' has no filesystem", structure.name);
        };
        let label = structure.label();

        match filesystem {
            vfat if vfat.is_vfat() => {
                let fat_size = if vfat == Filesystem::Vfat16 { "16" } else { "32" };
                Cmd::new("mkfs.vfat")
                    .arg("-S")
                    .arg(sector_size.to_string())
                    .args(["-s", "1", "-F", fat_size, "-n", label])
                    .arg_path(image)
                    .error_msg("mkfs.vfat failed")
                    .run_with(self.runner)?;
                if let Some(dir) = content {
                    mtools::mtools_copy_tree(self.runner, image, dir)?;
                }
            }
            _ => {
                let mut cmd = Cmd::new("mkfs.ext4").args(["-q", "-T", "default", "-L", label]);
                if let Some(dir) = content {
                    cmd = cmd.arg("-d").arg_path(dir);
                }
                cmd.arg_path(image)
                    .error_msg("mkfs.ext4 failed")
                    .run_with(self.runner)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::Role;
    use crate::host::RealFs;
    use crate::testing::{FakeRunner, FaultyFs, FsOp};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        sources: PartitionSources,
        part_image: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let gadget_dir = temp.path().join("gadget");
        let rootfs_dir = temp.path().join("root");
        let content_dir = temp.path().join("part0");
        for dir in [&gadget_dir, &rootfs_dir, &content_dir] {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(gadget_dir.join("pc-boot.img"), b"BOOT").unwrap();
        fs::write(gadget_dir.join("pc-core.img"), b"CORE").unwrap();
        let part_image = temp.path().join("part0.img");
        Fixture {
            sources: PartitionSources {
                gadget_dir,
                rootfs_dir,
                rootfs_size: 0,
                content_dir,
            },
            part_image,
            _temp: temp,
        }
    }

    fn raw_volume() -> Volume {
        let mut volume = Volume::new("pc");
        let mut mbr = VolumeStructure::new("mbr", 16);
        mbr.role = Some(Role::Mbr);
        mbr.content = vec![
            ContentItem::Image {
                image: "pc-boot.img".into(),
                offset: None,
                size: None,
            },
            ContentItem::Image {
                image: "pc-core.img".into(),
                offset: Some(8),
                size: None,
            },
        ];
        volume.structures.push(mbr);
        volume
    }

    fn fs_volume(filesystem: Filesystem, role: Option<Role>) -> Volume {
        let mut volume = Volume::new("pc");
        let mut s = VolumeStructure::new("ubuntu-data", 4096);
        s.filesystem = Some(filesystem);
        s.role = role;
        volume.structures.push(s);
        volume
    }

    #[test]
    fn test_raw_structure_blobs_at_offsets() {
        let fx = fixture();
        let runner = FakeRunner::new();
        let writer = ImageWriter::new(&RealFs, &runner);
        let mut volume = raw_volume();

        writer
            .copy_structure_content(&mut volume, 0, &fx.sources, &fx.part_image)
            .unwrap();

        let bytes = fs::read(&fx.part_image).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], b"BOOT");
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[8..12], b"CORE");
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn test_raw_blob_larger_than_structure() {
        let fx = fixture();
        fs::write(fx.sources.gadget_dir.join("pc-boot.img"), [0xeb; 512]).unwrap();
        let runner = FakeRunner::new();
        let writer = ImageWriter::new(&RealFs, &runner);
        let mut volume = raw_volume();
        volume.structures[0].size = 440;

        let err = writer
            .copy_structure_content(&mut volume, 0, &fx.sources, &fx.part_image)
            .unwrap_err();
        assert!(err.to_string().starts_with("Error copying image blob"));
        assert!(err.to_string().contains("512 bytes at offset 0"));
        assert_eq!(fs::metadata(&fx.part_image).unwrap().len(), 440);
    }

    #[test]
    fn test_raw_blob_past_structure_end() {
        let fx = fixture();
        let runner = FakeRunner::new();
        let writer = ImageWriter::new(&RealFs, &runner);
        let mut volume = raw_volume();
        // CORE lands at 8..12.
        volume.structures[0].size = 10;

        let err = writer
            .copy_structure_content(&mut volume, 0, &fx.sources, &fx.part_image)
            .unwrap_err();
        assert!(err.to_string().contains("pc-core.img"));
        assert_eq!(fs::metadata(&fx.part_image).unwrap().len(), 10);
    }

    #[test]
    fn test_raw_structure_zeroing_failure() {
        let fx = fixture();
        let runner = FakeRunner::new();
        let faulty = FaultyFs::failing(FsOp::ZeroFill);
        let writer = ImageWriter::new(&faulty, &runner);
        let err = writer
            .copy_structure_content(&mut raw_volume(), 0, &fx.sources, &fx.part_image)
            .unwrap_err();
        assert_eq!(err.to_string(), "Error zeroing partition");
    }

    #[test]
    fn test_raw_structure_copy_failure() {
        let fx = fixture();
        let runner = FakeRunner::new();
        let faulty = FaultyFs::failing(FsOp::CopyRange);
        let writer = ImageWriter::new(&faulty, &runner);
        let err = writer
            .copy_structure_content(&mut raw_volume(), 0, &fx.sources, &fx.part_image)
            .unwrap_err();
        assert!(err.to_string().starts_with("Error copying image blob"));
    }

    #[test]
    fn test_raw_structure_zero_block_size() {
        let fx = fixture();
        let runner = FakeRunner::new();
        let writer = ImageWriter::new(&RealFs, &runner).with_block_size(0);
        let err = writer
            .copy_structure_content(&mut raw_volume(), 0, &fx.sources, &fx.part_image)
            .unwrap_err();
        assert!(err.to_string().starts_with("Error copying image blob"));
    }

    #[test]
    fn test_empty_vfat_runs_plain_mkfs() {
        let fx = fixture();
        let runner = FakeRunner::new();
        let writer = ImageWriter::new(&RealFs, &runner);
        let mut volume = fs_volume(Filesystem::Vfat, Some(Role::SystemBoot));

        writer
            .copy_structure_content(&mut volume, 0, &fx.sources, &fx.part_image)
            .unwrap();

        let cmds = runner.commands();
        assert_eq!(cmds.len(), 1);
        assert!(cmds[0].starts_with("mkfs.vfat -S 512 -s 1 -F 32 -n system-boot"));
        assert_eq!(fs::metadata(&fx.part_image).unwrap().len(), 4096);
    }

    #[test]
    fn test_vfat_with_content_copies_tree() {
        let fx = fixture();
        fs::write(fx.sources.content_dir.join("grub.cfg"), "set timeout=3").unwrap();
        let runner = FakeRunner::new();
        let writer = ImageWriter::new(&RealFs, &runner);
        let mut volume = fs_volume(Filesystem::Vfat, Some(Role::SystemBoot));

        writer
            .copy_structure_content(&mut volume, 0, &fx.sources, &fx.part_image)
            .unwrap();

        let cmds = runner.commands();
        assert_eq!(cmds.len(), 2);
        assert!(cmds[1].starts_with("mcopy"));
        assert!(cmds[1].contains("grub.cfg"));
    }

    #[test]
    fn test_mkfs_failures_are_distinguished() {
        let fx = fixture();
        let runner = FakeRunner::new().fail_on("mkfs.ext4");
        let writer = ImageWriter::new(&RealFs, &runner);

        let err = writer
            .copy_structure_content(&mut fs_volume(Filesystem::Ext4, None), 0, &fx.sources, &fx.part_image)
            .unwrap_err();
        assert_eq!(err.to_string(), "Error running mkfs");

        fs::write(fx.sources.content_dir.join("file"), "x").unwrap();
        let err = writer
            .copy_structure_content(&mut fs_volume(Filesystem::Ext4, None), 0, &fx.sources, &fx.part_image)
            .unwrap_err();
        assert_eq!(err.to_string(), "Error running mkfs with content");
    }

    #[test]
    fn test_filesystem_zeroing_failure() {
        let fx = fixture();
        let runner = FakeRunner::new();
        let faulty = FaultyFs::failing(FsOp::ZeroFill);
        let writer = ImageWriter::new(&faulty, &runner);
        let err = writer
            .copy_structure_content(&mut fs_volume(Filesystem::Ext4, None), 0, &fx.sources, &fx.part_image)
            .unwrap_err();
        assert_eq!(err.to_string(), "Error zeroing image file");
    }

    #[test]
    fn test_system_data_uses_rootfs_and_grows() {
        let mut fx = fixture();
        fs::write(fx.sources.rootfs_dir.join("etc-hostname"), "ubuntu").unwrap();
        fx.sources.rootfs_size = 8192;
        let runner = FakeRunner::new();
        let writer = ImageWriter::new(&RealFs, &runner);
        let mut volume = fs_volume(Filesystem::Ext4, Some(Role::SystemData));

        let warning = writer
            .copy_structure_content(&mut volume, 0, &fx.sources, &fx.part_image)
            .unwrap()
            .unwrap();

        assert!(warning.to_string().contains("smaller than actual rootfs contents"));
        assert_eq!(volume.structures[0].size, 8192);
        assert_eq!(fs::metadata(&fx.part_image).unwrap().len(), 8192);
        let cmds = runner.commands();
        assert!(cmds[0].contains("-L writable -d"));
        assert!(cmds[0].contains(&fx.sources.rootfs_dir.display().to_string()));
    }

    #[test]
    fn test_system_data_growth_rounds_to_sector() {
        let mut fx = fixture();
        fx.sources.rootfs_size = 8193;
        let runner = FakeRunner::new();
        let writer = ImageWriter::new(&RealFs, &runner);
        let mut volume = fs_volume(Filesystem::Ext4, Some(Role::SystemData));

        let warning = writer
            .copy_structure_content(&mut volume, 0, &fx.sources, &fx.part_image)
            .unwrap()
            .unwrap();
        assert_eq!(warning.measured, 8193);
        assert_eq!(volume.structures[0].size, 8704);
        assert_eq!(fs::metadata(&fx.part_image).unwrap().len(), 8704);
    }
}
