//! Disk assembly: partition table, part image splicing and positional writes.

use super::{part_image_path, ImageWriter, MBR_DISK_ID_OFFSET};
use crate::gadget::{Role, Schema, Volume};
use crate::process::Cmd;
use anyhow::{bail, Context, Result};
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

/// GPT type GUID used when a structure only names an MBR type.
const LINUX_DATA_GUID: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";

impl ImageWriter<'_> {
    /// Create `disk` as a sparse file of `size` bytes.
    pub fn create_disk(&self, disk: &Path, size: u64) -> Result<()> {
        self.fs
            .zero_fill(disk, size)
            .with_context(|| format!("Error creating disk image {}", disk.display()))
    }

    /// Write the partition table of `volume` into `disk` with sfdisk.
    pub fn write_partition_table(
        &self,
        volume: &Volume,
        disk: &Path,
        disk_id: Option<[u8; 4]>,
    ) -> Result<()> {
        let script = sfdisk_script(volume, disk_id);
        debug!(disk = %disk.display(), %script, "writing partition table");
        Cmd::new("sfdisk")
            .arg("--no-reread")
            .arg_path(disk)
            .stdin(script)
            .error_msg("sfdisk failed to write partition table")
            .run_with(self.runner)?;
        Ok(())
    }

    /// Copy every part image of `volume` into `disk` at its structure offset.
    pub fn splice_part_images(&self, volume: &Volume, volumes_dir: &Path, disk: &Path) -> Result<()> {
        for (index, structure) in volume.structures.iter().enumerate() {
            let part = part_image_path(volumes_dir, &volume.name, index);
            println!(
                "  Writing {} at offset {}...",
                structure.name, structure.start_offset
            );
            self.fs
                .copy_range(&part, disk, structure.start_offset, self.block_size)
                .with_context(|| format!("Error writing {} into disk image", part.display()))?;
        }
        Ok(())
    }

    /// Write `bytes` at byte `offset` of an existing `image`.
    pub fn write_value_at(&self, image: &Path, offset: u64, bytes: &[u8]) -> Result<()> {
        let len = self
            .fs
            .file_len(image)
            .context("Failed to write offset to disk")?;
        let end = offset.checked_add(bytes.len() as u64);
        if end.map_or(true, |end| end > len) {
            bail!("write offset beyond end of file");
        }
        self.fs
            .write_at(image, offset, bytes)
            .context("Failed to write offset to disk")
    }

    /// Store the MBR disk signature.
    pub fn write_disk_id(&self, disk: &Path, disk_id: [u8; 4]) -> Result<()> {
        self.write_value_at(disk, MBR_DISK_ID_OFFSET, &disk_id)
    }

    /// Apply every `offset-write` directive of `volume` to `image`.
    ///
    /// The value written is the structure's start sector as a little-endian
    /// u32, at the directive's offset relative to the named structure.
    pub fn write_offset_values(&self, volume: &Volume, image: &Path) -> Result<()> {
        for structure in &volume.structures {
            let Some(directive) = &structure.offset_write else {
                continue;
            };
            let base = match &directive.relative_to {
                Some(name) => match volume.structures.iter().find(|s| &s.name == name) {
                    Some(target) => target.start_offset,
                    None => bail!(
                        "offset-write of '{}' refers to unknown structure '{}'",
                        structure.name,
                        name
                    ),
                },
                None => 0,
            };
            let sector = structure.start_offset / volume.sector_size;
            let value = u32::try_from(sector).with_context(|| {
                format!("start sector of '{}' does not fit in 32 bits", structure.name)
            })?;
            self.write_value_at(image, base + directive.offset, &value.to_le_bytes())?;
        }
        Ok(())
    }
}

/// sfdisk input describing the partitions of `volume`.
///
/// Bare structures (MBR boot code, raw blobs) are not partitions and are
/// left out. A dos label takes its label-id from `disk_id`.
pub fn sfdisk_script(volume: &Volume, disk_id: Option<[u8; 4]>) -> String {
    let sector = volume.sector_size;
    let mut script = String::new();
    let _ = writeln!(script, "label: {}", volume.schema.sfdisk_label());
    if let (Schema::Mbr, Some(id)) = (volume.schema, disk_id) {
        let _ = writeln!(script, "label-id: 0x{:08x}", u32::from_le_bytes(id));
    }
    let _ = writeln!(script, "unit: sectors");
    let _ = writeln!(script, "sector-size: {}", sector);
    script.push('\n');

    for structure in volume.structures.iter().filter(|s| !s.is_bare()) {
        let start = structure.start_offset / sector;
        let size = structure.size.div_ceil(sector);
        let _ = write!(script, "start={}, size={}", start, size);
        match volume.schema {
            Schema::Mbr => {
                let _ = write!(script, ", type={}", structure.mbr_type().unwrap_or("83"));
                if structure.role == Some(Role::SystemBoot) {
                    script.push_str(", bootable");
                }
            }
            Schema::Gpt => {
                let _ = write!(
                    script,
                    ", type={}, name=\"{}\"",
                    structure.gpt_type().unwrap_or(LINUX_DATA_GUID),
                    structure.name
                );
            }
        }
        script.push('\n');
    }

    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::{Filesystem, RelativeOffset, VolumeStructure};
    use crate::host::RealFs;
    use crate::layout::resolve_offsets;
    use crate::testing::{FakeRunner, FaultyFs, FsOp};
    use std::fs;
    use tempfile::TempDir;

    fn pc_volume(schema: Schema) -> Volume {
        let mut volume = Volume::new("pc");
        volume.schema = schema;
        let mut mbr = VolumeStructure::new("mbr", 440);
        mbr.role = Some(Role::Mbr);
        mbr.offset = Some(0);
        let mut boot = VolumeStructure::new("system-boot", 1048576);
        boot.offset = Some(1048576);
        boot.role = Some(Role::SystemBoot);
        boot.filesystem = Some(Filesystem::Vfat);
        boot.type_id = "0C,C12A7328-F81F-11D2-BA4B-00A0C93EC93B".into();
        let mut data = VolumeStructure::new("writable", 2097152);
        data.role = Some(Role::SystemData);
        data.filesystem = Some(Filesystem::Ext4);
        volume.structures = vec![mbr, boot, data];
        resolve_offsets(&mut volume).unwrap();
        volume
    }

    #[test]
    fn test_sfdisk_script_dos() {
        let script = sfdisk_script(&pc_volume(Schema::Mbr), Some([1, 2, 3, 4]));
        assert_eq!(
            script,
            "label: dos\n\
             label-id: 0x04030201\n\
             unit: sectors\n\
             sector-size: 512\n\
             \n\
             start=2048, size=2048, type=0C, bootable\n\
             start=4096, size=4096, type=83\n"
        );
    }

    #[test]
    fn test_sfdisk_script_gpt() {
        let script = sfdisk_script(&pc_volume(Schema::Gpt), None);
        assert!(script.starts_with("label: gpt\nunit: sectors\n"));
        assert!(script.contains(
            "start=2048, size=2048, type=C12A7328-F81F-11D2-BA4B-00A0C93EC93B, name=\"system-boot\""
        ));
        assert!(script.contains(&format!("type={}, name=\"writable\"", LINUX_DATA_GUID)));
        assert!(!script.contains("label-id"));
    }

    #[test]
    fn test_write_partition_table_feeds_stdin() {
        let temp = TempDir::new().unwrap();
        let disk = temp.path().join("pc.img");
        let runner = FakeRunner::new();
        let writer = ImageWriter::new(&RealFs, &runner);

        writer
            .write_partition_table(&pc_volume(Schema::Mbr), &disk, Some([0, 0, 0, 1]))
            .unwrap();

        let log = runner.log();
        let cmds = log.borrow();
        assert_eq!(cmds[0].to_string(), format!("sfdisk --no-reread {}", disk.display()));
        let stdin = String::from_utf8(cmds[0].get_stdin().unwrap().to_vec()).unwrap();
        assert!(stdin.contains("label-id: 0x01000000"));
    }

    #[test]
    fn test_write_value_at_bounds() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("disk.img");
        fs::write(&image, vec![0u8; 16]).unwrap();
        let runner = FakeRunner::new();
        let writer = ImageWriter::new(&RealFs, &runner);

        writer.write_value_at(&image, 12, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&fs::read(&image).unwrap()[12..], &[1, 2, 3, 4]);

        let err = writer.write_value_at(&image, 13, &[1, 2, 3, 4]).unwrap_err();
        assert_eq!(err.to_string(), "write offset beyond end of file");
        assert_eq!(fs::read(&image).unwrap().len(), 16);
    }

    #[test]
    fn test_write_value_at_failure() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("disk.img");
        fs::write(&image, vec![0u8; 16]).unwrap();
        let runner = FakeRunner::new();
        let faulty = FaultyFs::failing(FsOp::WriteAt);
        let writer = ImageWriter::new(&faulty, &runner);

        let err = writer.write_value_at(&image, 0, &[1]).unwrap_err();
        assert_eq!(err.to_string(), "Failed to write offset to disk");
    }

    #[test]
    fn test_write_offset_values() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("pc.img");
        fs::write(&image, vec![0u8; 1024]).unwrap();
        let mut volume = pc_volume(Schema::Mbr);
        volume.structures[1].offset_write = Some(RelativeOffset {
            relative_to: Some("mbr".into()),
            offset: 92,
        });
        let runner = FakeRunner::new();
        let writer = ImageWriter::new(&RealFs, &runner);

        writer.write_offset_values(&volume, &image).unwrap();

        let bytes = fs::read(&image).unwrap();
        assert_eq!(&bytes[92..96], &2048u32.to_le_bytes());
    }

    #[test]
    fn test_splice_part_images() {
        let temp = TempDir::new().unwrap();
        let volumes = temp.path().join("volumes");
        fs::create_dir_all(volumes.join("pc")).unwrap();
        let mut volume = Volume::new("pc");
        volume.schema = Schema::Mbr;
        volume.structures = vec![VolumeStructure::new("a", 4), VolumeStructure::new("b", 4)];
        resolve_offsets(&mut volume).unwrap();
        fs::write(part_image_path(&volumes, "pc", 0), b"AAAA").unwrap();
        fs::write(part_image_path(&volumes, "pc", 1), b"BBBB").unwrap();
        let disk = temp.path().join("pc.img");
        let runner = FakeRunner::new();
        let writer = ImageWriter::new(&RealFs, &runner);

        writer.create_disk(&disk, 12).unwrap();
        writer.splice_part_images(&volume, &volumes, &disk).unwrap();

        assert_eq!(fs::read(&disk).unwrap(), b"AAAABBBB\0\0\0\0");
    }
}
