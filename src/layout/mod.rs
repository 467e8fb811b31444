//! Disk-layout arithmetic.
//!
//! Turns the logical structure list of a [`Volume`] into absolute byte
//! offsets and image sizes. Everything here is pure except
//! [`rootfs::calculate_dir_size`] (directory walk) and
//! [`disk_id::generate_unique_disk_id`] (entropy).

pub mod disk_id;
pub mod rootfs;

pub use disk_id::generate_unique_disk_id;
pub use rootfs::{calculate_dir_size, iec_string, reconcile_rootfs_size, RootfsSizeWarning};

use crate::gadget::{GadgetInfo, Schema, Volume, VolumeStructure};
use anyhow::{bail, Result};

/// Sectors sfdisk needs at the end of a GPT disk for the backup table.
pub const GPT_BACKUP_SECTORS: u64 = 33;

/// Numeric maximum of two offsets.
pub fn max_offset(a: u64, b: u64) -> u64 {
    if a > b {
        a
    } else {
        b
    }
}

/// Round `value` up to a multiple of `align`. An `align` of 0 leaves it as is.
pub fn align_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align).saturating_mul(align)
}

/// Explicit offset of a structure, 0 when the gadget leaves it unset.
pub fn get_structure_offset(structure: &VolumeStructure) -> u64 {
    structure.offset.unwrap_or(0)
}

/// Assign `start_offset` to every structure of `volume`.
///
/// A structure without an explicit offset starts where the previous one
/// ends. Explicit offsets must not point back into a previous structure.
pub fn resolve_offsets(volume: &mut Volume) -> Result<()> {
    let mut cursor = 0u64;
    let mut previous: Option<String> = None;

    for structure in &mut volume.structures {
        let start = if structure.offset.is_some() {
            get_structure_offset(structure)
        } else {
            cursor
        };
        if start < cursor {
            bail!(
                "structure '{}' at offset {} overlaps structure '{}' ending at {} in volume '{}'",
                structure.name,
                start,
                previous.as_deref().unwrap_or_default(),
                cursor,
                volume.name
            );
        }
        let end = start
            .checked_add(structure.size)
            .ok_or_else(|| anyhow::anyhow!("structure '{}' extends past 2^64 bytes", structure.name))?;

        structure.start_offset = start;
        cursor = max_offset(cursor, end);
        previous = Some(structure.name.clone());
    }

    Ok(())
}

/// Bytes needed to hold every structure of `volume` in whole sectors, plus
/// the GPT backup table for GPT volumes.
pub fn volume_size(volume: &Volume) -> u64 {
    let end = volume
        .structures
        .iter()
        .map(VolumeStructure::end_offset)
        .fold(0, max_offset);
    let end = align_up(end, volume.sector_size);
    match volume.schema {
        Schema::Gpt => end + GPT_BACKUP_SECTORS * volume.sector_size,
        Schema::Mbr => end,
    }
}

/// Total bytes of all volume images of the gadget.
pub fn calculate_image_size(gadget: Option<&GadgetInfo>) -> Result<u64> {
    let Some(gadget) = gadget else {
        bail!("Cannot calculate image size before initializing GadgetInfo");
    };
    Ok(gadget.volumes.iter().map(volume_size).sum())
}
