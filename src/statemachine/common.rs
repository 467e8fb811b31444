//! Steps shared by snap and classic builds.

use super::options::VolumeSelector;
use super::{ImageKind, ImageSizeRequest, StateMachine, WorkDir};
use crate::artifact::disk::{part_content_dir, part_image_path, ImageWriter, PartitionSources};
use crate::artifact::filesystem::copy_dir_recursive;
use crate::bootloader::stage_bootloader;
use crate::gadget::{ContentItem, Role, Schema};
use crate::hooks::{HookRunner, HOOK_ROOTFS_ENV, POST_POPULATE_ROOTFS};
use crate::layout::{self, calculate_dir_size, generate_unique_disk_id, iec_string};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub(super) fn make_temporary_directories(sm: &mut StateMachine) -> Result<()> {
    let dirs = sm.dirs()?;
    for dir in dirs.all() {
        sm.host
            .fs
            .create_dir_all(dir)
            .with_context(|| format!("Error creating temporary directory {}", dir.display()))?;
    }

    let output_dir = match (&sm.common.output_dir, &sm.workdir) {
        (Some(dir), _) => dir.clone(),
        (None, Some(WorkDir::Persistent(workdir))) => workdir.clone(),
        (None, _) => std::env::current_dir().context("Error reading current directory")?,
    };
    sm.host
        .fs
        .create_dir_all(&output_dir)
        .with_context(|| format!("Error creating output directory {}", output_dir.display()))?;
    debug!(output_dir = %output_dir.display(), "output directory");
    sm.state.output_dir = Some(output_dir);
    Ok(())
}

/// Load the gadget model, resolve offsets and record the volume order.
pub(super) fn load_gadget_yaml(sm: &mut StateMachine) -> Result<()> {
    let gadget_dir = sm.dirs()?.gadget();
    let mut gadget = sm
        .gadget_loader
        .load(&gadget_dir)
        .context("Error loading gadget model")?;

    for volume in &mut gadget.volumes {
        layout::resolve_offsets(volume)?;
        let bare_system_data = volume
            .structures
            .iter()
            .any(|s| s.is_system_data() && !s.has_filesystem());
        if bare_system_data {
            bail!("system-data structure of volume '{}' has no filesystem", volume.name);
        }
        info!(
            volume = %volume.name,
            structures = volume.structures.len(),
            size = %iec_string(layout::volume_size(volume)),
            "loaded volume"
        );
    }

    sm.state.volume_order = gadget.volumes.iter().map(|v| v.name.clone()).collect();
    sm.state.gadget = Some(gadget);
    Ok(())
}

/// Rootfs directory holding the files the image boots into.
pub(super) fn rootfs_content_dir(sm: &StateMachine) -> Result<PathBuf> {
    let root = sm.dirs()?.root;
    Ok(match sm.kind {
        ImageKind::Snap(_) => root.join("system-data"),
        ImageKind::Classic(_) => root,
    })
}

/// cloud-init seed and `post-populate-rootfs` hooks, after the rootfs
/// tree is in place.
pub(super) fn customize_rootfs(sm: &mut StateMachine) -> Result<()> {
    let content = rootfs_content_dir(sm)?;

    if let Some(cloud_init) = &sm.common.cloud_init {
        let seed = content.join("var/lib/cloud/seed/nocloud-net");
        fs::create_dir_all(&seed)
            .with_context(|| format!("Error creating cloud-init dir {}", seed.display()))?;
        fs::copy(cloud_init, seed.join("user-data"))
            .with_context(|| format!("Error copying cloud-init {}", cloud_init.display()))?;
        fs::write(seed.join("meta-data"), "instance-id: nocloud-static\n")
            .context("Error writing cloud-init meta-data")?;
    }

    let root = sm.dirs()?.root;
    let root = fs::canonicalize(&root).unwrap_or(root);
    HookRunner::new(
        sm.host.fs.as_ref(),
        sm.host.runner.as_ref(),
        &sm.common.hooks_directories,
    )
    .run_hooks(POST_POPULATE_ROOTFS, HOOK_ROOTFS_ENV, &root)
}

pub(super) fn generate_disk_info(sm: &mut StateMachine) -> Result<()> {
    let Some(disk_info) = &sm.common.disk_info else {
        return Ok(());
    };
    let disk_dir = rootfs_content_dir(sm)?.join(".disk");
    fs::create_dir_all(&disk_dir)
        .with_context(|| format!("Failed to create disk info directory {}", disk_dir.display()))?;
    fs::copy(disk_info, disk_dir.join("info"))
        .with_context(|| format!("Failed to copy disk info file {}", disk_info.display()))?;
    Ok(())
}

pub(super) fn calculate_rootfs_size(sm: &mut StateMachine) -> Result<()> {
    let root = sm.dirs()?.root;
    let size = calculate_dir_size(&root)?;
    info!(size = %iec_string(size), "rootfs size");
    sm.state.rootfs_size = size;
    Ok(())
}

/// Stage bootloader assets and gadget file content into the per-structure
/// content dirs.
pub(super) fn populate_bootfs_contents(sm: &mut StateMachine) -> Result<()> {
    let dirs = sm.dirs()?;
    let gadget_dir = dirs.gadget();
    let Some(gadget) = &sm.state.gadget else {
        bail!("gadget model is not loaded");
    };

    for volume in &gadget.volumes {
        let boot_dir = volume
            .find_role(Role::SystemBoot)
            .map(|i| part_content_dir(&dirs.volumes, &volume.name, i));
        stage_bootloader(
            sm.host.fs.as_ref(),
            volume.bootloader,
            &dirs.unpack,
            boot_dir.as_deref(),
        )
        .with_context(|| format!("Error staging {} bootloader", volume.bootloader))?;

        for (index, structure) in volume.structures.iter().enumerate() {
            if !structure.has_filesystem() || structure.is_system_data() {
                continue;
            }
            let target = part_content_dir(&dirs.volumes, &volume.name, index);
            sm.host
                .fs
                .create_dir_all(&target)
                .with_context(|| format!("Error creating {}", target.display()))?;
            for item in &structure.content {
                if let ContentItem::File { source, target: dest } = item {
                    copy_gadget_content(&gadget_dir.join(source), &target.join(relative(dest)))?;
                }
            }
        }
    }
    Ok(())
}

/// Gadget content targets are written as absolute paths inside the
/// filesystem.
fn relative(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

fn copy_gadget_content(source: &Path, dest: &Path) -> Result<()> {
    debug!(source = %source.display(), dest = %dest.display(), "copying gadget content");
    if source.is_dir() {
        return copy_dir_recursive(source, dest);
    }
    // A target ending in '/' names a directory to copy into.
    let dest = if dest.as_os_str().to_string_lossy().ends_with('/') || dest.is_dir() {
        match source.file_name() {
            Some(name) => dest.join(name),
            None => bail!("invalid gadget content source {}", source.display()),
        }
    } else {
        dest.to_path_buf()
    };
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, &dest).with_context(|| {
        format!(
            "Error copying gadget content {} to {}",
            source.display(),
            dest.display()
        )
    })?;
    Ok(())
}

/// Render every structure into its part image.
pub(super) fn populate_prepare_partitions(sm: &mut StateMachine) -> Result<()> {
    let dirs = sm.dirs()?;
    let rootfs_size = sm.state.rootfs_size;
    let Some(gadget) = sm.state.gadget.as_mut() else {
        bail!("gadget model is not loaded");
    };
    let writer = ImageWriter::new(sm.host.fs.as_ref(), sm.host.runner.as_ref());

    for volume in &mut gadget.volumes {
        let volume_dir = dirs.volumes.join(&volume.name);
        sm.host
            .fs
            .create_dir_all(&volume_dir)
            .with_context(|| format!("Error creating {}", volume_dir.display()))?;

        for index in 0..volume.structures.len() {
            let sources = PartitionSources {
                gadget_dir: dirs.gadget(),
                rootfs_dir: dirs.root.clone(),
                rootfs_size,
                content_dir: part_content_dir(&dirs.volumes, &volume.name, index),
            };
            let part_image = part_image_path(&dirs.volumes, &volume.name, index);
            if let Some(warning) =
                writer.copy_structure_content(volume, index, &sources, &part_image)?
            {
                warn!(%warning, "rootfs structure grown");
                println!("{}", warning);
                sm.state.warnings.push(warning.to_string());
            }
        }
    }
    Ok(())
}

/// Assemble `<volume>.img` for every volume.
///
/// Offsets are resolved again because the system-data correction may have
/// grown a structure since `load_gadget_yaml`.
pub(super) fn make_disk(sm: &mut StateMachine) -> Result<()> {
    let dirs = sm.dirs()?;
    let output_dir = sm.output_dir()?.to_path_buf();
    let request = sm.image_size.clone();
    let Some(gadget) = sm.state.gadget.as_mut() else {
        bail!("gadget model is not loaded");
    };

    for volume in &mut gadget.volumes {
        layout::resolve_offsets(volume)
            .with_context(|| format!("Error laying out volume '{}'", volume.name))?;
    }
    let minimum = layout::calculate_image_size(Some(&*gadget))?;
    info!(size = %iec_string(minimum), volumes = gadget.volumes.len(), "disk layout");
    if let Some(ImageSizeRequest::PerVolume(sizes)) = &request {
        for (selector, _) in sizes {
            if let VolumeSelector::Name(name) = selector {
                if gadget.volume(name).is_none() {
                    warn!(volume = %name, "image size given for a volume the gadget does not define");
                }
            }
        }
    }

    let writer = ImageWriter::new(sm.host.fs.as_ref(), sm.host.runner.as_ref());
    sm.state.images.clear();
    for (index, volume) in gadget.volumes.iter().enumerate() {
        let calculated = layout::volume_size(volume);
        let size = match request.as_ref().and_then(|r| r.for_volume(index, &volume.name)) {
            Some(requested) if requested < calculated => {
                let msg = format!(
                    "WARNING: ignoring image size smaller than minimum required size: \
                     vol:{} {} < {}",
                    volume.name, requested, calculated
                );
                warn!("{}", msg);
                println!("{}", msg);
                sm.state.warnings.push(msg);
                calculated
            }
            Some(requested) => requested,
            None => calculated,
        };

        let disk = output_dir.join(format!("{}.img", volume.name));
        println!("Creating {} ({})", disk.display(), iec_string(size));
        writer.create_disk(&disk, size)?;

        let disk_id = match volume.schema {
            Schema::Mbr => Some(generate_unique_disk_id(
                &mut sm.state.disk_ids,
                sm.host.random.as_mut(),
            )?),
            Schema::Gpt => None,
        };
        writer.write_partition_table(volume, &disk, disk_id)?;
        writer.splice_part_images(volume, &dirs.volumes, &disk)?;
        if let Some(id) = disk_id {
            writer.write_disk_id(&disk, id)?;
        }
        writer.write_offset_values(volume, &disk)?;

        sm.state.image_sizes.insert(volume.name.clone(), size);
        sm.state.images.push(disk);
    }
    Ok(())
}

/// Write the image file list and report the produced images.
pub(super) fn finish(sm: &mut StateMachine) -> Result<()> {
    if let Some(list) = &sm.common.image_file_list {
        let mut content = String::new();
        for image in &sm.state.images {
            content.push_str(&image.display().to_string());
            content.push('\n');
        }
        fs::write(list, content)
            .with_context(|| format!("Error writing image file list {}", list.display()))?;
    }
    for image in &sm.state.images {
        println!("  Output: {}", image.display());
    }
    Ok(())
}
