//! Steps specific to classic builds.

use super::common::customize_rootfs;
use super::{ClassicOptions, ImageKind, StateMachine};
use crate::artifact::filesystem::copy_dir_recursive;
use crate::artifact::manifest::write_package_manifest;
use crate::classic::{
    create_ppa_info, generate_apt_cmd, generate_apt_update_cmd, generate_debootstrap_cmd,
    generate_germinate_cmd, get_host_arch, get_qemu_static_for_arch, parse_seed_packages,
    ImageDefinition,
};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const FSTAB: &str = "LABEL=writable / ext4 defaults 0 0\n";

fn options(sm: &StateMachine) -> Result<&ClassicOptions> {
    match &sm.kind {
        ImageKind::Classic(opts) => Ok(opts),
        ImageKind::Snap(_) => bail!("step requires a classic build"),
    }
}

fn definition(sm: &StateMachine) -> Result<&ImageDefinition> {
    sm.image_def
        .as_ref()
        .context("image definition is not loaded")
}

/// Whether the rootfs comes from `--filesystem` instead of being built.
fn prebuilt(sm: &StateMachine) -> Result<bool> {
    Ok(options(sm)?.filesystem.is_some())
}

pub(super) fn prepare_gadget_tree(sm: &mut StateMachine) -> Result<()> {
    let gadget_tree = options(sm)?.gadget_tree.clone();
    let target = sm.dirs()?.gadget();
    copy_dir_recursive(&gadget_tree, &target)
        .with_context(|| format!("Error copying gadget tree {}", gadget_tree.display()))
}

/// Resolve the seeds into the package list installed later.
pub(super) fn germinate(sm: &mut StateMachine) -> Result<()> {
    if prebuilt(sm)? {
        return Ok(());
    }
    let output = sm.dirs()?.scratch.join("germinate");
    sm.host
        .fs
        .create_dir_all(&output)
        .with_context(|| format!("Error creating germinate directory {}", output.display()))?;

    let def = definition(sm)?;
    generate_germinate_cmd(def, &output).run_with(sm.host.runner.as_ref())?;

    let mut packages = Vec::new();
    for seed in &def.rootfs.seed.names {
        let path = output.join(seed);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Error reading seed output {}", path.display()))?;
        for package in parse_seed_packages(&content) {
            if !packages.contains(&package) {
                packages.push(package);
            }
        }
    }
    for package in &def.extra_packages {
        if !packages.contains(package) {
            packages.push(package.clone());
        }
    }
    info!(count = packages.len(), "germinated packages");
    sm.state.packages = packages;
    Ok(())
}

pub(super) fn create_chroot(sm: &mut StateMachine) -> Result<()> {
    if prebuilt(sm)? {
        return Ok(());
    }
    let chroot = sm.dirs()?.chroot;
    generate_debootstrap_cmd(definition(sm)?, &chroot).run_with(sm.host.runner.as_ref())?;
    Ok(())
}

pub(super) fn install_packages(sm: &mut StateMachine) -> Result<()> {
    if prebuilt(sm)? {
        return Ok(());
    }
    let chroot = sm.dirs()?.chroot;
    let def = definition(sm)?;

    if !def.extra_ppas.is_empty() {
        let sources = chroot.join("etc/apt/sources.list.d");
        fs::create_dir_all(&sources)
            .with_context(|| format!("Error creating {}", sources.display()))?;
        for ppa in &def.extra_ppas {
            let (name, contents) = create_ppa_info(ppa, &def.series);
            fs::write(sources.join(&name), format!("{}\n", contents))
                .with_context(|| format!("Error writing PPA source list {}", name))?;
        }
    }

    let arch = def.arch();
    if arch != get_host_arch() {
        if let Some(qemu) = get_qemu_static_for_arch(&arch) {
            copy_qemu_static(qemu, &chroot)?;
        }
    }

    let runner = sm.host.runner.as_ref();
    generate_apt_update_cmd(&chroot).run_with(runner)?;
    if !sm.state.packages.is_empty() {
        generate_apt_cmd(&chroot, &sm.state.packages).run_with(runner)?;
    }
    Ok(())
}

fn copy_qemu_static(qemu: &str, chroot: &Path) -> Result<()> {
    let src = Path::new("/usr/bin").join(qemu);
    let dst_dir = chroot.join("usr/bin");
    debug!(qemu, "copying emulator into chroot");
    fs::create_dir_all(&dst_dir)
        .with_context(|| format!("Error creating {}", dst_dir.display()))?;
    fs::copy(&src, dst_dir.join(qemu))
        .with_context(|| format!("Error copying {} into chroot", src.display()))?;
    Ok(())
}

pub(super) fn populate_rootfs_contents(sm: &mut StateMachine) -> Result<()> {
    let dirs = sm.dirs()?;
    let src = match &options(sm)?.filesystem {
        Some(filesystem) => filesystem.clone(),
        None => dirs.chroot.clone(),
    };

    let entries = sm
        .host
        .fs
        .read_dir(&src)
        .with_context(|| format!("Error reading rootfs source {}", src.display()))?;
    for entry in entries {
        sm.host
            .fs
            .copy_special(&entry, &dirs.root)
            .with_context(|| format!("Error copying rootfs entry {}", entry.display()))?;
    }

    let etc = dirs.root.join("etc");
    fs::create_dir_all(&etc).with_context(|| format!("Error creating {}", etc.display()))?;
    fs::write(etc.join("fstab"), FSTAB).context("Error writing fstab")?;

    customize_rootfs(sm)
}

pub(super) fn generate_package_manifest(sm: &mut StateMachine) -> Result<()> {
    let root = sm.dirs()?.root;
    let path = write_package_manifest(sm.host.runner.as_ref(), &root, sm.output_dir()?)?;
    println!("  Manifest: {}", path.display());
    Ok(())
}
