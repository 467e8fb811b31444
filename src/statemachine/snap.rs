//! Steps specific to snap (Ubuntu Core) builds.

use super::common::{customize_rootfs, rootfs_content_dir};
use super::{ImageKind, StateMachine};
use crate::artifact::manifest::write_snap_manifest;
use crate::process::Cmd;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

pub(super) fn prepare_image(sm: &mut StateMachine) -> Result<()> {
    let ImageKind::Snap(opts) = &sm.kind else {
        bail!("prepare_image requires a snap build");
    };
    let unpack = sm.dirs()?.unpack;

    let mut cmd = Cmd::new("snap").arg("prepare-image");
    if let Some(channel) = &opts.channel {
        cmd = cmd.args(["--channel", channel.as_str()]);
    }
    for snap in &opts.snaps {
        cmd = cmd.args(["--snap", snap.as_str()]);
    }
    cmd.arg_path(&opts.model_assertion)
        .arg_path(&unpack)
        .error_msg("Error preparing image")
        .run_with(sm.host.runner.as_ref())?;
    Ok(())
}

/// Seed the rootfs from the prepared image tree.
pub(super) fn populate_rootfs_contents(sm: &mut StateMachine) -> Result<()> {
    let ImageKind::Snap(opts) = &sm.kind else {
        bail!("populate_rootfs_contents requires a snap build");
    };
    let disable_console_conf = opts.disable_console_conf;
    let src = sm.dirs()?.unpack.join("image");
    let dst = rootfs_content_dir(sm)?;

    sm.host
        .fs
        .create_dir_all(&dst)
        .with_context(|| format!("Error creating {}", dst.display()))?;
    let entries = sm
        .host
        .fs
        .read_dir(&src)
        .with_context(|| format!("Error reading unpack dir {}", src.display()))?;
    for entry in entries {
        sm.host.fs.copy_special(&entry, &dst).with_context(|| {
            format!("Error copying rootfs entry {}", entry.display())
        })?;
    }

    if disable_console_conf {
        let marker = dst.join("var/lib/console-conf/complete");
        if let Some(parent) = marker.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Error creating {}", parent.display()))?;
        }
        fs::write(&marker, "").context("Error disabling console-conf")?;
    }

    customize_rootfs(sm)
}

/// Seed directory of a prepared image, for either seed layout.
fn seed_snaps_dir(sm: &StateMachine) -> Result<Option<PathBuf>> {
    let unpack = sm.dirs()?.unpack;
    let candidates = [
        unpack.join("image/var/lib/snapd/seed/snaps"),
        unpack.join("system-seed/snaps"),
    ];
    Ok(candidates.into_iter().find(|dir| dir.is_dir()))
}

pub(super) fn generate_snap_manifest(sm: &mut StateMachine) -> Result<()> {
    let Some(snaps_dir) = seed_snaps_dir(sm)? else {
        debug!("no seeded snaps, skipping seed manifest");
        return Ok(());
    };
    let path = write_snap_manifest(&snaps_dir, sm.output_dir()?)?;
    println!("  Manifest: {}", path.display());
    Ok(())
}
