//! Bootloader staging.
//!
//! `snap prepare-image` leaves bootloader assets under
//! `unpack/image/boot/<dir>`. Before the boot partition is built they are
//! moved (u-boot, piboot, grub) or copied (lk) to where the partition
//! content is assembled from.

use crate::gadget::Bootloader;
use crate::host::FileOps;
use anyhow::{Context, Result};
use std::io;
use std::path::Path;
use tracing::debug;

/// Stage the bootloader assets of `bootloader`.
///
/// `boot_dir` is the staged content dir of the volume's system-boot
/// structure; u-boot, piboot and grub have nothing to do without one.
pub fn stage_bootloader(
    fs: &dyn FileOps,
    bootloader: Bootloader,
    unpack_dir: &Path,
    boot_dir: Option<&Path>,
) -> Result<()> {
    match bootloader {
        Bootloader::UBoot | Bootloader::Piboot | Bootloader::Grub => match boot_dir {
            Some(boot_dir) => handle_secure_boot(fs, bootloader, unpack_dir, boot_dir),
            None => Ok(()),
        },
        Bootloader::Lk => handle_lk_bootloader(fs, unpack_dir),
        Bootloader::None => Ok(()),
    }
}

/// Move the prepared boot assets into the boot partition content.
pub fn handle_secure_boot(
    fs: &dyn FileOps,
    bootloader: Bootloader,
    unpack_dir: &Path,
    target_dir: &Path,
) -> Result<()> {
    let boot_root = unpack_dir.join("image/boot");
    let (source, dest) = match bootloader {
        Bootloader::UBoot => (boot_root.join("uboot"), target_dir.to_path_buf()),
        Bootloader::Piboot => (boot_root.join("piboot"), target_dir.to_path_buf()),
        Bootloader::Grub => (boot_root.join("grub"), target_dir.join("EFI/ubuntu")),
        Bootloader::Lk | Bootloader::None => return Ok(()),
    };
    if !source.exists() {
        debug!(source = %source.display(), "no boot assets to stage");
        return Ok(());
    }

    fs.create_dir_all(&dest)
        .with_context(|| format!("Error creating ubuntu dir {}", dest.display()))?;
    let entries = fs
        .read_dir(&source)
        .with_context(|| format!("Error reading boot dir {}", source.display()))?;
    for entry in entries {
        let Some(name) = entry.file_name() else {
            continue;
        };
        let to = dest.join(name);
        debug!(from = %entry.display(), to = %to.display(), "moving boot asset");
        fs.rename(&entry, &to)
            .with_context(|| format!("Error copying boot dir {}", entry.display()))?;
    }

    Ok(())
}

/// Copy lk bootloader files into the gadget tree, where the gadget's raw
/// content entries refer to them.
pub fn handle_lk_bootloader(fs: &dyn FileOps, unpack_dir: &Path) -> Result<()> {
    let source = unpack_dir.join("image/boot/lk");
    if !source.exists() {
        return Ok(());
    }

    let gadget_dir = unpack_dir.join("gadget");
    match fs.create_dir(&gadget_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to create gadget dir {}", gadget_dir.display())
            })
        }
    }

    let entries = fs
        .read_dir(&source)
        .with_context(|| format!("Error reading lk bootloader dir {}", source.display()))?;
    for entry in entries {
        fs.copy_special(&entry, &gadget_dir)
            .with_context(|| format!("Error copying lk bootloader dir {}", entry.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RealFs;
    use crate::testing::{FaultyFs, FsOp};
    use std::fs;
    use tempfile::TempDir;

    fn unpack_with(dir: &str) -> (TempDir, std::path::PathBuf) {
        let temp = TempDir::new().unwrap();
        let unpack = temp.path().join("unpack");
        let boot = unpack.join("image/boot").join(dir);
        fs::create_dir_all(&boot).unwrap();
        fs::write(boot.join("grubx64.efi"), "efi").unwrap();
        fs::write(boot.join("grub.cfg"), "cfg").unwrap();
        (temp, unpack)
    }

    #[test]
    fn test_grub_assets_move_to_efi_ubuntu() {
        let (temp, unpack) = unpack_with("grub");
        let target = temp.path().join("part1");

        stage_bootloader(&RealFs, Bootloader::Grub, &unpack, Some(&target)).unwrap();

        assert_eq!(
            fs::read_to_string(target.join("EFI/ubuntu/grubx64.efi")).unwrap(),
            "efi"
        );
        assert!(!unpack.join("image/boot/grub/grubx64.efi").exists());
    }

    #[test]
    fn test_uboot_assets_move_to_target_root() {
        let (temp, unpack) = unpack_with("uboot");
        let target = temp.path().join("part1");

        stage_bootloader(&RealFs, Bootloader::UBoot, &unpack, Some(&target)).unwrap();

        assert!(target.join("grub.cfg").exists());
    }

    #[test]
    fn test_missing_boot_dir_is_noop() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("part1");
        stage_bootloader(&RealFs, Bootloader::Piboot, temp.path(), Some(&target)).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn test_secure_boot_errors() {
        let cases = [
            (FsOp::CreateDirAll, "Error creating ubuntu dir"),
            (FsOp::ReadDir, "Error reading boot dir"),
            (FsOp::Rename, "Error copying boot dir"),
        ];
        for (op, expected) in cases {
            let (temp, unpack) = unpack_with("grub");
            let target = temp.path().join("part1");
            let err = handle_secure_boot(&FaultyFs::failing(op), Bootloader::Grub, &unpack, &target)
                .unwrap_err();
            assert!(
                err.to_string().starts_with(expected),
                "{:?}: {}",
                op,
                err
            );
        }
    }

    #[test]
    fn test_lk_copies_into_gadget_dir() {
        let (_temp, unpack) = unpack_with("lk");
        fs::create_dir_all(unpack.join("gadget")).unwrap();

        stage_bootloader(&RealFs, Bootloader::Lk, &unpack, None).unwrap();

        assert!(unpack.join("gadget/grub.cfg").exists());
        assert!(unpack.join("image/boot/lk/grub.cfg").exists());
    }

    #[test]
    fn test_lk_errors() {
        let cases = [
            (FsOp::CreateDir, "Failed to create gadget dir"),
            (FsOp::ReadDir, "Error reading lk bootloader dir"),
            (FsOp::CopySpecial, "Error copying lk bootloader dir"),
        ];
        for (op, expected) in cases {
            let (_temp, unpack) = unpack_with("lk");
            let err = handle_lk_bootloader(&FaultyFs::failing(op), &unpack).unwrap_err();
            assert!(
                err.to_string().starts_with(expected),
                "{:?}: {}",
                op,
                err
            );
        }
    }
}
