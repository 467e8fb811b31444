//! Tree copying for rootfs and gadget staging.
//!
//! Rootfs trees come out of `snap prepare-image` and `debootstrap` with
//! device nodes, fifos and dangling symlinks in them, so a plain `fs::copy`
//! walk is not enough.

use anyhow::{Context, Result};
use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::Path;

/// Copy the contents of `src` into `dst`, creating `dst` if needed.
///
/// Symlinks are recreated (not followed), permissions kept, and device or
/// fifo nodes recreated with `mknod`.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .with_context(|| format!("Failed to create directory: {}", dst.display()))?;

    for entry in fs::read_dir(src)
        .with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        copy_special(&src_path, &dst_path)
            .with_context(|| format!("Failed to copy {}", src_path.display()))?;
    }

    Ok(())
}

/// Copy a single filesystem entry of any type from `src` to `dst`.
pub fn copy_special(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        let target = fs::read_link(src)?;
        if dst.symlink_metadata().is_ok() {
            fs::remove_file(dst)?;
        }
        std::os::unix::fs::symlink(&target, dst)
    } else if file_type.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_special(&entry.path(), &dst.join(entry.file_name()))?;
        }
        fs::set_permissions(dst, fs::Permissions::from_mode(meta.mode()))
    } else if file_type.is_file() {
        fs::copy(src, dst).map(|_| ())
    } else if file_type.is_fifo() || file_type.is_char_device() || file_type.is_block_device() {
        mknod(dst, meta.mode(), meta.rdev())
    } else {
        // Sockets are runtime state and are not carried into images.
        Ok(())
    }
}

fn mknod(path: &Path, mode: u32, rdev: u64) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mknod(c_path.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// True if `path` is a directory with no entries.
pub fn dir_is_empty(path: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_dir_recursive() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");

        fs::create_dir_all(src.join("boot/grub")).unwrap();
        fs::write(src.join("boot/grub/grub.cfg"), "menuentry").unwrap();
        fs::write(src.join("README"), "hello").unwrap();
        std::os::unix::fs::symlink("README", src.join("link")).unwrap();

        copy_dir_recursive(&src, &dst).unwrap();

        assert_eq!(
            fs::read_to_string(dst.join("boot/grub/grub.cfg")).unwrap(),
            "menuentry"
        );
        assert!(dst.join("link").is_symlink());
        assert_eq!(
            fs::read_link(dst.join("link")).unwrap().to_str().unwrap(),
            "README"
        );
    }

    #[test]
    fn test_copy_special_keeps_mode() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("hook");
        fs::write(&src, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o755)).unwrap();

        let dst = temp.path().join("copy");
        copy_special(&src, &dst).unwrap();

        assert_eq!(fs::metadata(&dst).unwrap().mode() & 0o777, 0o755);
    }

    #[test]
    fn test_copy_special_recreates_fifo() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("fifo");
        mknod(&src, libc::S_IFIFO | 0o644, 0).unwrap();

        let dst = temp.path().join("fifo-copy");
        copy_special(&src, &dst).unwrap();

        assert!(fs::symlink_metadata(&dst).unwrap().file_type().is_fifo());
    }

    #[test]
    fn test_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(dir_is_empty(temp.path()).unwrap());
        fs::write(temp.path().join("x"), "").unwrap();
        assert!(!dir_is_empty(temp.path()).unwrap());
    }
}
