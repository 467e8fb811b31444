//! Filesystem capability.
//!
//! Covers the directory operations the bootloader stager and hook runner
//! need, plus the byte-level image file operations of the image writer.

use crate::artifact::filesystem::copy_special;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

pub trait FileOps {
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Create a single directory; fails if it already exists.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Entries of `path`, sorted by file name.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Copy `src` into directory `dst_dir`, keeping its name and file type.
    fn copy_special(&self, src: &Path, dst_dir: &Path) -> io::Result<()>;

    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Replace `path` with a file of `len` zero bytes.
    fn zero_fill(&self, path: &Path, len: u64) -> io::Result<()>;

    /// Copy all of `src` into `dst` starting at byte `dst_offset`, in chunks
    /// of `block_size`. `dst` is created if missing and never truncated.
    fn copy_range(
        &self,
        src: &Path,
        dst: &Path,
        dst_offset: u64,
        block_size: usize,
    ) -> io::Result<u64>;

    /// Write `data` at byte `offset` of an existing file and flush it.
    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<()>;

    fn file_len(&self, path: &Path) -> io::Result<u64>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFs;

impl FileOps for RealFs {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn copy_special(&self, src: &Path, dst_dir: &Path) -> io::Result<()> {
        let name = src.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no file name in '{}'", src.display()),
            )
        })?;
        copy_special(src, &dst_dir.join(name))
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn zero_fill(&self, path: &Path, len: u64) -> io::Result<()> {
        let file = File::create(path)?;
        file.set_len(len)?;
        file.sync_all()
    }

    fn copy_range(
        &self,
        src: &Path,
        dst: &Path,
        dst_offset: u64,
        block_size: usize,
    ) -> io::Result<u64> {
        if block_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid block size 0",
            ));
        }
        let mut input = File::open(src)?;
        let output = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(dst)?;

        let mut buf = vec![0u8; block_size];
        let mut copied = 0u64;
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            output.write_all_at(&buf[..n], dst_offset + copied)?;
            copied += n as u64;
        }
        output.sync_all()?;
        Ok(copied)
    }

    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<()> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        file.write_all_at(data, offset)?;
        file.sync_all()
    }

    fn file_len(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }
}
