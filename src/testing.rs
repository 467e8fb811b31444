//! Test doubles for the host capabilities.

use crate::host::{FileOps, RandomSource, RealFs};
use crate::process::{Cmd, CmdOutput, CommandRunner};
use anyhow::Result;
use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Records every command and pretends it succeeded, unless its command
/// line contains one of the configured failure patterns.
#[derive(Clone, Default)]
pub struct FakeRunner {
    log: Rc<RefCell<Vec<Cmd>>>,
    fail_on: Vec<String>,
    stdout: Vec<(String, Vec<u8>)>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with status 1 for commands whose text contains `pattern`.
    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.fail_on.push(pattern.to_string());
        self
    }

    /// Answer commands containing `pattern` with `stdout`.
    pub fn stdout(mut self, pattern: &str, stdout: &str) -> Self {
        self.stdout.push((pattern.to_string(), stdout.as_bytes().to_vec()));
        self
    }

    /// Handle to the recorded commands, shared with clones.
    pub fn log(&self) -> Rc<RefCell<Vec<Cmd>>> {
        Rc::clone(&self.log)
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.borrow().iter().map(ToString::to_string).collect()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput> {
        self.log.borrow_mut().push(cmd.clone());
        let line = cmd.to_string();
        let code = if self.fail_on.iter().any(|p| line.contains(p.as_str())) {
            1
        } else {
            0
        };
        let stdout = self
            .stdout
            .iter()
            .find(|(p, _)| line.contains(p.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        cmd.check(CmdOutput {
            code: Some(code),
            stdout,
            stderr: b"fake failure".to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOp {
    CreateDirAll,
    CreateDir,
    ReadDir,
    Rename,
    CopySpecial,
    RemoveDirAll,
    ZeroFill,
    CopyRange,
    WriteAt,
}

/// Real filesystem with one operation forced to fail.
#[derive(Debug, Clone, Copy)]
pub struct FaultyFs {
    pub fail: FsOp,
}

impl FaultyFs {
    pub fn failing(fail: FsOp) -> Self {
        Self { fail }
    }

    fn check(&self, op: FsOp) -> io::Result<()> {
        if op == self.fail {
            return Err(io::Error::other(format!("injected {:?} failure", op)));
        }
        Ok(())
    }
}

impl FileOps for FaultyFs {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.check(FsOp::CreateDirAll)?;
        RealFs.create_dir_all(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        self.check(FsOp::CreateDir)?;
        RealFs.create_dir(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.check(FsOp::ReadDir)?;
        RealFs.read_dir(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.check(FsOp::Rename)?;
        RealFs.rename(from, to)
    }

    fn copy_special(&self, src: &Path, dst_dir: &Path) -> io::Result<()> {
        self.check(FsOp::CopySpecial)?;
        RealFs.copy_special(src, dst_dir)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.check(FsOp::RemoveDirAll)?;
        RealFs.remove_dir_all(path)
    }

    fn zero_fill(&self, path: &Path, len: u64) -> io::Result<()> {
        self.check(FsOp::ZeroFill)?;
        RealFs.zero_fill(path, len)
    }

    fn copy_range(
        &self,
        src: &Path,
        dst: &Path,
        dst_offset: u64,
        block_size: usize,
    ) -> io::Result<u64> {
        self.check(FsOp::CopyRange)?;
        RealFs.copy_range(src, dst, dst_offset, block_size)
    }

    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<()> {
        self.check(FsOp::WriteAt)?;
        RealFs.write_at(path, offset, data)
    }

    fn file_len(&self, path: &Path) -> io::Result<u64> {
        RealFs.file_len(path)
    }
}

/// Returns scripted byte sequences, repeating the last one forever.
#[derive(Debug, Clone)]
pub struct SeqRandom {
    seqs: Vec<Vec<u8>>,
    next: usize,
}

impl SeqRandom {
    pub fn new(seqs: Vec<Vec<u8>>) -> Self {
        Self { seqs, next: 0 }
    }
}

impl RandomSource for SeqRandom {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let idx = self.next.min(self.seqs.len().saturating_sub(1));
        let seq = self
            .seqs
            .get(idx)
            .ok_or_else(|| io::Error::other("no scripted randomness"))?;
        if seq.len() < buf.len() {
            return Err(io::Error::other("scripted randomness too short"));
        }
        buf.copy_from_slice(&seq[..buf.len()]);
        self.next += 1;
        Ok(())
    }
}
