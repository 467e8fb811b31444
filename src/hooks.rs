//! User hook scripts.
//!
//! For every hooks directory, `<dir>/<hook>.d/*` run in name order, then
//! `<dir>/<hook>` itself. Only executable regular files run.

use crate::host::FileOps;
use crate::process::{Cmd, CommandRunner};
use anyhow::{Context, Result};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Hook run after the rootfs has been staged.
pub const POST_POPULATE_ROOTFS: &str = "post-populate-rootfs";

/// Environment variable holding the staged rootfs path.
pub const HOOK_ROOTFS_ENV: &str = "UBUNTU_IMAGE_HOOK_ROOTFS";

pub struct HookRunner<'a> {
    fs: &'a dyn FileOps,
    runner: &'a dyn CommandRunner,
    dirs: &'a [PathBuf],
}

impl<'a> HookRunner<'a> {
    pub fn new(fs: &'a dyn FileOps, runner: &'a dyn CommandRunner, dirs: &'a [PathBuf]) -> Self {
        Self { fs, runner, dirs }
    }

    pub fn run_hooks(&self, hook_name: &str, env_key: &str, env_value: &Path) -> Result<()> {
        for dir in self.dirs {
            let hook_d = dir.join(format!("{}.d", hook_name));
            match self.fs.read_dir(&hook_d) {
                Ok(entries) => {
                    for entry in entries {
                        self.run_one(&entry, env_key, env_value)?;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Error reading hooks directory {}", hook_d.display())
                    })
                }
            }

            let single = dir.join(hook_name);
            if single.exists() {
                self.run_one(&single, env_key, env_value)?;
            }
        }
        Ok(())
    }

    fn run_one(&self, hook: &Path, env_key: &str, env_value: &Path) -> Result<()> {
        if !is_executable_file(hook) {
            debug!(hook = %hook.display(), "skipping non-executable hook");
            return Ok(());
        }
        println!("Running hook script: {}", hook.display());
        Cmd::new(hook.as_os_str())
            .env(env_key, env_value.as_os_str())
            .run_with(self.runner)
            .with_context(|| format!("Error running hook {}", hook.display()))?;
        Ok(())
    }
}

fn is_executable_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
