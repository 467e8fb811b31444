//! Persisted build progress.
//!
//! `ubuntu-image.json` in the working directory records the last completed
//! step and everything later steps need, so a later process can `--resume`.

use crate::gadget::GadgetInfo;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::warn;

pub const CHECKPOINT_FILE: &str = "ubuntu-image.json";
pub const CHECKPOINT_SCHEMA: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Snap,
    Classic,
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Variant::Snap => "snap",
            Variant::Classic => "classic",
        })
    }
}

/// State produced by steps and consumed by later ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    pub gadget: Option<GadgetInfo>,
    pub volume_order: Vec<String>,
    pub rootfs_size: u64,
    pub disk_ids: Vec<[u8; 4]>,
    pub image_sizes: BTreeMap<String, u64>,
    pub images: Vec<PathBuf>,
    pub packages: Vec<String>,
    pub output_dir: Option<PathBuf>,
    /// Warnings printed so far, kept so a resumed build still reports them.
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub schema: u32,
    pub variant: Variant,
    pub last_completed_step: usize,
    pub last_completed_step_name: String,
    pub workdir: PathBuf,
    pub until: Option<String>,
    pub thru: Option<String>,
    pub resume: bool,
    pub updated_at_utc: String,
    pub build: BuildState,
}

impl Checkpoint {
    pub fn path(workdir: &Path) -> PathBuf {
        workdir.join(CHECKPOINT_FILE)
    }

    pub fn read(workdir: &Path) -> Result<Self> {
        let path = Self::path(workdir);
        if !path.exists() {
            bail!(
                "no saved state in {}, cannot resume",
                workdir.display()
            );
        }
        let content = fs::read(&path)
            .with_context(|| format!("reading checkpoint '{}'", path.display()))?;
        let checkpoint: Self = serde_json::from_slice(&content)
            .with_context(|| format!("parsing checkpoint '{}'", path.display()))?;
        if checkpoint.schema != CHECKPOINT_SCHEMA {
            bail!(
                "checkpoint '{}' has schema {}, expected {}",
                path.display(),
                checkpoint.schema,
                CHECKPOINT_SCHEMA
            );
        }
        Ok(checkpoint)
    }

    /// Write the checkpoint durably: temp file, fsync, rename.
    pub fn write(&self) -> Result<()> {
        let path = Self::path(&self.workdir);
        write_json_atomic(&path, self)
            .with_context(|| format!("writing checkpoint '{}'", path.display()))
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path without parent '{}'", path.display()))?;
    let tmp = path.with_extension(format!("json.tmp-{}", std::process::id()));
    let payload = serde_json::to_vec_pretty(value).context("serializing checkpoint")?;
    fs::write(&tmp, payload).with_context(|| format!("writing temp file '{}'", tmp.display()))?;
    fs::File::open(&tmp)
        .and_then(|f| f.sync_all())
        .with_context(|| format!("syncing temp file '{}'", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| {
        format!(
            "renaming temp file '{}' to '{}'",
            tmp.display(),
            path.display()
        )
    })?;
    if let Err(e) = sync_dir(parent) {
        warn!(dir = %parent.display(), error = %e, "failed to sync checkpoint directory");
    }
    Ok(())
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

pub fn now_utc() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}
