//! Build options.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

/// Flags controlling which steps run and where their state lives.
#[derive(Debug, Clone, Default)]
pub struct StateMachineFlags {
    pub workdir: Option<PathBuf>,
    pub until: Option<String>,
    pub thru: Option<String>,
    pub resume: bool,
}

/// Options shared by snap and classic builds.
#[derive(Debug, Clone, Default)]
pub struct CommonOptions {
    pub hooks_directories: Vec<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub image_size: Option<String>,
    pub image_file_list: Option<PathBuf>,
    pub cloud_init: Option<PathBuf>,
    pub disk_info: Option<PathBuf>,
    pub debug: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SnapOptions {
    pub model_assertion: PathBuf,
    pub channel: Option<String>,
    pub snaps: Vec<String>,
    pub disable_console_conf: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ClassicOptions {
    pub gadget_tree: PathBuf,
    pub image_definition: PathBuf,
    /// Prebuilt rootfs used instead of germinate/debootstrap/apt.
    pub filesystem: Option<PathBuf>,
}

/// Parse `N`, `NM` (MiB) or `NG` (GiB) into bytes.
pub fn parse_size(value: &str) -> Result<u64> {
    let value = value.trim();
    let (digits, multiplier) = match value.as_bytes().last() {
        Some(b'M') => (&value[..value.len() - 1], 1u64 << 20),
        Some(b'G') => (&value[..value.len() - 1], 1u64 << 30),
        _ => (value, 1),
    };
    let number: u64 = digits
        .parse()
        .with_context(|| format!("invalid size '{}'", value))?;
    number
        .checked_mul(multiplier)
        .with_context(|| format!("size '{}' is too large", value))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSelector {
    Name(String),
    Index(usize),
}

/// Requested disk image sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSizeRequest {
    /// One size for every volume.
    All(u64),
    PerVolume(Vec<(VolumeSelector, u64)>),
}

impl ImageSizeRequest {
    /// `N[M|G]` or `<volume>:N[M|G],...` with volumes named or numbered
    /// from 0.
    pub fn parse(value: &str) -> Result<Self> {
        if !value.contains(':') {
            return Ok(Self::All(parse_size(value)?));
        }
        let mut sizes = Vec::new();
        for entry in value.split(',') {
            let Some((volume, size)) = entry.split_once(':') else {
                bail!("invalid image size entry '{}', expected <volume>:<size>", entry);
            };
            let selector = match volume.parse::<usize>() {
                Ok(index) => VolumeSelector::Index(index),
                Err(_) => VolumeSelector::Name(volume.to_string()),
            };
            sizes.push((selector, parse_size(size)?));
        }
        Ok(Self::PerVolume(sizes))
    }

    /// Requested size of the volume at `index` named `name`.
    pub fn for_volume(&self, index: usize, name: &str) -> Option<u64> {
        match self {
            Self::All(size) => Some(*size),
            Self::PerVolume(sizes) => sizes.iter().find_map(|(selector, size)| {
                let matches = match selector {
                    VolumeSelector::Index(i) => *i == index,
                    VolumeSelector::Name(n) => n == name,
                };
                matches.then_some(*size)
            }),
        }
    }
}
