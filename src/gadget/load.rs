//! Gadget model loaders.

use super::GadgetInfo;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// Source of an already-validated gadget model.
pub trait GadgetLoader {
    /// Load the model for the gadget tree unpacked at `gadget_dir`.
    fn load(&self, gadget_dir: &Path) -> Result<GadgetInfo>;
}

/// Reads `meta/gadget.toml` from the gadget tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlGadgetLoader;

impl TomlGadgetLoader {
    pub const FILE: &'static str = "meta/gadget.toml";

    pub fn parse(content: &str) -> Result<GadgetInfo> {
        let info: GadgetInfo = toml::from_str(content).context("Failed to parse gadget model")?;
        if info.volumes.is_empty() {
            bail!("gadget model defines no volumes");
        }
        for volume in &info.volumes {
            if volume.sector_size == 0 {
                bail!("volume '{}' has a sector size of 0", volume.name);
            }
        }
        Ok(info)
    }
}

impl GadgetLoader for TomlGadgetLoader {
    fn load(&self, gadget_dir: &Path) -> Result<GadgetInfo> {
        let path = gadget_dir.join(Self::FILE);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Error reading gadget model {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("in {}", path.display()))
    }
}

/// Hands out a fixed model regardless of the tree.
#[derive(Debug, Clone)]
pub struct StaticGadgetLoader(pub GadgetInfo);

impl GadgetLoader for StaticGadgetLoader {
    fn load(&self, _gadget_dir: &Path) -> Result<GadgetInfo> {
        Ok(self.0.clone())
    }
}
