//! Classic image definition and rootfs construction helpers.
//!
//! A classic build assembles its rootfs on the host: germinate resolves the
//! seed into a package list, debootstrap creates a minimal chroot and apt
//! installs the packages into it. This module only builds the command lines
//! for those tools and interprets their output.

mod commands;
mod host;

pub use commands::{
    create_ppa_info, generate_apt_cmd, generate_apt_update_cmd, generate_debootstrap_cmd,
    generate_germinate_cmd, generate_package_manifest_cmd, parse_seed_packages,
};
pub use host::{get_host_arch, get_host_suite, get_qemu_static_for_arch, parse_version_codename};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// What to build for a classic image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ImageDefinition {
    /// Debian architecture; the host architecture when unset.
    #[serde(default)]
    pub architecture: Option<String>,
    /// Release codename; the host's when unset.
    #[serde(default)]
    pub series: String,
    pub rootfs: Rootfs,
    #[serde(default)]
    pub extra_ppas: Vec<Ppa>,
    #[serde(default)]
    pub extra_packages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Rootfs {
    #[serde(default = "default_flavor")]
    pub flavor: String,
    #[serde(default = "default_mirror")]
    pub mirror: String,
    #[serde(default = "default_components")]
    pub components: Vec<String>,
    pub seed: Seed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Seed {
    pub urls: Vec<String>,
    pub branch: String,
    pub names: Vec<String>,
}

/// An extra PPA, `owner/name`, with optional `user:password` for private ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Ppa {
    pub name: String,
    #[serde(default)]
    pub auth: Option<String>,
}

fn default_flavor() -> String {
    "ubuntu".to_string()
}

fn default_mirror() -> String {
    "http://archive.ubuntu.com/ubuntu/".to_string()
}

fn default_components() -> Vec<String> {
    vec!["main".to_string(), "restricted".to_string()]
}

impl ImageDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Error reading image definition {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut def: Self =
            toml::from_str(content).context("Failed to parse image definition")?;
        if def.series.is_empty() {
            def.series = get_host_suite().context("image definition has no series")?;
        }
        if def.rootfs.seed.urls.is_empty() {
            bail!("image definition has no seed urls");
        }
        for ppa in &def.extra_ppas {
            if !ppa.name.contains('/') {
                bail!("PPA '{}' is not of the form owner/name", ppa.name);
            }
        }
        Ok(def)
    }

    /// Target architecture, falling back to the host's.
    pub fn arch(&self) -> String {
        self.architecture.clone().unwrap_or_else(get_host_arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = r#"
series = "jammy"
architecture = "arm64"
extra-packages = ["ubuntu-server"]
extra-ppas = [{ name = "canonical-foundations/ubuntu-image" }]

[rootfs]
mirror = "http://ports.ubuntu.com/ubuntu/"
components = ["main", "universe"]

[rootfs.seed]
urls = ["git://git.launchpad.net/~ubuntu-core-dev/ubuntu-seeds/+git/"]
branch = "jammy"
names = ["server", "minimal"]
"#;

    #[test]
    fn test_parse_definition() {
        let def = ImageDefinition::parse(DEFINITION).unwrap();
        assert_eq!(def.arch(), "arm64");
        assert_eq!(def.rootfs.flavor, "ubuntu");
        assert_eq!(def.rootfs.components, ["main", "universe"]);
        assert_eq!(def.rootfs.seed.names, ["server", "minimal"]);
        assert_eq!(def.extra_ppas[0].auth, None);
    }

    #[test]
    fn test_parse_rejects_bad_ppa() {
        let content = DEFINITION.replace("canonical-foundations/ubuntu-image", "noslash");
        let err = ImageDefinition::parse(&content).unwrap_err();
        assert!(err.to_string().contains("owner/name"));
    }

    #[test]
    fn test_series_defaults_to_host() {
        let content = DEFINITION.replace("series = \"jammy\"\n", "");
        match get_host_suite() {
            Ok(suite) => assert_eq!(ImageDefinition::parse(&content).unwrap().series, suite),
            Err(_) => assert!(ImageDefinition::parse(&content)
                .unwrap_err()
                .to_string()
                .contains("no series")),
        }
    }

    #[test]
    fn test_arch_defaults_to_host() {
        let content = DEFINITION.replace("architecture = \"arm64\"\n", "");
        let def = ImageDefinition::parse(&content).unwrap();
        assert_eq!(def.arch(), get_host_arch());
    }
}
