//! Gadget volume model.
//!
//! A gadget describes one or more disk images ([`Volume`]s), each made of
//! ordered [`VolumeStructure`]s. The model arrives already validated from a
//! [`GadgetLoader`]; after loading, the only mutations are offset resolution
//! and the system-data size correction.

pub mod load;

pub use load::{GadgetLoader, StaticGadgetLoader, TomlGadgetLoader};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Default logical sector size.
pub const DEFAULT_SECTOR_SIZE: u64 = 512;

/// All volumes of a gadget, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct GadgetInfo {
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl GadgetInfo {
    pub fn volume(&self, name: &str) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Volume {
    pub name: String,
    #[serde(default)]
    pub schema: Schema,
    #[serde(default)]
    pub bootloader: Bootloader,
    #[serde(default = "default_sector_size")]
    pub sector_size: u64,
    #[serde(default, rename = "structure")]
    pub structures: Vec<VolumeStructure>,
}

fn default_sector_size() -> u64 {
    DEFAULT_SECTOR_SIZE
}

impl Volume {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            schema: Schema::default(),
            bootloader: Bootloader::default(),
            sector_size: DEFAULT_SECTOR_SIZE,
            structures: Vec::new(),
        }
    }

    /// Index of the structure with the given role.
    pub fn find_role(&self, role: Role) -> Option<usize> {
        self.structures.iter().position(|s| s.role == Some(role))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Schema {
    Mbr,
    #[default]
    Gpt,
}

impl Schema {
    /// Label name understood by sfdisk.
    pub fn sfdisk_label(self) -> &'static str {
        match self {
            Schema::Mbr => "dos",
            Schema::Gpt => "gpt",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bootloader {
    #[default]
    None,
    #[serde(rename = "u-boot")]
    UBoot,
    Piboot,
    Lk,
    Grub,
}

impl fmt::Display for Bootloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Bootloader::None => "none",
            Bootloader::UBoot => "u-boot",
            Bootloader::Piboot => "piboot",
            Bootloader::Lk => "lk",
            Bootloader::Grub => "grub",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Filesystem {
    Vfat,
    #[serde(rename = "vfat-16")]
    Vfat16,
    #[serde(rename = "vfat-32")]
    Vfat32,
    Ext4,
}

impl Filesystem {
    pub fn is_vfat(self) -> bool {
        matches!(self, Filesystem::Vfat | Filesystem::Vfat16 | Filesystem::Vfat32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Mbr,
    SystemBoot,
    SystemData,
    SystemSeed,
    SystemSave,
}

/// Where to write a structure's sector offset, relative to another structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RelativeOffset {
    /// Structure name; absolute from the start of the volume when unset.
    #[serde(default)]
    pub relative_to: Option<String>,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct VolumeStructure {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub offset_write: Option<RelativeOffset>,
    pub size: u64,
    #[serde(default)]
    pub filesystem: Option<Filesystem>,
    #[serde(default)]
    pub filesystem_label: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    /// Partition type: MBR hex code and/or GPT GUID, `"83,0FC63DAF-..."`.
    #[serde(default, rename = "type")]
    pub type_id: String,
    #[serde(default)]
    pub content: Vec<ContentItem>,
    /// Resolved absolute offset in bytes.
    #[serde(default)]
    pub start_offset: u64,
}

impl VolumeStructure {
    pub fn new(name: &str, size: u64) -> Self {
        Self {
            name: name.to_string(),
            offset: None,
            offset_write: None,
            size,
            filesystem: None,
            filesystem_label: None,
            role: None,
            type_id: String::new(),
            content: Vec::new(),
            start_offset: 0,
        }
    }

    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.size
    }

    pub fn has_filesystem(&self) -> bool {
        self.filesystem.is_some()
    }

    pub fn is_system_data(&self) -> bool {
        self.role == Some(Role::SystemData)
    }

    /// Raw structures that live outside any partition entry.
    pub fn is_bare(&self) -> bool {
        self.role == Some(Role::Mbr) || self.type_id == "bare"
    }

    /// Label for the filesystem, falling back to the structure name.
    pub fn label(&self) -> &str {
        match (&self.filesystem_label, self.role) {
            (Some(label), _) => label,
            (None, Some(Role::SystemData)) => "writable",
            (None, Some(Role::SystemBoot)) => "system-boot",
            (None, _) => &self.name,
        }
    }

    /// MBR partition type code from `type`.
    pub fn mbr_type(&self) -> Option<&str> {
        self.type_id
            .split(',')
            .map(str::trim)
            .find(|part| part.len() <= 2 && !part.is_empty())
    }

    /// GPT partition type GUID from `type`.
    pub fn gpt_type(&self) -> Option<&str> {
        self.type_id
            .split(',')
            .map(str::trim)
            .find(|part| part.len() == 36)
    }
}

/// One content entry of a structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentItem {
    /// Copy a file or directory from the gadget tree into a filesystem.
    File { source: PathBuf, target: PathBuf },
    /// Raw blob placed inside a bare structure.
    Image {
        image: PathBuf,
        #[serde(default)]
        offset: Option<u64>,
        #[serde(default)]
        size: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_fallbacks() {
        let mut s = VolumeStructure::new("ubuntu-seed", 1024);
        assert_eq!(s.label(), "ubuntu-seed");
        s.role = Some(Role::SystemData);
        assert_eq!(s.label(), "writable");
        s.filesystem_label = Some("rootfs".into());
        assert_eq!(s.label(), "rootfs");
    }

    #[test]
    fn test_partition_type_parts() {
        let mut s = VolumeStructure::new("data", 1);
        s.type_id = "83,0FC63DAF-8483-4772-8E79-3D69D8477DE4".into();
        assert_eq!(s.mbr_type(), Some("83"));
        assert_eq!(s.gpt_type(), Some("0FC63DAF-8483-4772-8E79-3D69D8477DE4"));

        s.type_id = "0C".into();
        assert_eq!(s.mbr_type(), Some("0C"));
        assert_eq!(s.gpt_type(), None);
    }

    #[test]
    fn test_find_role() {
        let mut v = Volume::new("pc");
        v.structures.push(VolumeStructure::new("mbr", 440));
        let mut data = VolumeStructure::new("writable", 4096);
        data.role = Some(Role::SystemData);
        v.structures.push(data);
        assert_eq!(v.find_role(Role::SystemData), Some(1));
        assert_eq!(v.find_role(Role::SystemBoot), None);
    }
}
