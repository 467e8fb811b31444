//! Step tables.

use super::{classic, common, snap, StateMachine};
use anyhow::{bail, Result};

pub type StepFn = fn(&mut StateMachine) -> Result<()>;

/// One named unit of work.
#[derive(Clone, Copy)]
pub struct Step {
    /// 1-based position in the table.
    pub index: usize,
    pub name: &'static str,
    pub run: StepFn,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("index", &self.index)
            .field("name", &self.name)
            .finish()
    }
}

/// Fixed, ordered step list of one image variant.
#[derive(Debug, Clone)]
pub struct StepTable {
    steps: Vec<Step>,
}

const SNAP_STEPS: &[(&str, StepFn)] = &[
    ("make_temporary_directories", common::make_temporary_directories),
    ("prepare_image", snap::prepare_image),
    ("load_gadget_yaml", common::load_gadget_yaml),
    ("populate_rootfs_contents", snap::populate_rootfs_contents),
    ("generate_disk_info", common::generate_disk_info),
    ("calculate_rootfs_size", common::calculate_rootfs_size),
    ("populate_bootfs_contents", common::populate_bootfs_contents),
    ("populate_prepare_partitions", common::populate_prepare_partitions),
    ("make_disk", common::make_disk),
    ("generate_snap_manifest", snap::generate_snap_manifest),
    ("finish", common::finish),
];

const CLASSIC_STEPS: &[(&str, StepFn)] = &[
    ("make_temporary_directories", common::make_temporary_directories),
    ("prepare_gadget_tree", classic::prepare_gadget_tree),
    ("load_gadget_yaml", common::load_gadget_yaml),
    ("germinate", classic::germinate),
    ("create_chroot", classic::create_chroot),
    ("install_packages", classic::install_packages),
    ("populate_rootfs_contents", classic::populate_rootfs_contents),
    ("generate_disk_info", common::generate_disk_info),
    ("calculate_rootfs_size", common::calculate_rootfs_size),
    ("populate_bootfs_contents", common::populate_bootfs_contents),
    ("populate_prepare_partitions", common::populate_prepare_partitions),
    ("make_disk", common::make_disk),
    ("generate_package_manifest", classic::generate_package_manifest),
    ("finish", common::finish),
];

impl StepTable {
    fn from_defs(defs: &[(&'static str, StepFn)]) -> Self {
        let steps = defs
            .iter()
            .enumerate()
            .map(|(i, (name, run))| Step {
                index: i + 1,
                name: *name,
                run: *run,
            })
            .collect();
        Self { steps }
    }

    pub fn snap() -> Self {
        Self::from_defs(SNAP_STEPS)
    }

    pub fn classic() -> Self {
        Self::from_defs(CLASSIC_STEPS)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step at 1-based `index`.
    pub fn get(&self, index: usize) -> Option<&Step> {
        index.checked_sub(1).and_then(|i| self.steps.get(i))
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps.iter().map(|s| s.name)
    }

    /// Resolve a step given by name or 1-based number to its index.
    pub fn resolve(&self, step: &str) -> Result<usize> {
        if let Ok(number) = step.parse::<usize>() {
            if number == 0 || number > self.steps.len() {
                bail!(
                    "step number {} is out of range, valid steps are 1 to {}",
                    number,
                    self.steps.len()
                );
            }
            return Ok(number);
        }
        match self.steps.iter().find(|s| s.name == step) {
            Some(s) => Ok(s.index),
            None => bail!("{} is not a valid state name", step),
        }
    }
}
