//! Builder for bootable Ubuntu disk images.
//!
//! Two image variants share one resumable pipeline:
//!
//! - **Snap** (Ubuntu Core) - `snap prepare-image` seeds the rootfs from a
//!   model assertion
//! - **Classic** - germinate, debootstrap and apt build the rootfs from an
//!   image definition, or a prebuilt tree is used as-is
//!
//! # Architecture
//!
//! ```text
//! statemachine   step tables, checkpoint/resume, workdir lifecycle
//!     │
//!     ├── gadget       volume/structure model + loaders
//!     ├── layout       offsets, sizes, rootfs size correction, disk IDs
//!     ├── artifact     part images, disk assembly, tree copies, manifests
//!     ├── bootloader   stage bootloader assets into the boot partition
//!     ├── hooks        post-populate-rootfs hook scripts
//!     └── classic      image definition + rootfs tool command lines
//!
//! host / process      FileOps, RandomSource, CommandRunner capabilities
//! ```
//!
//! Every side effect goes through [`host::Host`], so steps can be driven
//! against fault-injecting doubles in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use ubuntu_image::statemachine::{CommonOptions, SnapOptions, StateMachine, StateMachineFlags};
//!
//! let flags = StateMachineFlags {
//!     workdir: Some("/tmp/pc".into()),
//!     until: Some("make_disk".into()),
//!     ..Default::default()
//! };
//! let opts = SnapOptions {
//!     model_assertion: "pc.model".into(),
//!     ..Default::default()
//! };
//! let mut sm = StateMachine::snap(flags, CommonOptions::default(), opts);
//! sm.setup()?;
//! sm.run()?;
//! sm.teardown()?;
//! ```

pub mod artifact;
pub mod bootloader;
pub mod classic;
pub mod gadget;
pub mod hooks;
pub mod host;
pub mod layout;
pub mod preflight;
pub mod process;
pub mod statemachine;

#[cfg(test)]
mod testing;

pub use gadget::{GadgetInfo, Volume, VolumeStructure};
pub use host::Host;
pub use statemachine::{StateMachine, StepTable};
