//! Image artifacts.
//!
//! - [`disk`] - part images, partition tables and the final `<volume>.img`
//! - [`filesystem`] - tree copies preserving symlinks and device nodes
//! - [`manifest`] - `seed.manifest` and `filesystem.manifest`

pub mod disk;
pub mod filesystem;
pub mod manifest;
