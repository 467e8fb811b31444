//! Host capabilities used by the build steps.
//!
//! Every side effect the state machine performs goes through one of three
//! capabilities:
//!
//! - [`FileOps`] - directory and image-file operations
//! - [`RandomSource`] - entropy for disk identifiers
//! - [`CommandRunner`] - external tools (snap, mkfs, sfdisk, ...)
//!
//! [`Host::system`] binds the real implementations. Tests construct a
//! [`Host`] with doubles that fail a chosen operation.

pub mod fs;
pub mod random;

pub use fs::{FileOps, RealFs};
pub use random::{OsRandom, RandomSource};

use crate::process::{CommandRunner, SystemRunner};

/// Bundle of the capabilities a build runs against.
pub struct Host {
    pub fs: Box<dyn FileOps>,
    pub runner: Box<dyn CommandRunner>,
    pub random: Box<dyn RandomSource>,
}

impl Host {
    /// Real filesystem, real processes, OS entropy.
    pub fn system() -> Self {
        Self {
            fs: Box::new(RealFs),
            runner: Box::new(SystemRunner),
            random: Box::new(OsRandom),
        }
    }

    pub fn with_fs(mut self, fs: impl FileOps + 'static) -> Self {
        self.fs = Box::new(fs);
        self
    }

    pub fn with_runner(mut self, runner: impl CommandRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    pub fn with_random(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Box::new(random);
        self
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::system()
    }
}
