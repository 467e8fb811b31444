//! Resumable build state machine.
//!
//! A build is a fixed sequence of named steps ([`StepTable`]). The machine
//! runs a contiguous range of them, checkpointing after each, so that a
//! later invocation with `--resume` and the same working directory picks up
//! where the previous one stopped:
//!
//! ```text
//! setup()     validate flags, resolve workdir, restore checkpoint
//! run()       lock workdir; for each step in range: run, checkpoint
//! teardown()  remove the workdir unless the user supplied it
//! ```

pub mod checkpoint;
mod classic;
mod common;
pub mod options;
mod snap;
pub mod steps;


pub use checkpoint::{BuildState, Checkpoint, Variant};
pub use options::{ClassicOptions, CommonOptions, ImageSizeRequest, SnapOptions, StateMachineFlags};
pub use steps::{Step, StepTable};

use crate::classic::ImageDefinition;
use crate::gadget::{GadgetLoader, TomlGadgetLoader};
use crate::host::Host;
use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

pub const LOCK_FILE: &str = ".ubuntu-image.lock";

/// What kind of image is being built.
#[derive(Debug, Clone)]
pub enum ImageKind {
    Snap(SnapOptions),
    Classic(ClassicOptions),
}

enum WorkDir {
    /// Created by us and removed on teardown.
    Temporary(TempDir),
    /// Supplied with `--workdir`; never removed.
    Persistent(PathBuf),
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            WorkDir::Temporary(dir) => dir.path(),
            WorkDir::Persistent(path) => path,
        }
    }
}

/// Subdirectories of the working directory.
#[derive(Debug, Clone)]
pub struct Dirs {
    pub unpack: PathBuf,
    pub root: PathBuf,
    pub volumes: PathBuf,
    pub scratch: PathBuf,
    pub chroot: PathBuf,
}

impl Dirs {
    fn new(workdir: &Path) -> Self {
        Self {
            unpack: workdir.join("unpack"),
            root: workdir.join("root"),
            volumes: workdir.join("volumes"),
            scratch: workdir.join("scratch"),
            chroot: workdir.join("chroot"),
        }
    }

    pub fn all(&self) -> [&Path; 5] {
        [
            &self.unpack,
            &self.root,
            &self.volumes,
            &self.scratch,
            &self.chroot,
        ]
    }

    pub fn gadget(&self) -> PathBuf {
        self.unpack.join("gadget")
    }
}

pub struct StateMachine {
    pub(crate) flags: StateMachineFlags,
    pub(crate) common: CommonOptions,
    pub(crate) kind: ImageKind,
    pub(crate) host: Host,
    pub(crate) gadget_loader: Box<dyn GadgetLoader>,
    pub(crate) image_def: Option<ImageDefinition>,
    pub(crate) state: BuildState,
    pub(crate) image_size: Option<ImageSizeRequest>,
    steps: StepTable,
    workdir: Option<WorkDir>,
    start: usize,
    end: usize,
    last_completed: usize,
    executed: Vec<&'static str>,
}

impl StateMachine {
    pub fn new(flags: StateMachineFlags, common: CommonOptions, kind: ImageKind) -> Self {
        let steps = match kind {
            ImageKind::Snap(_) => StepTable::snap(),
            ImageKind::Classic(_) => StepTable::classic(),
        };
        Self {
            flags,
            common,
            kind,
            host: Host::system(),
            gadget_loader: Box::new(TomlGadgetLoader),
            image_def: None,
            state: BuildState::default(),
            image_size: None,
            steps,
            workdir: None,
            start: 1,
            end: 0,
            last_completed: 0,
            executed: Vec::new(),
        }
    }

    pub fn snap(flags: StateMachineFlags, common: CommonOptions, opts: SnapOptions) -> Self {
        Self::new(flags, common, ImageKind::Snap(opts))
    }

    pub fn classic(flags: StateMachineFlags, common: CommonOptions, opts: ClassicOptions) -> Self {
        Self::new(flags, common, ImageKind::Classic(opts))
    }

    pub fn with_host(mut self, host: Host) -> Self {
        self.host = host;
        self
    }

    pub fn with_gadget_loader(mut self, loader: impl GadgetLoader + 'static) -> Self {
        self.gadget_loader = Box::new(loader);
        self
    }

    pub fn variant(&self) -> Variant {
        match self.kind {
            ImageKind::Snap(_) => Variant::Snap,
            ImageKind::Classic(_) => Variant::Classic,
        }
    }

    pub fn steps(&self) -> &StepTable {
        &self.steps
    }

    /// Steps run by this process, in order.
    pub fn executed_steps(&self) -> &[&'static str] {
        &self.executed
    }

    pub fn last_completed_step(&self) -> usize {
        self.last_completed
    }

    pub fn build_state(&self) -> &BuildState {
        &self.state
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_ref().map(WorkDir::path)
    }

    pub(crate) fn workdir_path(&self) -> Result<&Path> {
        self.workdir()
            .context("working directory is not set up; call setup() first")
    }

    pub(crate) fn dirs(&self) -> Result<Dirs> {
        Ok(Dirs::new(self.workdir_path()?))
    }

    pub(crate) fn output_dir(&self) -> Result<&Path> {
        self.state
            .output_dir
            .as_deref()
            .context("output directory is not resolved; make_temporary_directories has not run")
    }

    /// Check flag combinations. Nothing is touched on disk.
    pub fn validate_input(&self) -> Result<()> {
        if self.flags.until.is_some() && self.flags.thru.is_some() {
            bail!("cannot specify both --until and --thru");
        }
        if self.flags.resume && self.flags.workdir.is_none() {
            bail!("must specify workdir when using --resume flag");
        }
        if let ImageKind::Classic(opts) = &self.kind {
            if let Some(filesystem) = &opts.filesystem {
                if !filesystem.is_dir() {
                    bail!("filesystem '{}' is not a directory", filesystem.display());
                }
            }
        }
        self.image_size_request()?;
        self.validate_until_thru()
    }

    fn image_size_request(&self) -> Result<Option<ImageSizeRequest>> {
        self.common
            .image_size
            .as_deref()
            .map(ImageSizeRequest::parse)
            .transpose()
            .context("Error parsing --image-size")
    }

    pub fn validate_until_thru(&self) -> Result<()> {
        for step in [&self.flags.until, &self.flags.thru].into_iter().flatten() {
            self.steps.resolve(step)?;
        }
        Ok(())
    }

    /// Validate input, resolve the working directory and the step range,
    /// and restore the checkpoint when resuming.
    pub fn setup(&mut self) -> Result<()> {
        self.validate_input()?;
        self.image_size = self.image_size_request()?;

        if let ImageKind::Classic(opts) = &self.kind {
            self.image_def = Some(ImageDefinition::load(&opts.image_definition)?);
        }

        let workdir = match &self.flags.workdir {
            // Resuming reads the checkpoint before anything is created.
            Some(path) if self.flags.resume => WorkDir::Persistent(path.clone()),
            Some(path) => {
                fs::create_dir_all(path).with_context(|| {
                    format!("Error creating work directory {}", path.display())
                })?;
                WorkDir::Persistent(path.clone())
            }
            None => WorkDir::Temporary(
                tempfile::Builder::new()
                    .prefix("ubuntu-image-")
                    .tempdir()
                    .context("Error creating temporary work directory")?,
            ),
        };
        debug!(workdir = %workdir.path().display(), "working directory");

        if self.flags.resume {
            let checkpoint = Checkpoint::read(workdir.path())?;
            if checkpoint.variant != self.variant() {
                bail!(
                    "saved state in {} belongs to a {} build, not {}",
                    workdir.path().display(),
                    checkpoint.variant,
                    self.variant()
                );
            }
            info!(
                step = checkpoint.last_completed_step,
                name = %checkpoint.last_completed_step_name,
                "resuming"
            );
            if checkpoint.workdir != workdir.path() {
                warn!(
                    saved = %checkpoint.workdir.display(),
                    workdir = %workdir.path().display(),
                    "resuming from a working directory that has moved"
                );
            }
            self.last_completed = checkpoint.last_completed_step;
            self.state = checkpoint.build;
            let moved = self
                .state
                .output_dir
                .as_deref()
                .and_then(|dir| dir.strip_prefix(&checkpoint.workdir).ok())
                .map(|rest| workdir.path().join(rest));
            if moved.is_some() {
                self.state.output_dir = moved;
            }
        }
        self.workdir = Some(workdir);

        self.start = self.last_completed + 1;
        self.end = match (&self.flags.until, &self.flags.thru) {
            (Some(until), _) => self.steps.resolve(until)? - 1,
            (_, Some(thru)) => self.steps.resolve(thru)?,
            (None, None) => self.steps.len(),
        };
        Ok(())
    }

    /// Run the resolved step range.
    ///
    /// On failure a temporary working directory is removed before the
    /// error is returned; a user-supplied one is left for inspection and
    /// `--resume`.
    pub fn run(&mut self) -> Result<()> {
        let result = self.run_steps();
        if result.is_err() {
            if let Some(WorkDir::Temporary(_)) = &self.workdir {
                if let Err(e) = self.cleanup() {
                    warn!(error = %e, "failed to remove working directory after error");
                }
            }
        }
        result
    }

    fn run_steps(&mut self) -> Result<()> {
        let _lock = self.lock_workdir()?;

        for index in self.start..=self.end {
            let Some(step) = self.steps.get(index).copied() else {
                break;
            };
            info!(index, step = step.name, "running step");
            println!("[{}] {}", step.index, step.name);

            (step.run)(self).with_context(|| format!("step {} failed", step.name))?;

            self.last_completed = step.index;
            self.executed.push(step.name);
            self.write_checkpoint(step.name)?;
        }
        Ok(())
    }

    fn lock_workdir(&self) -> Result<File> {
        let path = self.workdir_path()?.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to create lock file: {}", path.display()))?;
        if lock.try_lock_exclusive().is_err() {
            bail!(
                "working directory {} is in use by another build",
                self.workdir_path()?.display()
            );
        }
        Ok(lock)
    }

    fn write_checkpoint(&self, step_name: &str) -> Result<()> {
        Checkpoint {
            schema: checkpoint::CHECKPOINT_SCHEMA,
            variant: self.variant(),
            last_completed_step: self.last_completed,
            last_completed_step_name: step_name.to_string(),
            workdir: self.workdir_path()?.to_path_buf(),
            until: self.flags.until.clone(),
            thru: self.flags.thru.clone(),
            resume: self.flags.resume,
            updated_at_utc: checkpoint::now_utc(),
            build: self.state.clone(),
        }
        .write()
    }

    /// Release the working directory. A user-supplied one is kept.
    pub fn teardown(&mut self) -> Result<()> {
        match &self.workdir {
            Some(WorkDir::Temporary(_)) => self.cleanup(),
            _ => Ok(()),
        }
    }

    fn cleanup(&mut self) -> Result<()> {
        let Some(WorkDir::Temporary(dir)) = self.workdir.take() else {
            return Ok(());
        };
        debug!(workdir = %dir.path().display(), "removing working directory");
        self.host
            .fs
            .remove_dir_all(dir.path())
            .context("Error cleaning up workDir")
    }
}
