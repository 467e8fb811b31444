use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use ubuntu_image::preflight;
use ubuntu_image::statemachine::{
    ClassicOptions, CommonOptions, SnapOptions, StateMachine, StateMachineFlags,
};

#[derive(Parser)]
#[command(name = "ubuntu-image", version, about = "Build bootable Ubuntu disk images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an Ubuntu Core image from a model assertion.
    Snap {
        /// Model assertion file.
        model_assertion: PathBuf,
        /// Channel snaps are fetched from.
        #[arg(short, long)]
        channel: Option<String>,
        /// Extra snap to seed, `name[=channel]`. Repeatable.
        #[arg(long = "snap")]
        snaps: Vec<String>,
        /// Skip console-conf on first boot.
        #[arg(long)]
        disable_console_conf: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Build a classic Ubuntu image from a gadget tree and image definition.
    Classic {
        /// Unpacked gadget tree.
        gadget_tree: PathBuf,
        #[arg(long)]
        image_definition: PathBuf,
        /// Prebuilt rootfs to use instead of building one.
        #[arg(long)]
        filesystem: Option<PathBuf>,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Working directory; kept after the build and required for --resume.
    #[arg(short = 'w', long)]
    workdir: Option<PathBuf>,
    /// Stop before this step (name or number).
    #[arg(short = 'u', long)]
    until: Option<String>,
    /// Stop after this step (name or number).
    #[arg(short = 't', long)]
    thru: Option<String>,
    /// Continue from the last completed step in --workdir.
    #[arg(short = 'r', long)]
    resume: bool,
    #[arg(short = 'O', long)]
    output_dir: Option<PathBuf>,
    /// `N[M|G]` for all volumes or `vol:N[M|G],...`.
    #[arg(short = 'i', long)]
    image_size: Option<String>,
    #[arg(long = "hooks-directory", value_delimiter = ',')]
    hooks_directories: Vec<PathBuf>,
    #[arg(long)]
    disk_info: Option<PathBuf>,
    #[arg(long)]
    cloud_init: Option<PathBuf>,
    #[arg(long)]
    image_file_list: Option<PathBuf>,
    #[arg(short = 'd', long)]
    debug: bool,
}

impl CommonArgs {
    fn split(self) -> (StateMachineFlags, CommonOptions) {
        let flags = StateMachineFlags {
            workdir: self.workdir,
            until: self.until,
            thru: self.thru,
            resume: self.resume,
        };
        let common = CommonOptions {
            hooks_directories: self.hooks_directories,
            output_dir: self.output_dir,
            image_size: self.image_size,
            image_file_list: self.image_file_list,
            cloud_init: self.cloud_init,
            disk_info: self.disk_info,
            debug: self.debug,
        };
        (flags, common)
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut sm = match cli.command {
        Command::Snap {
            model_assertion,
            channel,
            snaps,
            disable_console_conf,
            common,
        } => {
            let (flags, common) = common.split();
            init_logging(common.debug);
            preflight::check_snap_tools()?;
            let opts = SnapOptions {
                model_assertion,
                channel,
                snaps,
                disable_console_conf,
            };
            StateMachine::snap(flags, common, opts)
        }
        Command::Classic {
            gadget_tree,
            image_definition,
            filesystem,
            common,
        } => {
            let (flags, common) = common.split();
            init_logging(common.debug);
            preflight::check_classic_tools(filesystem.is_some())?;
            let opts = ClassicOptions {
                gadget_tree,
                image_definition,
                filesystem,
            };
            StateMachine::classic(flags, common, opts)
        }
    };

    sm.setup()?;
    sm.run()?;
    sm.teardown()
}
