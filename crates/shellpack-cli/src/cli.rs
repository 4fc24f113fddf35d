use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

pub const SHELLPACK_BEFORE_HELP: &str = concat!(
    "shellpack ",
    env!("CARGO_PKG_VERSION"),
    " – standalone app packaging for a shell template\n\n",
    "\x1b[1;36mPipeline\x1b[0m\n",
    "  prepare              Download the program archive and inject it into the shell.\n",
    "  cleanup              Restore the icon and manifest and drop the injected archive.\n",
    "  build                prepare, run an assemble command, then cleanup.\n\n",
    "\x1b[1;36mInspection\x1b[0m\n",
    "  inspect              Show the program name and icon an archive would yield.\n",
    "  strip-intent-filters Remove VIEW/SEND intent filters from a manifest.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "shellpack",
    author,
    version,
    disable_help_subcommand = true,
    before_help = SHELLPACK_BEFORE_HELP
)]
#[allow(clippy::struct_excessive_bools)]
pub struct ShellpackCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vvv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    #[command(about = "Download the program archive and apply it to the shell")]
    Prepare(ShellArgs),
    #[command(about = "Undo the file changes made by prepare")]
    Cleanup(ShellArgs),
    #[command(about = "Run prepare, an assemble command and cleanup in order")]
    Build(BuildArgs),
    #[command(about = "Read the program name and icon from a local archive")]
    Inspect(InspectArgs),
    #[command(
        name = "strip-intent-filters",
        about = "Remove VIEW/SEND intent filters from a manifest in place"
    )]
    StripIntentFilters(StripArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ShellArgs {
    #[arg(
        short = 'P',
        long = "property",
        value_name = "KEY=VALUE",
        help = "Invocation property: download, suffix or packageName (repeatable)"
    )]
    pub properties: Vec<String>,
    #[arg(long, value_name = "DIR", default_value = ".", help = "Shell template root")]
    pub root: PathBuf,
    #[arg(long = "assets", value_name = "DIR", help = "Assets directory, relative to the root")]
    pub assets_dir: Option<PathBuf>,
    #[arg(long, value_name = "FILE", help = "Launcher icon, relative to the root")]
    pub icon: Option<PathBuf>,
    #[arg(long, value_name = "FILE", help = "Manifest, relative to the root")]
    pub manifest: Option<PathBuf>,
    #[arg(
        long,
        value_name = "FILE",
        help = "Write the build overrides as JSON after preparation"
    )]
    pub emit_config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub shell: ShellArgs,
    #[arg(
        last = true,
        value_name = "COMMAND",
        help = "Assemble command, run from the shell root"
    )]
    pub assemble: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct StripArgs {
    #[arg(value_name = "MANIFEST")]
    pub manifest: PathBuf,
}
