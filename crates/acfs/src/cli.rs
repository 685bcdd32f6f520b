//! CLI argument parsing with clap

use acfs_core::types::InstallMode;
use acfs_installer::SelectionInput;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// ACFS - provision a server from a module manifest, resumably
#[derive(Parser, Debug)]
#[command(name = "acfs")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the module manifest [env: ACFS_MANIFEST]
    #[arg(long, global = true)]
    pub manifest: Option<Utf8PathBuf>,

    /// Path to the installer checksum registry [env: ACFS_CHECKSUMS]
    #[arg(long, global = true)]
    pub checksums: Option<Utf8PathBuf>,

    /// Path to the installation state file [env: ACFS_STATE_FILE]
    #[arg(long, global = true)]
    pub state_file: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Preview the execution plan for a selection
    Plan(PlanArgs),

    /// Install the selected modules, resuming a previous run if one exists
    Install(InstallArgs),

    /// Show persisted installation progress
    Status(StatusArgs),

    /// List modules in the manifest
    Modules(ModulesArgs),

    /// Discard persisted installation progress
    Reset(ResetArgs),
}

/// Module selection flags shared by `plan` and `install`
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Start from exactly these modules (comma-separated or repeated)
    #[arg(long, value_delimiter = ',', value_name = "MODULE")]
    pub only: Vec<String>,

    /// Start from every module in these phases
    #[arg(long = "only-phase", value_delimiter = ',', value_name = "PHASE")]
    pub only_phase: Vec<u8>,

    /// Exclude these modules
    #[arg(long, value_delimiter = ',', value_name = "MODULE")]
    pub skip: Vec<String>,

    /// Exclude modules carrying any of these tags
    #[arg(long = "skip-tag", value_delimiter = ',', value_name = "TAG")]
    pub skip_tag: Vec<String>,

    /// Exclude modules in these categories (first id segment)
    #[arg(long = "skip-category", value_delimiter = ',', value_name = "CATEGORY")]
    pub skip_category: Vec<String>,

    /// Do not pull in dependencies of the selected modules
    #[arg(long)]
    pub no_deps: bool,
}

impl SelectionArgs {
    pub fn to_input(&self) -> SelectionInput {
        SelectionInput {
            only_modules: self.only.clone(),
            only_phases: self.only_phase.clone(),
            skip_modules: self.skip.clone(),
            skip_tags: self.skip_tag.clone(),
            skip_categories: self.skip_category.clone(),
            no_deps: self.no_deps,
        }
    }
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Also list excluded modules and why
    #[arg(long)]
    pub explain: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Probe and report without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Unattended: no confirmation, checksum policies apply without prompting
    #[arg(short, long)]
    pub yes: bool,

    /// Ignore previous progress and start over
    #[arg(long)]
    pub fresh: bool,

    /// Installation mode exported to actions as ACFS_MODE
    #[arg(long, value_name = "vibe|safe")]
    pub mode: Option<InstallMode>,

    /// User that owns the installed toolchain
    #[arg(long)]
    pub target_user: Option<String>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ModulesArgs {
    /// Only modules in this category
    #[arg(long)]
    pub category: Option<String>,

    /// Only modules carrying this tag
    #[arg(long)]
    pub tag: Option<String>,

    /// Only modules in this phase
    #[arg(long)]
    pub phase: Option<u8>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Skip confirmation
    #[arg(short, long)]
    pub yes: bool,
}
