use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightGreen.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::BrightMagenta.on_default())
}

pub fn styled_command() -> clap::Command {
    Cli::command()
}

#[derive(Debug, Parser)]
#[command(name = "papermind")]
#[command(bin_name = "papermind")]
#[command(version)]
#[command(about = "Keep a Zotero library and an Obsidian vault in sync")]
#[command(styles = cli_styles())]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "PAPERMIND_VAULT",
        help = "Obsidian vault root. Overrides the configured vault."
    )]
    pub vault: Option<PathBuf>,

    #[arg(
        long = "zotero-dir",
        global = true,
        env = "PAPERMIND_ZOTERO_DIR",
        help = "Zotero data directory containing zotero.sqlite."
    )]
    pub zotero_dir: Option<PathBuf>,

    #[arg(
        short = 'v',
        long = "verbose",
        global = true,
        action = ArgAction::Count,
        help = "Increase log verbosity (-v info, -vv debug, -vvv trace)."
    )]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Project Zotero records and collections into the vault.")]
    Sync(SyncArgs),
    #[command(about = "Import notes written in the vault back into Zotero.")]
    SyncNotes(SyncNotesArgs),
    #[command(about = "Show or change the saved Zotero and vault locations.")]
    Configure(ConfigureArgs),
    #[command(about = "Show recent sync and import runs.")]
    Status(StatusArgs),
    #[command(about = "Generate or install shell completions.")]
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[arg(long, help = "Report what would change without writing anything.")]
    pub dry_run: bool,

    #[arg(long, help = "Print the run report as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SyncNotesArgs {
    #[arg(long, help = "Report what would be imported without writing anything.")]
    pub dry_run: bool,

    #[arg(
        long,
        help = "Import documents again when they changed since their last import."
    )]
    pub overwrite: bool,

    #[arg(long, help = "Print the run report as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ConfigureArgs {
    #[arg(long = "set-zotero-dir", help = "Save this Zotero data directory.")]
    pub set_zotero_dir: Option<PathBuf>,

    #[arg(long = "set-vault", help = "Save this vault root.")]
    pub set_vault: Option<PathBuf>,

    #[arg(long, conflicts_with_all = ["set_zotero_dir", "set_vault"], help = "Delete the saved configuration.")]
    pub reset: bool,

    #[arg(long, help = "Print the resolved configuration as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(short = 'n', long, default_value_t = 10, help = "Number of runs to show.")]
    pub limit: usize,

    #[arg(long, help = "Print runs as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
#[command(about = "Generate or install shell completions.")]
pub struct CompletionsArgs {
    #[arg(help = "Shell name (bash, zsh, fish). Auto-detected if omitted.")]
    pub shell: Option<String>,

    #[arg(
        short = 'i',
        long = "install",
        help = "Write completions to the canonical path for the shell."
    )]
    pub install: bool,
}
