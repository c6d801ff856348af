mod app;
mod cancel;
mod cli;
mod completions;
mod config;
mod db;
mod document;
mod domain;
mod files;
mod imports;
mod layout;
mod manifest;
mod report;
mod store;
mod sync;
mod ui;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, ConfigureArgs};

const LOG_ENV: &str = "PAPERMIND_LOG";

/// A run finished but left records or documents behind.
const EXIT_PARTIAL: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(format!("papermind={default_level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn print_json(value: &impl serde::Serialize) -> Result<(), app::AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| app::AppError::InvalidArgument(format!("cannot render JSON: {}", err)))?;
    println!("{}", rendered);
    Ok(())
}

fn exit_for(has_failures: bool) -> ExitCode {
    if has_failures {
        ExitCode::from(EXIT_PARTIAL)
    } else {
        ExitCode::SUCCESS
    }
}

fn run(cli: Cli) -> Result<ExitCode, app::AppError> {
    if let Commands::Completions(args) = &cli.command {
        completions::run_completions_command(args.shell.as_deref(), args.install)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config_path = config::config_path()?;
    let home = config::home_dir();
    if let Commands::Configure(args) = &cli.command {
        return configure(args, &cli, config_path, home.as_deref());
    }

    let file = config::UserConfig::load_from(&config_path)?;
    let resolved = config::resolve(
        config_path,
        &file,
        cli.zotero_dir.as_deref(),
        cli.vault.as_deref(),
        home.as_deref(),
    );
    let app = app::App::open(&resolved)?;

    match cli.command {
        Commands::Sync(args) => {
            let report = app.forward_sync(args.dry_run)?;
            if args.json {
                print_json(&report)?;
            } else {
                ui::print_sync_report(&report);
            }
            Ok(exit_for(report.has_failures()))
        }
        Commands::SyncNotes(args) => {
            let report = app.reverse_import(args.overwrite, args.dry_run)?;
            if args.json {
                print_json(&report)?;
            } else {
                ui::print_import_report(&report);
            }
            Ok(exit_for(report.has_failures()))
        }
        Commands::Status(args) => {
            let runs = app.run_history(args.limit)?;
            if args.json {
                print_json(&runs)?;
            } else {
                ui::print_runs(&runs);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Configure(_) | Commands::Completions(_) => {
            unreachable!("handled before the app is opened")
        }
    }
}

fn configure(
    args: &ConfigureArgs,
    cli: &Cli,
    config_path: std::path::PathBuf,
    home: Option<&std::path::Path>,
) -> Result<ExitCode, app::AppError> {
    if args.reset {
        if config::remove_config(&config_path)? {
            println!("removed {}", config_path.display());
        } else {
            println!("no saved configuration at {}", config_path.display());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut file = config::UserConfig::load_from(&config_path)?;
    if args.set_zotero_dir.is_some() || args.set_vault.is_some() {
        file.update_paths(
            args.set_zotero_dir.as_deref(),
            args.set_vault.as_deref(),
            home,
        )?;
        file.save_to(&config_path)?;
        tracing::info!(path = %config_path.display(), "configuration saved");
    }

    let resolved = config::resolve(
        config_path,
        &file,
        cli.zotero_dir.as_deref(),
        cli.vault.as_deref(),
        home,
    );
    if args.json {
        print_json(&resolved)?;
    } else {
        ui::print_config(&resolved);
    }
    Ok(ExitCode::SUCCESS)
}
