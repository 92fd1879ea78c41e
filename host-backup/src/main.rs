//! host-backup - Main entry point
//!
//! Creates, lists, inspects, restores and deletes host backup archives.

use anyhow::{bail, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use host_backup::host::Host;
use host_backup::ops::{self, CreateRequest, RestoreRequest};
use host_backup::{utils, Config, Selection};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a backup archive
    Create {
        /// Archive name (defaults to the current local time)
        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Directory to write the archive into
        #[arg(short, long, value_name = "DIR")]
        output_directory: Option<PathBuf>,

        /// Keep an uncompressed tree in the output directory
        #[arg(long)]
        no_compress: bool,

        /// Archival methods to apply, in order
        #[arg(long, num_args = 1..)]
        methods: Vec<String>,

        #[command(flatten)]
        units: UnitArgs,
    },
    /// Restore an archive
    Restore {
        name: String,

        #[command(flatten)]
        units: UnitArgs,

        /// Restore system hooks on an already provisioned host without asking
        #[arg(long)]
        force: bool,
    },
    /// List archives
    List {
        /// Include each archive's summary
        #[arg(short = 'i', long)]
        with_info: bool,

        #[arg(short = 'H', long)]
        human_readable: bool,
    },
    /// Show an archive's summary
    Info {
        name: String,

        /// Include backed-up apps and hooks
        #[arg(short = 'd', long)]
        with_details: bool,

        #[arg(short = 'H', long)]
        human_readable: bool,
    },
    /// Delete an archive
    Delete { name: String },
}

#[derive(ClapArgs, Debug)]
struct UnitArgs {
    /// Hooks to include (all when none given)
    #[arg(long, num_args = 1.., conflicts_with = "ignore_hooks")]
    hooks: Vec<String>,

    #[arg(long)]
    ignore_hooks: bool,

    /// Apps to include (all when none given)
    #[arg(long, num_args = 1.., conflicts_with = "ignore_apps")]
    apps: Vec<String>,

    #[arg(long)]
    ignore_apps: bool,
}

impl UnitArgs {
    fn selections(self) -> (Selection, Selection) {
        (
            Selection::from_request(self.ignore_hooks, self.hooks),
            Selection::from_request(self.ignore_apps, self.apps),
        )
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!("Starting host-backup v{}", env!("CARGO_PKG_VERSION"));
    let host = Host::from_config(&config);

    match args.command {
        Command::Create {
            name,
            description,
            output_directory,
            no_compress,
            methods,
            units,
        } => {
            let (hooks, apps) = units.selections();
            let request = CreateRequest {
                name,
                description,
                output_dir: output_directory,
                compress: !no_compress,
                hooks,
                apps,
                methods,
            };
            print_json(&ops::create(&config, &host, &request)?)
        }
        Command::Restore { name, units, force } => {
            let (hooks, apps) = units.selections();
            let mut request = RestoreRequest {
                name,
                hooks,
                apps,
                force,
            };
            if config.is_provisioned() && !request.hooks.is_skip() && !request.force {
                if !confirm("The system is already installed, restore it anyway?")? {
                    bail!("Restore cancelled");
                }
                request.force = true;
            }
            print_json(&ops::restore(&config, &host, &request)?)
        }
        Command::List {
            with_info,
            human_readable,
        } => print_json(&ops::list(&config, with_info, human_readable)?),
        Command::Info {
            name,
            with_details,
            human_readable,
        } => print_json(&ops::info(&config, &name, with_details, human_readable)?),
        Command::Delete { name } => {
            ops::delete(&config, &host, &name)?;
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Ask a yes/no question on the terminal; anything but `y` means no.
fn confirm(question: &str) -> Result<bool> {
    eprint!("{} [y/N] ", question);
    io::stderr().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}
