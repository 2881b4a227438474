//! ispflash CLI - Command-line tool for flashing microcontrollers through a
//! serial ISP bootloader.
//!
//! ## Features
//!
//! - Flash Intel HEX firmware (erase, write, finalize, verify)
//! - Erase a sector range
//! - Inspect HEX files
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use commands::{completions, flash, info};
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Missing or contradictory arguments.
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration.
    #[error("{0}")]
    Config(String),
    /// The device operation did not complete.
    #[error("{0}")]
    Failed(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Failed(_) => 1,
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
        }
    }
}

/// Exit code for an error returned by a command.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CliError>()
        .map_or(1, CliError::exit_code)
}

/// ispflash - Flash microcontrollers through their serial ISP bootloader.
///
/// Environment variables:
///   ISPFLASH_PORT              - Default serial port
///   ISPFLASH_BAUD              - Default baud rate (default: 115200)
///   ISPFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "ispflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use.
    #[arg(short, long, global = true, env = "ISPFLASH_PORT")]
    port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "ISPFLASH_BAUD")]
    baud: Option<u32>,

    /// First sector to prepare and erase [default: 0].
    #[arg(long, global = true)]
    first_sector: Option<u32>,

    /// Last sector to prepare and erase [default: 29].
    #[arg(long, global = true)]
    last_sector: Option<u32>,

    /// Do not wait for a manual device reset.
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (no prompts; the reset is confirmed at once).
    #[arg(long, global = true, env = "ISPFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Erase the sector range.
    Erase,

    /// Erase, then program an Intel HEX file.
    Flash {
        /// Path to the HEX file (config or bundled Resources/firmware.hex if omitted).
        firmware: Option<PathBuf>,
    },

    /// Show information about a HEX file.
    Info {
        /// Path to the HEX file.
        firmware: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    init_logging(&cli);

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

/// Setup logging based on verbosity.
///
/// Run events are rendered by the flash command itself, so their `log`
/// mirror is filtered out unless `RUST_LOG` asks for it.
fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = format!("{log_level},{}=off", ispflash::event::LOG_TARGET);
    env_logger::Builder::from_env(Env::default().default_filter_or(filter))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "ispflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Erase => {
            let config = load_config(cli)?;
            flash::cmd_erase(cli, &config)
        },
        Commands::Flash { firmware } => {
            let config = load_config(cli)?;
            flash::cmd_flash(cli, &config, firmware.as_ref())
        },
        Commands::Info { firmware, json } => info::cmd_info(firmware, *json),
        Commands::Completions { shell } => {
            completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Load configuration, honouring `--config`.
fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config_path {
        Some(path) if !path.exists() => Err(CliError::Config(format!(
            "config file {} does not exist",
            path.display()
        ))
        .into()),
        Some(path) => Ok(Config::load_from_path(path)),
        None => Ok(Config::load()),
    }
}
