//! Flash and erase command implementations.

use anyhow::Result;
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use ispflash::port::DEFAULT_BAUD;
use ispflash::{
    FlashEvent, FlashOrchestrator, FlashRequest, LogLine, ResetMode, RunHandle, SectorRange,
    SerialConfig, Workflow, WorkflowResult,
};
use log::{Level, debug};
use std::path::PathBuf;

use crate::commands::firmware::resolve_firmware;
use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output};

/// Erase command implementation.
pub(crate) fn cmd_erase(cli: &Cli, config: &Config) -> Result<()> {
    let request = build_request(cli, config, Workflow::EraseOnly)?;
    if !cli.quiet {
        eprintln!(
            "{} Erasing sectors {} on {}",
            style("🗑").red(),
            request.sectors,
            style(&request.serial.port_name).cyan()
        );
    }

    let result = run_workflow(cli, request)?;
    if !result.success {
        return Err(failure("Erase", result));
    }

    if !cli.quiet {
        eprintln!("\n{} Erase complete", style("✓").green().bold());
    }
    Ok(())
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &Config, firmware: Option<&PathBuf>) -> Result<()> {
    let firmware = resolve_firmware(firmware, config.flash.firmware.as_ref())?;
    let request = build_request(
        cli,
        config,
        Workflow::EraseThenProgram {
            firmware: firmware.clone(),
        },
    )?;

    if !cli.quiet {
        eprintln!(
            "{} Flashing {} via {} @ {} baud",
            style("📦").cyan(),
            style(firmware.display()).bold(),
            style(&request.serial.port_name).cyan(),
            request.serial.baud_rate
        );
    }

    let result = run_workflow(cli, request)?;
    if !result.success {
        return Err(failure("Flash", result));
    }

    if !cli.quiet {
        if result.checksum_ok {
            eprintln!("\n{} Flash complete", style("🎉").green().bold());
        } else {
            eprintln!(
                "\n{} Flash complete, but the device did not acknowledge the checksum",
                style("⚠").yellow().bold()
            );
        }
    }
    Ok(())
}

/// Combine CLI arguments, config and defaults into a request.
fn build_request(cli: &Cli, config: &Config, workflow: Workflow) -> Result<FlashRequest> {
    let port = cli
        .port
        .clone()
        .or_else(|| config.connection.port.clone())
        .ok_or_else(|| {
            CliError::Usage(
                "no serial port given; use --port, ISPFLASH_PORT or [connection] port".into(),
            )
        })?;
    let baud = cli.baud.or(config.connection.baud).unwrap_or(DEFAULT_BAUD);

    let defaults = SectorRange::default();
    let sectors = SectorRange::new(
        cli.first_sector
            .or(config.flash.first_sector)
            .unwrap_or(defaults.start),
        cli.last_sector
            .or(config.flash.last_sector)
            .unwrap_or(defaults.end),
    );
    if sectors.start > sectors.end {
        return Err(CliError::Usage(format!(
            "first sector {} is after last sector {}",
            sectors.start, sectors.end
        ))
        .into());
    }

    let reset = if cli.yes || config.flash.skip_reset_prompt {
        ResetMode::Skip
    } else {
        ResetMode::Manual
    };

    debug!("Request: {workflow:?} on {port} @ {baud}, sectors {sectors}, reset {reset:?}");
    Ok(FlashRequest::new(SerialConfig::new(port, baud), workflow)
        .with_sectors(sectors)
        .with_reset(reset))
}

/// Start the run and render its events until it finishes.
fn run_workflow(cli: &Cli, request: FlashRequest) -> Result<WorkflowResult> {
    let orchestrator = FlashOrchestrator::native();
    let handle = orchestrator.start(request)?;
    let pb = progress_bar(cli.quiet);

    for event in handle.events() {
        match event {
            FlashEvent::Log(line) => pb.suspend(|| render_log(&line, cli.quiet)),
            FlashEvent::Progress(percent) => pb.set_position(u64::from(percent)),
            FlashEvent::ResetRequired => pb.suspend(|| prompt_reset(cli, &handle)),
            FlashEvent::Finished(result) => {
                if result.success {
                    pb.finish_with_message("done");
                } else {
                    pb.abandon();
                }
                break;
            },
        }
    }

    Ok(handle.wait())
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Print one run log line to stderr. Quiet mode keeps warnings and errors.
fn render_log(line: &LogLine, quiet: bool) {
    if quiet && line.level > Level::Warn {
        return;
    }
    eprintln!("{}", format_log(line));
}

fn format_log(line: &LogLine) -> String {
    let stamp = style(format!("[{}]", line.clock())).dim();
    let text = match line.level {
        Level::Error => style(line.text.as_str()).red(),
        Level::Warn => style(line.text.as_str()).yellow(),
        _ => style(line.text.as_str()),
    };
    format!("{stamp} {text}")
}

/// Ask the user to reset the device, then release the run.
///
/// Declining does not cancel; the prompt is only an acknowledgement.
fn prompt_reset(cli: &Cli, handle: &RunHandle) {
    let message = "Reset the device into its bootloader";
    if cli.non_interactive {
        eprintln!("{} {message}", style("🔄").cyan());
    } else {
        let answer = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("{message}, then confirm"))
            .default(true)
            .interact();
        match answer {
            Ok(true) => {},
            Ok(false) => debug!("Reset prompt declined, continuing"),
            Err(e) => debug!("Reset prompt unavailable ({e}), continuing"),
        }
    }
    handle.confirm_reset();
}

fn failure(operation: &str, result: WorkflowResult) -> anyhow::Error {
    let reason = result
        .error
        .map_or_else(|| "unknown error".to_string(), |kind| kind.to_string());
    CliError::Failed(format!("{operation} failed: {reason}")).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use ispflash::ErrorKind;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ispflash").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_request_from_cli_arguments() {
        let cli = cli(&[
            "-p",
            "/dev/ttyUSB1",
            "-b",
            "9600",
            "--first-sector",
            "2",
            "--last-sector",
            "9",
            "-y",
            "erase",
        ]);
        let request = build_request(&cli, &Config::default(), Workflow::EraseOnly).unwrap();

        assert_eq!(request.serial.port_name, "/dev/ttyUSB1");
        assert_eq!(request.serial.baud_rate, 9600);
        assert_eq!(request.sectors, SectorRange::new(2, 9));
        assert_eq!(request.reset, ResetMode::Skip);
    }

    #[test]
    fn test_request_falls_back_to_config_then_defaults() {
        let mut config = Config::default();
        config.connection.port = Some("COM4".into());
        config.flash.last_sector = Some(7);
        // ISPFLASH_PORT and ISPFLASH_BAUD take precedence over config
        if std::env::var_os("ISPFLASH_PORT").is_some() || std::env::var_os("ISPFLASH_BAUD").is_some()
        {
            return;
        }
        let cli = cli(&["erase"]);
        let request = build_request(&cli, &config, Workflow::EraseOnly).unwrap();
        assert_eq!(request.serial.port_name, "COM4");
        assert_eq!(request.serial.baud_rate, DEFAULT_BAUD);
        assert_eq!(request.sectors, SectorRange::new(0, 7));
        assert_eq!(request.reset, ResetMode::Manual);
    }

    #[test]
    fn test_config_can_skip_reset_prompt() {
        let mut config = Config::default();
        config.flash.skip_reset_prompt = true;
        let cli = cli(&["-p", "COM1", "erase"]);
        let request = build_request(&cli, &config, Workflow::EraseOnly).unwrap();
        assert_eq!(request.reset, ResetMode::Skip);
    }

    #[test]
    fn test_inverted_sector_range_is_usage_error() {
        let cli = cli(&[
            "-p",
            "COM1",
            "--first-sector",
            "10",
            "--last-sector",
            "3",
            "erase",
        ]);
        let err = build_request(&cli, &Config::default(), Workflow::EraseOnly).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_failure_names_error_kind() {
        let err = failure("Erase", WorkflowResult::failed(Some(ErrorKind::SyncFailure)));
        assert_eq!(err.to_string(), "Erase failed: sync failure");
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Failed(_))
        ));
    }

    #[test]
    fn test_format_log_has_clock_prefix() {
        console::set_colors_enabled(false);
        let line = LogLine::at(std::time::UNIX_EPOCH, Level::Info, "U 23130 -> OK");
        assert_eq!(format_log(&line), "[00:00:00] U 23130 -> OK");
    }
}
