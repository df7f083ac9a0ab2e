//! Command line front end
//!
//! Streams G-code from a file or stdin into a [`SimulatedPrinter`] as if it
//! arrived over the serial line, writes the host protocol to stdout and
//! summarizes the motion on exit.

use crate::firmware_info;
use anyhow::Context as _;
use clap::Parser;
use printcore_communication::{DirectorySdCard, SerialInput, WriterSink};
use printcore_gcode::{ManualClock, PrinterBuilder, SimulatedPrinter, StepOutcome, SystemClock};
use printcore_settings::{FileSettingsStore, GeometryKind, MachineConfig, MemorySettingsStore};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::time::Duration;

/// Run G-code against a simulated printer
#[derive(Debug, Parser)]
#[command(name = "printcore", version, about)]
pub struct Args {
    /// G-code file to stream; stdin when omitted
    pub input: Option<PathBuf>,

    /// Machine configuration (TOML or JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Settings file used by M500/M501
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Keep M500 settings in memory only
    #[arg(long, conflicts_with = "settings")]
    pub no_settings_file: bool,

    /// Machine geometry, overriding the configuration
    #[arg(long)]
    pub geometry: Option<GeometryKind>,

    /// Directory served as the SD card
    #[arg(long)]
    pub sd_root: Option<PathBuf>,

    /// Report line number and buffer space with every ok
    #[arg(long)]
    pub advanced_ok: bool,

    /// Run waits against the wall clock instead of simulated time
    #[arg(long)]
    pub realtime: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub dump_config: bool,

    /// Command injected before the input is read; repeat for more lines
    #[arg(long)]
    pub exec: Vec<String>,

    /// Log as JSON
    #[arg(long)]
    pub log_json: bool,
}

/// Effective machine configuration for `args`
///
/// A geometry given without a configuration file selects that geometry's
/// defaults; with a file it only replaces the file's geometry.
pub fn load_config(args: &Args) -> anyhow::Result<MachineConfig> {
    let mut config = match &args.config {
        Some(path) => MachineConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MachineConfig::for_geometry(args.geometry.unwrap_or_default()),
    };
    if let Some(kind) = args.geometry {
        config.geometry = kind;
    }
    if args.advanced_ok {
        config.host.advanced_ok = true;
    }
    config.validate().context("invalid machine configuration")?;
    Ok(config)
}

/// Printer wired to stdout, the chosen clock, settings store and SD card
pub fn build_printer(args: &Args, config: MachineConfig) -> anyhow::Result<SimulatedPrinter> {
    let mut builder = PrinterBuilder::new(config)
        .firmware(firmware_info())
        .output(WriterSink::new(std::io::stdout()));

    builder = if args.realtime {
        builder.clock(SystemClock::new())
    } else {
        builder.clock(ManualClock::new(10))
    };

    builder = match (&args.settings, args.no_settings_file) {
        (_, true) => builder.settings(MemorySettingsStore::new()),
        (Some(path), false) => builder.settings(FileSettingsStore::new(path)),
        (None, false) => match FileSettingsStore::default_location() {
            Ok(store) => builder.settings(store),
            Err(e) => {
                tracing::warn!("Settings kept in memory: {}", e);
                builder.settings(MemorySettingsStore::new())
            }
        },
    };

    if let Some(root) = &args.sd_root {
        builder = builder.sd_card(DirectorySdCard::new(root));
    }

    let printer = builder.build()?;
    Ok(printer)
}

/// Feed `reader` into `input` line by line on a background thread
///
/// The input is closed at end of stream so waits without a timeout can end.
fn spawn_feeder(reader: Box<dyn Read + Send>, input: SerialInput) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            match line {
                Ok(line) => input.push_line(&line),
                Err(e) => {
                    tracing::error!("Input read failed: {}", e);
                    break;
                }
            }
        }
        input.close();
    })
}

/// Step the printer until the input is exhausted or the loop halts
pub fn drive(printer: &mut SimulatedPrinter) -> StepOutcome {
    loop {
        let outcome = printer.step();
        if outcome == StepOutcome::Halted {
            return outcome;
        }
        if outcome == StepOutcome::Idle {
            let ctx = printer.context();
            let drained = ctx.queue.is_empty() && !ctx.sd.is_printing() && !ctx.injector.is_active();
            if drained && ctx.input_closed() {
                return outcome;
            }
            if drained && printer.input.is_empty() {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

/// Motion summary printed on exit
pub fn summary(printer: &SimulatedPrinter) -> Vec<String> {
    let ctx = printer.context();
    let mut lines = vec![
        format!("Commands handled: {}", printer.dispatcher.handled()),
        format!("Planner moves: {}", printer.machine.moves().len()),
        format!("Logical position: {}", ctx.state.current_position),
    ];
    if let Some(nozzle) = printer.machine.nozzle() {
        lines.push(format!("Nozzle position: {}", nozzle));
    }
    lines.push(format!("Homed: {}", homed_axes(printer)));
    if ctx.is_halted() {
        lines.push("State: halted".to_string());
    } else if !ctx.is_running() {
        lines.push("State: stopped".to_string());
    }
    lines
}

fn homed_axes(printer: &SimulatedPrinter) -> String {
    let homed = printer.context().state.homed;
    let names: String = printcore_core::Axis::XYZ
        .iter()
        .filter(|axis| homed.get(**axis))
        .map(|axis| axis.letter())
        .collect();
    if names.is_empty() {
        "none".to_string()
    } else {
        names
    }
}

/// Entry point behind `main`
pub fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    if args.dump_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut printer = build_printer(&args, config)?;
    if !args.exec.is_empty() {
        printer.context_mut().injector.inject(&args.exec.join("\n"));
    }

    let reader: Box<dyn Read + Send> = match &args.input {
        Some(path) => Box::new(
            std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Box::new(std::io::stdin()),
    };
    let feeder = spawn_feeder(reader, printer.input.clone());

    let outcome = drive(&mut printer);
    if outcome == StepOutcome::Halted {
        tracing::error!("Printer halted");
    } else if feeder.join().is_err() {
        tracing::error!("Input thread panicked");
    }

    for line in summary(&printer) {
        eprintln!("{}", line);
    }
    Ok(())
}
