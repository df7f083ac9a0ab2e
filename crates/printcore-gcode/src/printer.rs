//! Simulated printer
//!
//! Wires a [`Dispatcher`] to the simulated collaborators. Tests and the host
//! binary drive it by pushing bytes into [`SimulatedPrinter::input`] and
//! stepping the main loop.

use crate::context::{Collaborators, Context, FirmwareInfo};
use crate::devices::{Clock, ProbeDevice};
use crate::dispatcher::{Dispatcher, StepOutcome};
use crate::sim::{ManualClock, SimulatedMachine, SimulatedThermal};
use printcore_communication::{CapturedOutput, ResponseSink, SdCard, SerialInput};
use printcore_core::Result;
use printcore_settings::{MachineConfig, MemorySettingsStore, SettingsStore};

/// Builder for [`SimulatedPrinter`]
pub struct PrinterBuilder {
    config: MachineConfig,
    firmware: FirmwareInfo,
    clock: Option<Box<dyn Clock>>,
    output: Option<Box<dyn ResponseSink>>,
    sd_card: Option<Box<dyn SdCard>>,
    settings: Option<Box<dyn SettingsStore>>,
    has_bed: bool,
}

impl PrinterBuilder {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            firmware: FirmwareInfo::default(),
            clock: None,
            output: None,
            sd_card: None,
            settings: None,
            has_bed: true,
        }
    }

    pub fn firmware(mut self, firmware: FirmwareInfo) -> Self {
        self.firmware = firmware;
        self
    }

    /// Time source; defaults to a [`ManualClock`] ticking 10 ms per wait step
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    /// Where host responses go; defaults to a [`CapturedOutput`]
    pub fn output(mut self, output: impl ResponseSink + 'static) -> Self {
        self.output = Some(Box::new(output));
        self
    }

    /// Card to mount at start-up
    pub fn sd_card(mut self, card: impl SdCard + 'static) -> Self {
        self.sd_card = Some(Box::new(card));
        self
    }

    /// Persisted settings store; defaults to an empty in-memory one
    pub fn settings(mut self, store: impl SettingsStore + 'static) -> Self {
        self.settings = Some(Box::new(store));
        self
    }

    pub fn heated_bed(mut self, has_bed: bool) -> Self {
        self.has_bed = has_bed;
        self
    }

    pub fn build(self) -> Result<SimulatedPrinter> {
        self.config
            .validate()
            .map_err(|e| printcore_core::Error::other(e.to_string()))?;

        let machine = SimulatedMachine::new(&self.config)?;
        let thermal = SimulatedThermal::new(self.config.extruders.count, self.has_bed);
        let input = SerialInput::new();
        let output = CapturedOutput::new();
        let probe: Option<Box<dyn ProbeDevice>> = if self.config.probe.enabled {
            Some(Box::new(machine.probe()))
        } else {
            None
        };
        let has_card = self.sd_card.is_some();

        let devices = Collaborators {
            planner: Box::new(machine.planner()),
            thermal: Box::new(thermal.clone()),
            probe,
            clock: self
                .clock
                .unwrap_or_else(|| Box::new(ManualClock::new(10))),
            input: Box::new(input.clone()),
            output: self.output.unwrap_or_else(|| Box::new(output.clone())),
            sd_card: self.sd_card,
            settings: self
                .settings
                .unwrap_or_else(|| Box::new(MemorySettingsStore::new())),
        };

        let mut ctx = Context::new(self.config, devices, self.firmware)?;
        if has_card {
            if let Err(e) = ctx.sd.mount() {
                tracing::warn!("SD card not mounted: {}", e);
            }
        }

        Ok(SimulatedPrinter {
            dispatcher: Dispatcher::new(ctx),
            machine,
            thermal,
            input,
            output,
        })
    }
}

/// Interpreter running against simulated hardware
pub struct SimulatedPrinter {
    pub dispatcher: Dispatcher,
    /// Planner, steppers, endstops and probe
    pub machine: SimulatedMachine,
    pub thermal: SimulatedThermal,
    /// Host side of the serial link
    pub input: SerialInput,
    /// Responses, unless a different sink was configured
    pub output: CapturedOutput,
}

impl SimulatedPrinter {
    /// Printer with default hardware for `config`
    pub fn new(config: MachineConfig) -> Result<Self> {
        PrinterBuilder::new(config).build()
    }

    pub fn builder(config: MachineConfig) -> PrinterBuilder {
        PrinterBuilder::new(config)
    }

    pub fn context(&self) -> &Context {
        self.dispatcher.context()
    }

    pub fn context_mut(&mut self) -> &mut Context {
        self.dispatcher.context_mut()
    }

    pub fn step(&mut self) -> StepOutcome {
        self.dispatcher.step()
    }

    /// Step until the queue, the input and any SD print are exhausted
    ///
    /// Gives up after `max_steps` and returns the last outcome.
    pub fn run_until_idle(&mut self, max_steps: usize) -> StepOutcome {
        let mut outcome = StepOutcome::Idle;
        for _ in 0..max_steps {
            outcome = self.step();
            let ctx = self.dispatcher.context();
            let drained = ctx.queue.is_empty()
                && self.input.is_empty()
                && !ctx.sd.is_printing()
                && !ctx.injector.is_active();
            if outcome == StepOutcome::Halted || (outcome == StepOutcome::Idle && drained) {
                break;
            }
        }
        outcome
    }

    /// Send lines as the host would and run them to completion
    ///
    /// Returns the responses produced meanwhile.
    pub fn run_lines(&mut self, lines: &[&str]) -> Vec<String> {
        for line in lines {
            self.input.push_line(line);
        }
        self.run_until_idle(100_000);
        self.output.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_printer_answers_ok() {
        let mut printer = SimulatedPrinter::new(MachineConfig::default()).unwrap();
        let lines = printer.run_lines(&["G90"]);
        assert_eq!(lines, vec!["ok".to_string()]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = MachineConfig::default();
        config.queue.bufsize = 0;
        assert!(SimulatedPrinter::new(config).is_err());
    }
}
