//! Interpreter context
//!
//! [`Context`] is the single value the dispatcher owns and hands to every
//! handler: machine configuration, interpreter state, kinematics and
//! leveling, the collaborator devices and the transport producers. Wait
//! loops never block; they call [`Context::idle`] until their predicate
//! holds, which keeps the host fed, the heaters managed and the watchdogs
//! running.

use crate::devices::{Clock, Planner, ProbeDevice, Thermal};
use crate::state::InterpreterState;
use printcore_communication::{
    BusyState, ByteSource, CommandQueue, CommandSource, MacroInjector, Response, ResponseSink,
    SdCard, SdEvent, SdReader, SerialReader, TransportEvent, STOPPED_MESSAGE,
};
use printcore_core::{AxisFlags, GcodeError};
use printcore_kinematics::{BedLeveling, Kinematics};
use printcore_settings::{MachineConfig, PersistedSettings, SettingsStore};

/// Message sent when the control loop halts
pub const KILLED_MESSAGE: &str = "Printer halted. kill() called!";

/// Name, version and build date reported by M115
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub name: String,
    pub version: String,
    pub build_date: String,
}

impl Default for FirmwareInfo {
    fn default() -> Self {
        Self {
            name: "printcore".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_date: "unknown".to_string(),
        }
    }
}

/// Devices and streams the interpreter runs against
pub struct Collaborators {
    pub planner: Box<dyn Planner>,
    pub thermal: Box<dyn Thermal>,
    pub probe: Option<Box<dyn ProbeDevice>>,
    pub clock: Box<dyn Clock>,
    pub input: Box<dyn ByteSource>,
    pub output: Box<dyn ResponseSink>,
    pub sd_card: Option<Box<dyn SdCard>>,
    pub settings: Box<dyn SettingsStore>,
}

/// Print job stopwatch (M31, SD prints)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrintTimer {
    started_ms: Option<u64>,
    accumulated_ms: u64,
}

impl PrintTimer {
    /// Start or resume
    pub fn start(&mut self, now_ms: u64) {
        if self.started_ms.is_none() {
            self.started_ms = Some(now_ms);
        }
    }

    /// Pause, keeping the elapsed time
    pub fn pause(&mut self, now_ms: u64) {
        if let Some(start) = self.started_ms.take() {
            self.accumulated_ms += now_ms.saturating_sub(start);
        }
    }

    /// Stop; the elapsed time stays readable until the next start
    pub fn stop(&mut self, now_ms: u64) {
        self.pause(now_ms);
    }

    /// Clear a stopped timer before a new job
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_running(&self) -> bool {
        self.started_ms.is_some()
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        self.accumulated_ms + self.started_ms.map_or(0, |s| now_ms.saturating_sub(s))
    }
}

/// Everything a handler can touch
pub struct Context {
    pub config: MachineConfig,
    /// Configuration as loaded at boot, restored by M502
    pub factory: MachineConfig,
    pub state: InterpreterState,
    pub kinematics: Box<dyn Kinematics>,
    pub leveling: BedLeveling,
    pub planner: Box<dyn Planner>,
    pub thermal: Box<dyn Thermal>,
    pub probe: Option<Box<dyn ProbeDevice>>,
    pub clock: Box<dyn Clock>,
    pub settings: Box<dyn SettingsStore>,
    pub queue: CommandQueue,
    pub injector: MacroInjector,
    pub serial: SerialReader,
    pub sd: SdReader,
    pub print_timer: PrintTimer,
    pub firmware: FirmwareInfo,
    /// Producer of the command being handled
    pub current_source: CommandSource,
    /// Millisecond time of the last command activity
    pub previous_cmd_ms: u64,
    input: Box<dyn ByteSource>,
    out: Box<dyn ResponseSink>,
    busy: Option<BusyState>,
    next_busy_ms: u64,
    halted: bool,
    cancel_wait: bool,
}

impl Context {
    /// Build the context and restore stored settings
    ///
    /// `config` becomes the factory configuration. Stored settings that
    /// fail to load are reported and ignored.
    pub fn new(
        config: MachineConfig,
        devices: Collaborators,
        firmware: FirmwareInfo,
    ) -> printcore_core::Result<Self> {
        let kinematics = printcore_kinematics::build(&config)?;
        let state = InterpreterState::new(&config);

        let mut ctx = Self {
            factory: config.clone(),
            kinematics,
            state,
            leveling: BedLeveling::new(),
            planner: devices.planner,
            thermal: devices.thermal,
            probe: devices.probe,
            clock: devices.clock,
            settings: devices.settings,
            queue: CommandQueue::new(config.queue.bufsize, config.queue.max_cmd_size),
            injector: MacroInjector::new(),
            serial: SerialReader::new(config.queue.max_cmd_size),
            sd: SdReader::new(devices.sd_card, config.queue.max_cmd_size),
            print_timer: PrintTimer::default(),
            firmware,
            current_source: CommandSource::Serial,
            previous_cmd_ms: 0,
            input: devices.input,
            out: devices.output,
            busy: None,
            next_busy_ms: 0,
            halted: false,
            cancel_wait: false,
            config,
        };

        if let Err(e) = ctx.load_stored_settings() {
            tracing::warn!("Stored settings ignored: {}", e);
            ctx.echo(e.to_string());
        }
        ctx.planner.apply_limits(&ctx.config.motion);
        ctx.sync_plan_position()?;
        ctx.previous_cmd_ms = ctx.clock.now_ms();
        tracing::info!(
            "{} {} ready: {} with {} tool(s)",
            ctx.firmware.name,
            ctx.firmware.version,
            ctx.config.geometry,
            ctx.config.extruders.count
        );
        Ok(ctx)
    }

    /// Apply the stored snapshot, if there is one
    ///
    /// Returns whether anything was loaded.
    pub fn load_stored_settings(&mut self) -> Result<bool, GcodeError> {
        let stored = self.settings.load().map_err(settings_error)?;
        let Some(snapshot) = stored else {
            return Ok(false);
        };
        let mut config = self.config.clone();
        snapshot.apply_to(&mut config).map_err(settings_error)?;
        self.install_config(config)?;
        tracing::info!("Settings restored from {}", self.settings.describe());
        Ok(true)
    }

    /// Store the persisted subset of the current configuration
    pub fn store_settings(&mut self) -> Result<(), GcodeError> {
        let snapshot = PersistedSettings::from_config(&self.config);
        self.settings.save(&snapshot).map_err(settings_error)
    }

    /// Replace the configuration, rebuilding everything derived from it
    pub fn install_config(&mut self, config: MachineConfig) -> Result<(), GcodeError> {
        let kinematics = printcore_kinematics::build(&config)?;
        self.kinematics = kinematics;
        self.config = config;
        for axis in 0..printcore_core::XYZ {
            self.state.update_software_endstops(&self.config, axis);
        }
        self.state.update_volumetric(&self.config);
        self.planner.apply_limits(&self.config.motion);
        Ok(())
    }

    pub fn send(&mut self, response: Response) {
        self.out.send(response);
    }

    pub fn echo(&mut self, message: impl Into<String>) {
        self.out.send(Response::echo(message));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.out.send(Response::error(message));
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Note command activity for the inactivity watchdogs
    pub fn refresh_cmd_timeout(&mut self) {
        self.previous_cmd_ms = self.clock.now_ms();
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    /// Keepalive reason while a handler holds the loop
    pub fn set_busy(&mut self, busy: Option<BusyState>) {
        self.busy = busy;
    }

    pub fn busy(&self) -> Option<BusyState> {
        self.busy
    }

    /// Ask the running wait loop to give up (M108)
    pub fn cancel_wait(&mut self) {
        self.cancel_wait = true;
    }

    /// Clear a pending wait cancellation before a new wait starts
    pub fn begin_wait(&mut self) {
        self.cancel_wait = false;
    }

    pub fn wait_cancelled(&self) -> bool {
        self.cancel_wait
    }

    /// Input stream has ended and nothing more will arrive
    pub fn input_closed(&self) -> bool {
        self.input.is_closed()
    }

    /// Fatal halt: everything off, no more commands
    pub fn kill(&mut self, reason: &str) {
        if self.halted {
            return;
        }
        tracing::error!("Kill: {}", reason);
        self.thermal.disable_all();
        self.planner.quick_stop();
        self.planner.disable_steppers(AxisFlags::ALL);
        self.state.clear_homed(AxisFlags::ALL);
        self.echo(reason.to_string());
        self.error(KILLED_MESSAGE);
        self.halted = true;
    }

    /// Soft stop: heaters off, motion refused until M999
    pub fn stop(&mut self) {
        self.thermal.disable_all();
        if self.state.running {
            self.state.stopped_last_line = self.serial.last_line();
            tracing::warn!("Printer stopped at line {}", self.state.stopped_last_line);
            self.error(STOPPED_MESSAGE);
        }
        self.state.running = false;
    }

    /// Cooperative background work, called from every wait loop
    pub fn idle(&mut self) {
        if self.halted {
            self.clock.tick();
            return;
        }
        self.service_transport();
        self.manage_thermal();
        self.manage_inactivity();
        self.host_keepalive();
        self.clock.tick();
    }

    /// Run [`Context::idle`] until `done` holds
    ///
    /// Fails when the loop gets halted while waiting.
    pub fn wait_until(
        &mut self,
        mut done: impl FnMut(&mut Self) -> bool,
    ) -> Result<(), GcodeError> {
        loop {
            if self.halted {
                return Err(GcodeError::Halted {
                    reason: "halted while waiting".to_string(),
                });
            }
            if done(self) {
                return Ok(());
            }
            self.idle();
        }
    }

    /// Wait for every planned move to finish
    pub fn synchronize(&mut self) -> Result<(), GcodeError> {
        self.wait_until(|ctx| !ctx.planner.is_busy())
    }

    /// Let the producers fill the queue
    ///
    /// The injector has priority; serial and SD are only read once the
    /// injected script is exhausted.
    pub fn service_transport(&mut self) {
        if self.injector.drain(&mut self.queue, self.out.as_mut()) {
            return;
        }

        let events = self.serial.poll(
            self.input.as_mut(),
            &mut self.queue,
            self.out.as_mut(),
            !self.state.running,
        );
        for event in events {
            self.handle_transport_event(event);
        }
        if self.halted {
            return;
        }

        if let Some(SdEvent::Finished { file }) = self.sd.poll(&mut self.queue) {
            self.finish_sd_print(&file);
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::EmergencyStop => self.kill("Killed by M112"),
            TransportEvent::BreakWait => self.cancel_wait = true,
            TransportEvent::QuickStop => {
                if let Err(e) = self.quick_stop() {
                    tracing::warn!("Quick stop could not resync: {}", e);
                }
            }
        }
    }

    /// Drop planned moves and take the position from the steppers (M410)
    pub fn quick_stop(&mut self) -> Result<(), GcodeError> {
        self.planner.quick_stop();
        self.set_current_from_steppers()?;
        self.sync_plan_position()
    }

    fn finish_sd_print(&mut self, file: &str) {
        let now = self.now_ms();
        self.print_timer.stop(now);
        let minutes = self.print_timer.elapsed_ms(now) / 60_000;
        tracing::info!("SD print of {} finished", file);
        self.send(Response::raw("Done printing file"));
        self.echo(format!("{} hours {} minutes", minutes / 60, minutes % 60));
    }

    fn manage_thermal(&mut self) {
        let now = self.clock.now_ms();
        self.thermal.tick(now);
        if let Some(fault) = self.thermal.take_fault() {
            tracing::error!("Thermal fault: {}", fault);
            self.error(fault);
            self.stop();
        }
    }

    fn manage_inactivity(&mut self) {
        let now = self.clock.now_ms();
        let idle_ms = now.saturating_sub(self.previous_cmd_ms);
        let safety = &self.config.safety;

        if safety.max_inactive_time_ms > 0 && idle_ms >= safety.max_inactive_time_ms {
            self.kill("Inactive time kill");
            return;
        }

        if safety.stepper_inactive_time_ms > 0
            && idle_ms >= safety.stepper_inactive_time_ms
            && self.planner.steppers_enabled()
            && !self.planner.is_busy()
        {
            tracing::info!("Steppers idle for {} ms, disabling", idle_ms);
            self.planner.disable_steppers(AxisFlags::ALL);
            self.state.clear_homed(AxisFlags::ALL);
        }
    }

    fn host_keepalive(&mut self) {
        let now = self.clock.now_ms();
        let host = &self.config.host;
        if host.keepalive {
            if let Some(busy) = self.busy {
                if now < self.next_busy_ms {
                    return;
                }
                self.send(Response::Busy(busy));
            }
        }
        self.next_busy_ms = now + self.config.host.keepalive_interval_ms;
    }
}

fn settings_error(e: impl std::fmt::Display) -> GcodeError {
    GcodeError::Settings {
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_timer_accumulates_across_pauses() {
        let mut timer = PrintTimer::default();
        timer.start(1_000);
        timer.pause(4_000);
        assert!(!timer.is_running());
        assert_eq!(timer.elapsed_ms(10_000), 3_000);
        timer.start(10_000);
        assert_eq!(timer.elapsed_ms(12_500), 5_500);
        timer.stop(13_000);
        assert_eq!(timer.elapsed_ms(99_000), 6_000);
        timer.reset();
        assert_eq!(timer.elapsed_ms(99_000), 0);
    }
}
