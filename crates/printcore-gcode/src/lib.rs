//! # printcore G-code
//!
//! The command interpreter: parsing, the dispatcher and its handlers, motion
//! preparation with segmentation and leveling, homing and probing. Hardware
//! is reached only through the collaborator traits in [`devices`];
//! [`sim`] and [`printer`] provide a simulated machine to run against.

pub mod command;
pub mod context;
pub mod devices;
pub mod dispatcher;
pub mod handlers;
pub mod homing;
pub mod motion;
pub mod printer;
pub mod probing;
pub mod sim;
pub mod state;

pub use command::{CommandLetter, GcodeCommand, ParamMap};
pub use context::{Collaborators, Context, FirmwareInfo, PrintTimer, KILLED_MESSAGE};
pub use devices::{Clock, Heater, Planner, PlannerMove, ProbeDevice, StopMode, Thermal};
pub use dispatcher::{Ack, Dispatcher, HandlerResult, StepOutcome};
pub use motion::ArcRequest;
pub use printer::{PrinterBuilder, SimulatedPrinter};
pub use probing::ProbeSample;
pub use sim::{
    BedPlane, ManualClock, SimulatedMachine, SimulatedPlanner, SimulatedProbe, SimulatedThermal,
    SystemClock,
};
pub use state::{DebugFlags, InterpreterState};
