//! # printcore Communication
//!
//! Everything between the host byte stream and the dispatcher:
//! the bounded command queue and its three producers (macro injector,
//! serial line reader, SD reader), plus the formatting and sinks for the
//! lines sent back to the host.

pub mod injector;
pub mod queue;
pub mod response;
pub mod sd;
pub mod serial;

pub use injector::MacroInjector;
pub use queue::{CommandQueue, CommandSource, QueueEntry};
pub use response::{BusyState, CapturedOutput, Response, ResponseSink, WriterSink};
pub use sd::{DirectorySdCard, MemorySdCard, SdCard, SdEvent, SdReader};
pub use serial::{
    checksum, frame_line, ByteSource, SerialInput, SerialReader, TransportEvent, STOPPED_MESSAGE,
};
