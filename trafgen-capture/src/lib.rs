//! Server-side engine of a multi-port packet traffic generator.
//!
//! The engine enumerates interfaces through an abstract capture driver,
//! keeps an ordered stream store per port, compiles streams into a bounded
//! send queue with the `trafgen` synthesizer, and runs two monitor workers
//! per port that turn driver callbacks into counters and rates. The
//! [`GenService`] façade is what an RPC layer dispatches onto.

pub mod error;

mod driver;
pub use driver::{
    CaptureDriver, CaptureEvent, CaptureHandle, DeviceDesc, Direction, HandleMode, LoopExit,
    NicCounter,
};

mod sendq;
pub use sendq::{PktDesc, SendQueue, PKT_DESC_SIZE, SEND_QUEUE_CAP};

mod stats;
pub use stats::{CounterBlock, PortCounters, StatsSnapshot};

mod monitor;

mod port;
pub use port::PortConfig;

mod service;
pub use service::GenService;

pub mod testing;
