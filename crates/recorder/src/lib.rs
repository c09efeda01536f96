//! Distributed recording for Tally
//!
//! Remote processes record coverage and stream it to a collector:
//!
//! - [`HitCounters`]: lock-free per-slot hit counters for instrumented code
//! - [`protocol`]: recorder messages and the checksummed frame format
//! - [`SliceCollector`]: per-recorder slice state machines and hit totals
//! - [`TcpRecorderService`]: collector side, applies and acknowledges frames
//! - [`TcpRecorderListener`]: recorder side, buffers and retries delivery
//! - [`DistributedConfig`]: settings from TOML, `key=value` pairs or env

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collector;
pub mod config;
pub mod counters;
pub mod error;
pub mod listener;
pub mod protocol;
pub mod service;

pub use collector::{
    ClosedSlice, RecorderSummary, SliceCollector, SliceOutcome, DEFAULT_MAX_SLOTS, LOCAL_EPOCH,
};
pub use config::{ConfigError, DistributedConfig, ENV_PREFIX};
pub use counters::HitCounters;
pub use error::{RecorderError, RecorderResult};
pub use listener::{RecorderListener, TcpRecorderListener};
pub use protocol::{
    Ack, Envelope, ErrorInfo, Flush, MethodEnd, MethodStart, RecorderMessage, FRAME_MAGIC,
    PROTOCOL_VERSION,
};
pub use service::{RecorderService, TcpRecorderService};
