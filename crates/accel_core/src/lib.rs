//! Command and completion protocol for the Snappy/Zstd compression accelerator.
//!
//! This crate drives an external compression unit that is attached to the
//! core through RoCC custom instructions. It prepares device-visible memory,
//! pushes runtime tuning parameters to each codec pipeline, dispatches
//! requests without waiting and detects their completion through a
//! caller-owned signal word. The crate is `no_std` so the same driver runs on
//! bare-metal and Linux user-space targets, and on hosts through a simulated
//! command port.

#![no_std]

extern crate alloc;

use accel_common::rocc::{CommandKind, Pipeline, SocProfile};

/// Transports that carry a single RoCC command to the accelerator.
///
/// Provides the hardware port for RISC-V targets, a no-op port that turns
/// every command into nothing, and a recording port used to check the order
/// of protocol writes. Other transports (the behavioural simulator) implement
/// the same trait from outside this crate.
pub mod port;

/// Per-pipeline command channel built on top of a port.
///
/// Maps each protocol field (source, auxiliary buffers, destination, scalar
/// parameters) to the funct code of the pipeline on the selected SoC build
/// and issues it through the port.
pub mod channel;

/// Shadow of the runtime parameters last pushed to a pipeline.
pub mod config;

/// Completion signal words and the monitor that waits on them.
///
/// The device writes a nonzero value into a caller-owned, 8-byte aligned word
/// when a request finishes. The monitor issues the unit's completion check,
/// fences and polls that word according to a configurable policy.
pub mod completion;

/// Ordered, non-blocking submission of a request descriptor.
pub mod dispatch;

/// Frame inspection helpers used to validate buffers before dispatch.
///
/// Computes worst-case compressed sizes and reads the declared content size
/// out of Snappy and Zstd frames, so destinations can be checked against what
/// the device is about to write.
pub mod frame;

/// Blocking and non-blocking facades for the four codec pipelines.
pub mod pipeline;

/// Page-aligned, pre-faulted memory regions handed to the accelerator.
///
/// Regions are allocated page aligned and zeroed, with the first byte of
/// every page written before use so the device never takes a page fault on
/// a fresh mapping. A cursor carves a region into padded windows for laying
/// several outputs side by side.
pub mod region;

pub use channel::{AuxBuffer, CommandChannel, RoccChannel, ScalarParam};
pub use completion::{Completion, CompletionMonitor, CompletionSignal, PollPolicy};
pub use config::{LatencyInjection, PipelineConfig};
pub use dispatch::{AuxSet, RawRequest};
pub use pipeline::{
    CompressScratch, InFlight, SnappyCompressor, SnappyDecompressor, ZstdCompressor,
    ZstdDecompressor,
};
pub use port::{CommandPort, NullPort, RecordingPort};
pub use region::{DeviceRegion, RegionCursor};

/// Error types returned by the accelerator driver.
///
/// Covers setup failures (regions, unsupported commands on a SoC build) and
/// the contract checks made before a request is dispatched. Outcomes of a
/// dispatched request are never reported here; they travel through the
/// completion signal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccelError {
    /// A region of zero bytes was requested.
    #[error("device regions must be at least one byte long")]
    EmptyRegion,

    /// The requested region size cannot be described by a layout.
    #[error("region size does not fit a page-aligned layout")]
    OutOfMemory,

    /// A region cursor has no room left for the requested window.
    #[error("region exhausted: window of {requested} bytes, {remaining} bytes remaining")]
    RegionExhausted { requested: usize, remaining: usize },

    /// The SoC build does not contain the pipeline.
    #[error("{} is not present on the {} build", pipeline.name(), profile.name())]
    PipelineUnavailable {
        pipeline: Pipeline,
        profile: SocProfile,
    },

    /// The pipeline has no funct code for the command on this build.
    #[error("{} does not support {command:?}", pipeline.name())]
    Unsupported {
        pipeline: Pipeline,
        command: CommandKind,
    },

    /// A raw request does not carry the buffers the pipeline expects.
    #[error("request shape does not match {}", pipeline.name())]
    RequestMismatch { pipeline: Pipeline },

    /// The destination cannot hold what the device may write.
    #[error("destination too small: need {needed} bytes, have {available}")]
    DestinationTooSmall { needed: usize, available: usize },

    /// A scratch or workspace buffer is smaller than the device requires.
    #[error("scratch buffer too small: need {needed} bytes, have {available}")]
    ScratchTooSmall { needed: usize, available: usize },

    /// A Zstd frame does not declare its decompressed size.
    #[error("frame header does not declare a content size")]
    UnknownContentSize,

    /// The compressed input cannot be parsed far enough to size the output.
    #[error("malformed compressed frame")]
    MalformedFrame,

    /// Source and destination address ranges intersect.
    #[error("source and destination buffers overlap")]
    Overlap,

    /// The completion signal stayed clear for the whole poll budget.
    #[error("request did not complete after {spins} polls")]
    Stalled { spins: u64 },
}
