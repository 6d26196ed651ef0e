//! Non-blocking request submission.
//!
//! A request is a fixed sequence of protocol writes: optional algorithm
//! select, source, auxiliary buffers, destination with the completion word,
//! then the per-request level on units that take one. The last of those
//! writes starts the device, so the order is part of the protocol.

use crate::channel::{AuxBuffer, CommandChannel, ScalarParam};
use crate::completion::{CompletionSignal, device_fence};
use crate::frame::ranges_overlap;
use crate::AccelError;
use accel_common::rocc::Pipeline;
use tracing::trace;

/// Auxiliary buffers carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxSet {
    /// Snappy pipelines take none.
    None,
    /// Zstd-compress literal and sequence scratch, as `(addr, len)`.
    ZstdScratch {
        literals: (u64, u64),
        sequences: (u64, u64),
    },
    /// Zstd-decompress workspace address.
    Workspace(u64),
}

/// Request descriptor in device terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRequest {
    pub src: u64,
    pub src_len: u64,
    pub aux: AuxSet,
    pub dst: u64,
    /// Capacity of the destination. Checked on the host, never sent.
    pub dst_capacity: u64,
    /// Compression level for units that take one per request.
    pub level: Option<i32>,
}

impl RawRequest {
    /// Checks that the request carries what `pipeline` expects.
    fn validate(&self, pipeline: Pipeline, takes_level: bool) -> Result<(), AccelError> {
        let aux_matches = matches!(
            (pipeline, self.aux),
            (Pipeline::SnappyCompress | Pipeline::SnappyDecompress, AuxSet::None)
                | (Pipeline::ZstdCompress, AuxSet::ZstdScratch { .. })
                | (Pipeline::ZstdDecompress, AuxSet::Workspace(_))
        );
        if !aux_matches || self.level.is_some() != takes_level {
            return Err(AccelError::RequestMismatch { pipeline });
        }
        if ranges_overlap(self.src, self.src_len, self.dst, self.dst_capacity) {
            return Err(AccelError::Overlap);
        }
        Ok(())
    }
}

/// Submits `request` on `channel` and returns without waiting.
///
/// Clears `signal`, fences so the cleared word and the source data are
/// visible to the device, then writes the request fields in protocol order.
/// Nothing is issued if the request does not match the pipeline.
///
/// # Safety
///
/// Every address in `request`, and `signal` itself, must stay valid and must
/// not be read or written by the host in conflicting ways until the signal
/// reports completion. The destination must be large enough for whatever the
/// device produces.
pub unsafe fn dispatch_nonblocking<C>(
    channel: &mut C,
    request: &RawRequest,
    signal: &CompletionSignal,
) -> Result<(), AccelError>
where
    C: CommandChannel + ?Sized,
{
    let pipeline = channel.pipeline();
    let table = channel.table();
    request.validate(pipeline, table.level.is_some())?;

    signal.reset();
    device_fence();

    if table.select_algorithm.is_some() {
        channel.scalar_param(ScalarParam::Algorithm(pipeline.algorithm()))?;
    }

    // SAFETY: the caller keeps every buffer alive until completion.
    unsafe {
        channel.src_info(request.src, request.src_len);
        match request.aux {
            AuxSet::None => {}
            AuxSet::ZstdScratch {
                literals,
                sequences,
            } => {
                channel.aux_info(AuxBuffer::Literals, literals.0, literals.1)?;
                channel.aux_info(AuxBuffer::Sequences, sequences.0, sequences.1)?;
            }
            AuxSet::Workspace(addr) => channel.aux_info(AuxBuffer::Workspace, addr, 0)?,
        }
        channel.dest_info_and_start(request.dst, signal.addr());
        if let Some(level) = request.level {
            channel.level(level)?;
        }
    }

    trace!(
        pipeline = pipeline.name(),
        src_len = request.src_len,
        dst = request.dst,
        "dispatched"
    );
    Ok(())
}
