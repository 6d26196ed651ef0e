//! Request execution against host memory.
//!
//! A job is a fully staged request. Running it reads the source by address,
//! produces the output with the software codecs, writes it to the
//! destination and finally stores the completion word. Inputs the codecs
//! reject never complete, which is how the hardware behaves on a malformed
//! stream.

use accel_common::rocc::Pipeline;
use accel_core::PipelineConfig;
use accel_core::frame::zstd_content_size;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use zstd::stream::raw::CParameter;

/// Smallest and largest window log the model compresses with.
///
/// The upper bound keeps frames decodable by decoders using the default
/// window limit.
const WINDOW_LOG_RANGE: (u32, u32) = (10, 27);
const HASH_LOG_RANGE: (u32, u32) = (6, 30);

/// Delay applied before completing a request in threaded mode.
///
/// Models one nanosecond per injected cycle; without an intermediate cache
/// every access pays twice.
pub(crate) fn completion_delay(tuning: &PipelineConfig) -> Duration {
    match tuning.latency {
        Some(latency) => {
            let factor = if latency.has_cache { 1 } else { 2 };
            Duration::from_nanos(latency.cycles.saturating_mul(factor))
        }
        None => Duration::ZERO,
    }
}

/// Extra buffers staged with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobAux {
    None,
    Scratch {
        literals: (u64, u64),
        sequences: (u64, u64),
    },
    Workspace(u64),
}

/// One staged request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Job {
    pub pipeline: Pipeline,
    pub src: u64,
    pub src_len: u64,
    pub aux: JobAux,
    pub dst: u64,
    pub signal: u64,
    pub level: i32,
    pub tuning: PipelineConfig,
}

impl Job {
    /// Runs the request and writes its output, without signalling.
    ///
    /// # Returns
    ///
    /// The completion word to publish, or `None` if the request never
    /// completes.
    ///
    /// # Safety
    ///
    /// Every address in the job must be valid as described by the dispatch
    /// that staged it, and the destination must hold the produced output.
    pub unsafe fn run(&self) -> Option<u64> {
        if let JobAux::Scratch {
            literals,
            sequences,
        } = self.aux
        {
            if literals.1 < self.src_len || sequences.1 < self.src_len {
                warn!(
                    src_len = self.src_len,
                    literals = literals.1,
                    sequences = sequences.1,
                    "scratch smaller than source, never completing"
                );
                return None;
            }
        }

        // SAFETY: the driver keeps the source borrowed until completion.
        let src = unsafe { slice_at(self.src, self.src_len) };
        if let JobAux::Scratch { literals, .. } = self.aux {
            // Worst case every byte is a literal.
            // SAFETY: the literal scratch holds at least src_len bytes.
            unsafe { copy_out(src, literals.0) };
        }
        let outcome = match self.pipeline {
            Pipeline::SnappyCompress => snap::raw::Encoder::new()
                .compress_vec(src)
                .map_err(io::Error::other),
            Pipeline::SnappyDecompress => snap::raw::Decoder::new()
                .decompress_vec(src)
                .map_err(io::Error::other),
            Pipeline::ZstdCompress => self.zstd_compress(src),
            Pipeline::ZstdDecompress => zstd_decompress(src),
        };

        let output = match outcome {
            Ok(output) => output,
            Err(err) => {
                warn!(
                    pipeline = self.pipeline.name(),
                    %err,
                    "rejected request, never completing"
                );
                return None;
            }
        };

        // SAFETY: capacities were checked by the driver before dispatch.
        unsafe {
            if let JobAux::Workspace(addr) = self.aux {
                copy_out(&output, addr);
            }
            copy_out(&output, self.dst);
        }

        let value = if self.pipeline.is_compress() {
            output.len() as u64
        } else {
            1
        };
        debug!(
            pipeline = self.pipeline.name(),
            src_len = self.src_len,
            out_len = output.len(),
            "request complete"
        );
        Some(value)
    }

    /// Stores `value` into the request's completion word.
    ///
    /// # Safety
    ///
    /// The completion word must still be the aligned, live u64 the driver
    /// staged. The driver may release every buffer as soon as this returns.
    pub unsafe fn publish(&self, value: u64) {
        // SAFETY: forwarded from the caller.
        unsafe { AtomicU64::from_ptr(self.signal as *mut u64).store(value, Ordering::Release) };
    }

    fn zstd_compress(&self, src: &[u8]) -> io::Result<Vec<u8>> {
        let mut compressor = zstd::bulk::Compressor::new(self.level)?;
        if let Some(history) = self.tuning.history {
            compressor.set_parameter(CParameter::WindowLog(window_log(history)))?;
        }
        if let Some(log2) = self.tuning.hash_table_log2 {
            let log2 = log2.clamp(HASH_LOG_RANGE.0.into(), HASH_LOG_RANGE.1.into()) as u32;
            compressor.set_parameter(CParameter::HashLog(log2))?;
        }
        compressor.compress(src)
    }
}

/// Decodes one frame whose header declares its size.
fn zstd_decompress(src: &[u8]) -> io::Result<Vec<u8>> {
    let declared = zstd_content_size(src).map_err(io::Error::other)?;
    let output = zstd::stream::decode_all(src)?;
    if output.len() as u64 != declared {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame declares {declared} bytes, decoded {}", output.len()),
        ));
    }
    Ok(output)
}

/// Window log covering a history of `bytes`.
pub(crate) fn window_log(bytes: u64) -> u32 {
    let log = 64 - bytes.max(1).saturating_sub(1).leading_zeros();
    log.clamp(WINDOW_LOG_RANGE.0, WINDOW_LOG_RANGE.1)
}

unsafe fn slice_at<'a>(addr: u64, len: u64) -> &'a [u8] {
    if len == 0 {
        return &[];
    }
    // SAFETY: forwarded from the caller.
    unsafe { std::slice::from_raw_parts(addr as *const u8, len as usize) }
}

unsafe fn copy_out(data: &[u8], addr: u64) {
    if data.is_empty() {
        return;
    }
    // SAFETY: forwarded from the caller.
    unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), addr as *mut u8, data.len()) };
}
