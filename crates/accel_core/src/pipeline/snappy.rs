//! Snappy compress and decompress facades.

use super::{Engine, InFlight, facade_common};
use crate::channel::ScalarParam;
use crate::completion::Completion;
use crate::dispatch::{AuxSet, RawRequest};
use crate::frame::{snappy_decompressed_len, snappy_max_compressed_len};
use crate::port::CommandPort;
use crate::AccelError;
use accel_common::rocc::Pipeline;

fn raw_request(src: &[u8], dst: &mut [u8]) -> RawRequest {
    RawRequest {
        src: src.as_ptr() as u64,
        src_len: src.len() as u64,
        aux: AuxSet::None,
        dst: dst.as_mut_ptr() as u64,
        dst_capacity: dst.len() as u64,
        level: None,
    }
}

fn check_capacity(needed: usize, dst: &[u8]) -> Result<(), AccelError> {
    if dst.len() < needed {
        return Err(AccelError::DestinationTooSmall {
            needed,
            available: dst.len(),
        });
    }
    Ok(())
}

/// Snappy compression pipeline.
///
/// Produces a raw Snappy block (no framing format) and reports the number of
/// bytes written through the completion signal.
#[derive(Debug)]
pub struct SnappyCompressor<P> {
    engine: Engine<P>,
}

impl<P: CommandPort> SnappyCompressor<P> {
    facade_common!(Pipeline::SnappyCompress);

    /// Sets the hash table size to `1 << log2` entries.
    ///
    /// # Arguments
    ///
    /// * `log2` - Base-2 logarithm of the entry count
    ///
    /// # Returns
    ///
    /// `Ok(())` once the write is issued and shadowed in [`Self::config`].
    pub fn set_hash_table_log2(&mut self, log2: u64) -> Result<(), AccelError> {
        self.engine.push(ScalarParam::HashTableLog2(log2))
    }

    /// Destination size needed to compress `len` bytes.
    pub fn max_compressed_len(len: usize) -> usize {
        snappy_max_compressed_len(len)
    }

    /// Compresses `src` into `dst` and blocks until done.
    ///
    /// # Returns
    ///
    /// The number of bytes written to `dst`, or an error if `dst` is smaller
    /// than the worst-case output.
    pub fn compress(&mut self, src: &[u8], dst: &mut [u8]) -> Result<u64, AccelError> {
        check_capacity(snappy_max_compressed_len(src.len()), dst)?;
        let request = raw_request(src, dst);
        // SAFETY: src and dst stay borrowed until run returns.
        let completion = unsafe { self.engine.run(&request)? };
        Ok(completion.produced_bytes())
    }

    /// Starts compressing `src` into `dst`, runs `host_work` while the
    /// device works, then waits.
    ///
    /// # Arguments
    ///
    /// * `src` - Uncompressed input
    /// * `dst` - Output, at least [`Self::max_compressed_len`] bytes
    /// * `host_work` - Closure run with the in-flight handle
    ///
    /// # Returns
    ///
    /// The closure's output and the completion, whose `produced_bytes` is
    /// the block size. Nothing is dispatched if `dst` is too small.
    pub fn compress_nonblocking<R>(
        &mut self,
        src: &[u8],
        dst: &mut [u8],
        host_work: impl FnOnce(&mut InFlight<'_, P>) -> R,
    ) -> Result<(R, Completion), AccelError> {
        check_capacity(snappy_max_compressed_len(src.len()), dst)?;
        let request = raw_request(src, dst);
        // SAFETY: src and dst stay borrowed until scope returns.
        unsafe { self.engine.scope(&request, host_work) }
    }
}

/// Snappy decompression pipeline.
///
/// Consumes a raw Snappy block. The device reports success only; the
/// produced size is the one declared in the block preamble.
#[derive(Debug)]
pub struct SnappyDecompressor<P> {
    engine: Engine<P>,
}

impl<P: CommandPort> SnappyDecompressor<P> {
    facade_common!(Pipeline::SnappyDecompress);

    /// Size the block in `src` decompresses to.
    pub fn expected_len(src: &[u8]) -> Result<usize, AccelError> {
        snappy_decompressed_len(src)
    }

    /// Decompresses `src` into `dst` and blocks until done.
    ///
    /// # Returns
    ///
    /// The device's success flag, or an error if the preamble cannot be read
    /// or `dst` is smaller than the declared size.
    pub fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> Result<bool, AccelError> {
        check_capacity(snappy_decompressed_len(src)?, dst)?;
        let request = raw_request(src, dst);
        // SAFETY: src and dst stay borrowed until run returns.
        let completion = unsafe { self.engine.run(&request)? };
        Ok(completion.success())
    }

    /// Starts decompressing `src` into `dst`, runs `host_work`, then waits.
    pub fn decompress_nonblocking<R>(
        &mut self,
        src: &[u8],
        dst: &mut [u8],
        host_work: impl FnOnce(&mut InFlight<'_, P>) -> R,
    ) -> Result<(R, Completion), AccelError> {
        check_capacity(snappy_decompressed_len(src)?, dst)?;
        let request = raw_request(src, dst);
        // SAFETY: src and dst stay borrowed until scope returns.
        unsafe { self.engine.scope(&request, host_work) }
    }
}
