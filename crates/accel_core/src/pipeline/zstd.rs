//! Zstd compress and decompress facades.

use super::{Engine, InFlight, facade_common};
use crate::channel::ScalarParam;
use crate::completion::Completion;
use crate::config::LatencyInjection;
use crate::dispatch::{AuxSet, RawRequest};
use crate::frame::{zstd_compress_bound, zstd_content_size};
use crate::port::CommandPort;
use crate::region::DeviceRegion;
use crate::AccelError;
use accel_common::rocc::Pipeline;

/// Literal and sequence stream scratch buffers for Zstd compression.
///
/// The device splits each block into a literal stream and a sequence stream
/// before entropy coding. Each buffer must be at least as large as the
/// source being compressed.
#[derive(Debug)]
pub struct CompressScratch<'a> {
    pub literals: &'a mut [u8],
    pub sequences: &'a mut [u8],
}

impl<'a> CompressScratch<'a> {
    pub fn new(literals: &'a mut [u8], sequences: &'a mut [u8]) -> Self {
        Self {
            literals,
            sequences,
        }
    }

    /// Largest source the scratch can serve.
    pub fn capacity(&self) -> usize {
        self.literals.len().min(self.sequences.len())
    }

    fn check(&self, src_len: usize) -> Result<(), AccelError> {
        if self.capacity() < src_len {
            return Err(AccelError::ScratchTooSmall {
                needed: src_len,
                available: self.capacity(),
            });
        }
        Ok(())
    }

    fn aux(&mut self) -> AuxSet {
        AuxSet::ZstdScratch {
            literals: (self.literals.as_mut_ptr() as u64, self.literals.len() as u64),
            sequences: (
                self.sequences.as_mut_ptr() as u64,
                self.sequences.len() as u64,
            ),
        }
    }
}

/// Zstd compression pipeline.
///
/// Emits one Zstd frame per request. The compression level travels with
/// each request and its write is what starts the device.
#[derive(Debug)]
pub struct ZstdCompressor<P> {
    engine: Engine<P>,
}

impl<P: CommandPort> ZstdCompressor<P> {
    /// Level the benchmark drivers compress with.
    pub const DEFAULT_LEVEL: i32 = 16;

    facade_common!(Pipeline::ZstdCompress);

    /// Sets the match finder hash table size to `1 << log2` entries.
    ///
    /// # Arguments
    ///
    /// * `log2` - Base-2 logarithm of the entry count
    pub fn set_hash_table_log2(&mut self, log2: u64) -> Result<(), AccelError> {
        self.engine.push(ScalarParam::HashTableLog2(log2))
    }

    /// Injects a memory latency model into the unit.
    ///
    /// # Arguments
    ///
    /// * `latency` - Cycles added per memory access and whether the modelled
    ///   cache absorbs repeats
    ///
    /// # Returns
    ///
    /// `Ok(())` once pushed, or `AccelError::Unsupported` on units without a
    /// latency command.
    pub fn set_latency_injection(&mut self, latency: LatencyInjection) -> Result<(), AccelError> {
        self.engine.push(ScalarParam::LatencyInjection(latency))
    }

    /// Allocates a scratch region without touching the unit.
    pub fn setup_workspace(&mut self, capacity: usize) -> Result<DeviceRegion, AccelError> {
        DeviceRegion::allocate(capacity)
    }

    /// Destination size needed to compress `len` bytes.
    pub fn max_compressed_len(len: usize) -> usize {
        zstd_compress_bound(len)
    }

    fn request(
        src: &[u8],
        scratch: &mut CompressScratch<'_>,
        dst: &mut [u8],
        level: i32,
    ) -> Result<RawRequest, AccelError> {
        let needed = zstd_compress_bound(src.len());
        if dst.len() < needed {
            return Err(AccelError::DestinationTooSmall {
                needed,
                available: dst.len(),
            });
        }
        scratch.check(src.len())?;
        Ok(RawRequest {
            src: src.as_ptr() as u64,
            src_len: src.len() as u64,
            aux: scratch.aux(),
            dst: dst.as_mut_ptr() as u64,
            dst_capacity: dst.len() as u64,
            level: Some(level),
        })
    }

    /// Compresses `src` into `dst` at `level` and blocks until done.
    ///
    /// # Returns
    ///
    /// The size of the frame written to `dst`, or an error if `dst` or the
    /// scratch buffers are too small.
    pub fn compress(
        &mut self,
        src: &[u8],
        scratch: &mut CompressScratch<'_>,
        dst: &mut [u8],
        level: i32,
    ) -> Result<u64, AccelError> {
        let request = Self::request(src, scratch, dst, level)?;
        // SAFETY: every buffer stays borrowed until run returns.
        let completion = unsafe { self.engine.run(&request)? };
        Ok(completion.produced_bytes())
    }

    /// Starts compressing `src` into `dst` at `level`, runs `host_work`
    /// while the device works, then waits.
    ///
    /// # Arguments
    ///
    /// * `src` - Uncompressed input
    /// * `scratch` - Literal and sequence buffers covering `src`
    /// * `dst` - Output, at least [`Self::max_compressed_len`] bytes
    /// * `level` - Compression level sent as the start trigger
    /// * `host_work` - Closure run with the in-flight handle
    ///
    /// # Returns
    ///
    /// The closure's output and the completion carrying the frame size.
    pub fn compress_nonblocking<R>(
        &mut self,
        src: &[u8],
        scratch: &mut CompressScratch<'_>,
        dst: &mut [u8],
        level: i32,
        host_work: impl FnOnce(&mut InFlight<'_, P>) -> R,
    ) -> Result<(R, Completion), AccelError> {
        let request = Self::request(src, scratch, dst, level)?;
        // SAFETY: every buffer stays borrowed until scope returns.
        unsafe { self.engine.scope(&request, host_work) }
    }
}

/// Zstd decompression pipeline.
///
/// Consumes one frame that declares its content size. The device needs a
/// workspace at least that large and reports success only.
#[derive(Debug)]
pub struct ZstdDecompressor<P> {
    engine: Engine<P>,
}

impl<P: CommandPort> ZstdDecompressor<P> {
    facade_common!(Pipeline::ZstdDecompress);

    /// Injects a memory latency model into the unit.
    ///
    /// # Arguments
    ///
    /// * `latency` - Model applied to every request until replaced
    pub fn set_latency_injection(&mut self, latency: LatencyInjection) -> Result<(), AccelError> {
        self.engine.push(ScalarParam::LatencyInjection(latency))
    }

    /// Allocates a workspace region without touching the unit.
    pub fn setup_workspace(&mut self, capacity: usize) -> Result<DeviceRegion, AccelError> {
        DeviceRegion::allocate(capacity)
    }

    /// Size the frame in `src` decompresses to.
    pub fn expected_len(src: &[u8]) -> Result<usize, AccelError> {
        let size = zstd_content_size(src)?;
        usize::try_from(size).map_err(|_| AccelError::MalformedFrame)
    }

    fn request(src: &[u8], workspace: &mut [u8], dst: &mut [u8]) -> Result<RawRequest, AccelError> {
        let needed = Self::expected_len(src)?;
        if dst.len() < needed {
            return Err(AccelError::DestinationTooSmall {
                needed,
                available: dst.len(),
            });
        }
        if workspace.len() < needed {
            return Err(AccelError::ScratchTooSmall {
                needed,
                available: workspace.len(),
            });
        }
        Ok(RawRequest {
            src: src.as_ptr() as u64,
            src_len: src.len() as u64,
            aux: AuxSet::Workspace(workspace.as_mut_ptr() as u64),
            dst: dst.as_mut_ptr() as u64,
            dst_capacity: dst.len() as u64,
            level: None,
        })
    }

    /// Decompresses the frame in `src` into `dst` and blocks until done.
    pub fn decompress(
        &mut self,
        src: &[u8],
        workspace: &mut [u8],
        dst: &mut [u8],
    ) -> Result<bool, AccelError> {
        let request = Self::request(src, workspace, dst)?;
        // SAFETY: every buffer stays borrowed until run returns.
        let completion = unsafe { self.engine.run(&request)? };
        Ok(completion.success())
    }

    /// Starts decompressing `src` into `dst`, runs `host_work`, then waits.
    pub fn decompress_nonblocking<R>(
        &mut self,
        src: &[u8],
        workspace: &mut [u8],
        dst: &mut [u8],
        host_work: impl FnOnce(&mut InFlight<'_, P>) -> R,
    ) -> Result<(R, Completion), AccelError> {
        let request = Self::request(src, workspace, dst)?;
        // SAFETY: every buffer stays borrowed until scope returns.
        unsafe { self.engine.scope(&request, host_work) }
    }
}
