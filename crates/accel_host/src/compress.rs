//! Compression runs over a corpus.
//!
//! Every output of one tuning point lands in one device region, each in its
//! own 32-byte padded window. Each tuning point shifts the windows by one
//! granule so output left over from the previous point never verifies.

use crate::backend::{Device, HostPort};
use crate::corpus::Corpus;
use crate::cycles;
use crate::stats::{RunRecord, RunTotals};
use crate::{Codec, DeviceArgs, TuningArgs};
use accel_common::memory::{PAGE_SIZE, WINDOW_GRANULE};
use accel_core::region::corpus_capacity;
use accel_core::{AccelError, CompressScratch, DeviceRegion, SnappyCompressor, ZstdCompressor};
use anyhow::{Context, Result};
use tracing::{info, warn};

/// Skews available inside the extra page of a corpus region.
pub(crate) const SKEW_SLOTS: usize = PAGE_SIZE / WINDOW_GRANULE;

/// A compression pipeline the grid driver can tune and run.
trait CompressPass {
    fn bound(&self, len: usize) -> usize;
    fn region(&mut self, capacity: usize, history: u64) -> Result<DeviceRegion, AccelError>;
    fn tune(&mut self, history: u64, ht_log2: u64) -> Result<(), AccelError>;
    fn compress(&mut self, src: &[u8], dst: &mut [u8]) -> Result<u64, AccelError>;
    /// Whether the software codec decodes `frame` back to `expected`.
    fn verify(&self, frame: &[u8], expected: &[u8]) -> bool;
}

struct SnappyPass {
    compressor: SnappyCompressor<HostPort>,
}

impl CompressPass for SnappyPass {
    fn bound(&self, len: usize) -> usize {
        SnappyCompressor::<HostPort>::max_compressed_len(len)
    }

    fn region(&mut self, capacity: usize, history: u64) -> Result<DeviceRegion, AccelError> {
        self.compressor.setup_region(capacity, Some(history))
    }

    fn tune(&mut self, history: u64, ht_log2: u64) -> Result<(), AccelError> {
        self.compressor.set_history_size(history)?;
        self.compressor.set_hash_table_log2(ht_log2)
    }

    fn compress(&mut self, src: &[u8], dst: &mut [u8]) -> Result<u64, AccelError> {
        self.compressor.compress(src, dst)
    }

    fn verify(&self, frame: &[u8], expected: &[u8]) -> bool {
        snap::raw::Decoder::new()
            .decompress_vec(frame)
            .is_ok_and(|decoded| decoded == expected)
    }
}

struct ZstdPass {
    compressor: ZstdCompressor<HostPort>,
    literals: DeviceRegion,
    sequences: DeviceRegion,
    level: i32,
}

impl CompressPass for ZstdPass {
    fn bound(&self, len: usize) -> usize {
        ZstdCompressor::<HostPort>::max_compressed_len(len)
    }

    fn region(&mut self, capacity: usize, history: u64) -> Result<DeviceRegion, AccelError> {
        self.compressor.setup_region(capacity, Some(history))
    }

    fn tune(&mut self, history: u64, ht_log2: u64) -> Result<(), AccelError> {
        self.compressor.set_history_size(history)?;
        self.compressor.set_hash_table_log2(ht_log2)
    }

    fn compress(&mut self, src: &[u8], dst: &mut [u8]) -> Result<u64, AccelError> {
        let mut scratch = CompressScratch::new(&mut self.literals, &mut self.sequences);
        self.compressor.compress(src, &mut scratch, dst, self.level)
    }

    fn verify(&self, frame: &[u8], expected: &[u8]) -> bool {
        zstd::stream::decode_all(frame).is_ok_and(|decoded| decoded == expected)
    }
}

/// Compresses `corpus` at every tuning point with `codec` on `device`.
pub fn run(
    device: &Device,
    codec: Codec,
    corpus: &Corpus,
    tuning: &TuningArgs,
    args: &DeviceArgs,
) -> Result<RunTotals> {
    let profile = device.profile();
    let mut pass: Box<dyn CompressPass> = match codec {
        Codec::Snappy => {
            let mut compressor = SnappyCompressor::open(device.port(), profile)
                .context("Failed to open the snappy compressor")?;
            if let Some(policy) = args.poll_policy() {
                compressor.set_poll_policy(policy);
            }
            if args.latency().is_some() {
                warn!("snappy compressors take no latency injection, ignoring it");
            }
            Box::new(SnappyPass { compressor })
        }
        Codec::Zstd => {
            let mut compressor = ZstdCompressor::open(device.port(), profile)
                .context("Failed to open the zstd compressor")?;
            if let Some(policy) = args.poll_policy() {
                compressor.set_poll_policy(policy);
            }
            if let Some(latency) = args.latency() {
                compressor.set_latency_injection(latency)?;
            }
            // Worst case every input byte is a literal or starts a sequence.
            let scratch_len = corpus.max_len().max(1);
            let literals = compressor.setup_workspace(scratch_len)?;
            let sequences = compressor.setup_workspace(scratch_len)?;
            Box::new(ZstdPass {
                compressor,
                literals,
                sequences,
                level: tuning.level,
            })
        }
    };

    let label = format!("{} {:?} compress", profile.name(), codec);
    run_grid(pass.as_mut(), label, corpus, tuning)
}

fn run_grid(
    pass: &mut dyn CompressPass,
    label: String,
    corpus: &Corpus,
    tuning: &TuningArgs,
) -> Result<RunTotals> {
    let bounds: Vec<usize> = corpus.lens().map(|len| pass.bound(len)).collect();
    let capacity = corpus_capacity(bounds.iter().copied());
    let mut region = pass.region(capacity, tuning.first_history())?;
    let mut totals = RunTotals::new(label);

    for (point, (history, ht_log2)) in tuning.grid().into_iter().enumerate() {
        pass.tune(history, ht_log2)?;
        info!(history, ht_log2, "compressing corpus");
        let len = region.len();
        region.clear(len);
        let mut cursor = region.cursor();
        cursor.skip((point % SKEW_SLOTS) * WINDOW_GRANULE)?;

        for (file, &bound) in corpus.files().iter().zip(&bounds) {
            let window = cursor.carve(bound)?;
            let start = cycles::now();
            let produced = pass.compress(&file.data, window)?;
            let elapsed = cycles::now().saturating_sub(start);
            let produced = (produced as usize).min(window.len());
            let verified = pass.verify(&window[..produced], &file.data);
            if !verified {
                warn!(name = %file.name, history, ht_log2, "output does not decode to its input");
            }
            totals.update(RunRecord {
                name: file.name.clone(),
                history,
                hash_table_log2: Some(ht_log2),
                elapsed,
                input_len: file.data.len(),
                output_len: produced,
                verified,
            });
        }
    }
    Ok(totals)
}
