//! Decompression runs over a corpus.
//!
//! Inputs are compressed once with the software codec. The frames are then
//! decompressed on the device at every history size, into padded windows of
//! one shared region, and compared with the original input.

use crate::backend::{Device, HostPort};
use crate::compress::SKEW_SLOTS;
use crate::corpus::Corpus;
use crate::cycles;
use crate::stats::{RunRecord, RunTotals};
use crate::{Codec, DeviceArgs, TuningArgs};
use accel_common::memory::WINDOW_GRANULE;
use accel_core::region::corpus_capacity;
use accel_core::{AccelError, DeviceRegion, SnappyDecompressor, ZstdDecompressor};
use anyhow::{Context, Result};
use tracing::{info, warn};

trait DecompressPass {
    fn region(&mut self, capacity: usize, history: u64) -> Result<DeviceRegion, AccelError>;
    fn tune(&mut self, history: u64) -> Result<(), AccelError>;
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> Result<bool, AccelError>;
}

struct SnappyPass {
    decompressor: SnappyDecompressor<HostPort>,
}

impl DecompressPass for SnappyPass {
    fn region(&mut self, capacity: usize, history: u64) -> Result<DeviceRegion, AccelError> {
        self.decompressor.setup_region(capacity, Some(history))
    }

    fn tune(&mut self, history: u64) -> Result<(), AccelError> {
        self.decompressor.set_history_size(history)
    }

    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> Result<bool, AccelError> {
        self.decompressor.decompress(src, dst)
    }
}

struct ZstdPass {
    decompressor: ZstdDecompressor<HostPort>,
    workspace: DeviceRegion,
}

impl DecompressPass for ZstdPass {
    fn region(&mut self, capacity: usize, history: u64) -> Result<DeviceRegion, AccelError> {
        self.decompressor.setup_region(capacity, Some(history))
    }

    fn tune(&mut self, history: u64) -> Result<(), AccelError> {
        self.decompressor.set_history_size(history)
    }

    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> Result<bool, AccelError> {
        self.decompressor.decompress(src, &mut self.workspace, dst)
    }
}

/// Frames of every input, compressed in software.
fn reference_frames(codec: Codec, corpus: &Corpus, level: i32) -> Result<Vec<Vec<u8>>> {
    corpus
        .files()
        .iter()
        .map(|file| match codec {
            Codec::Snappy => snap::raw::Encoder::new()
                .compress_vec(&file.data)
                .with_context(|| format!("Failed to compress {}", file.name)),
            Codec::Zstd => zstd::bulk::compress(&file.data, level)
                .with_context(|| format!("Failed to compress {}", file.name)),
        })
        .collect()
}

/// Decompresses `corpus` at every history size with `codec` on `device`.
pub fn run(
    device: &Device,
    codec: Codec,
    corpus: &Corpus,
    tuning: &TuningArgs,
    args: &DeviceArgs,
) -> Result<RunTotals> {
    let profile = device.profile();
    let mut pass: Box<dyn DecompressPass> = match codec {
        Codec::Snappy => {
            let mut decompressor = SnappyDecompressor::open(device.port(), profile)
                .context("Failed to open the snappy decompressor")?;
            if let Some(policy) = args.poll_policy() {
                decompressor.set_poll_policy(policy);
            }
            if args.latency().is_some() {
                warn!("snappy decompressors take no latency injection, ignoring it");
            }
            Box::new(SnappyPass { decompressor })
        }
        Codec::Zstd => {
            let mut decompressor = ZstdDecompressor::open(device.port(), profile)
                .context("Failed to open the zstd decompressor")?;
            if let Some(policy) = args.poll_policy() {
                decompressor.set_poll_policy(policy);
            }
            if let Some(latency) = args.latency() {
                decompressor.set_latency_injection(latency)?;
            }
            let workspace = decompressor.setup_workspace(corpus.max_len().max(1))?;
            Box::new(ZstdPass {
                decompressor,
                workspace,
            })
        }
    };

    let frames = reference_frames(codec, corpus, tuning.level)?;
    let label = format!("{} {:?} decompress", profile.name(), codec);
    run_grid(pass.as_mut(), label, corpus, &frames, tuning)
}

fn run_grid(
    pass: &mut dyn DecompressPass,
    label: String,
    corpus: &Corpus,
    frames: &[Vec<u8>],
    tuning: &TuningArgs,
) -> Result<RunTotals> {
    let capacity = corpus_capacity(corpus.lens());
    let mut region = pass.region(capacity, tuning.first_history())?;
    let mut totals = RunTotals::new(label);

    for (point, &history) in tuning.hist.iter().enumerate() {
        pass.tune(history)?;
        info!(history, "decompressing corpus");
        let len = region.len();
        region.clear(len);
        let mut cursor = region.cursor();
        cursor.skip((point % SKEW_SLOTS) * WINDOW_GRANULE)?;

        for (file, frame) in corpus.files().iter().zip(frames) {
            let window = cursor.carve(file.data.len())?;
            let start = cycles::now();
            let success = pass.decompress(frame, window)?;
            let elapsed = cycles::now().saturating_sub(start);
            let verified = success && window[..file.data.len()] == file.data[..];
            if !verified {
                warn!(name = %file.name, history, success, "output does not match its input");
            }
            totals.update(RunRecord {
                name: file.name.clone(),
                history,
                hash_table_log2: None,
                elapsed,
                input_len: frame.len(),
                output_len: file.data.len(),
                verified,
            });
        }
    }
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::corpus::CorpusFile;
    use accel_common::rocc::SocProfile;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        device: DeviceArgs,
        #[command(flatten)]
        tuning: TuningArgs,
    }

    fn harness(args: &[&str]) -> Harness {
        Harness::try_parse_from(std::iter::once("harness").chain(args.iter().copied()))
            .expect("arguments")
    }

    fn corpus() -> Corpus {
        Corpus::from_files(vec![
            CorpusFile {
                name: "words".into(),
                data: b"decompress me again and again "
                    .iter()
                    .copied()
                    .cycle()
                    .take(7000)
                    .collect(),
            },
            CorpusFile {
                name: "bytes".into(),
                data: (0..=255u8).cycle().take(1000).collect(),
            },
        ])
    }

    #[test]
    fn test_snappy_on_every_build() {
        let h = harness(&["--hist", "64K,16K"]);
        for profile in SocProfile::ALL {
            let device = Device::open(Backend::Sim, profile).expect("device");
            let totals =
                run(&device, Codec::Snappy, &corpus(), &h.tuning, &h.device).expect("run");
            assert_eq!(totals.count(), 4);
            assert_eq!(totals.failures(), 0);
        }
    }

    #[test]
    fn test_zstd_on_decompressor_build() {
        let h = harness(&["--level", "19", "--latency-cycles", "50", "--has-cache"]);
        let device =
            Device::open(Backend::SimThreaded, SocProfile::DecompressorSoc).expect("device");
        let totals = run(&device, Codec::Zstd, &corpus(), &h.tuning, &h.device).expect("run");
        assert_eq!(totals.count(), 2);
        assert_eq!(totals.failures(), 0);
    }

    #[test]
    fn test_zstd_absent_on_compressor_build() {
        let h = harness(&[]);
        let device = Device::open(Backend::Sim, SocProfile::CompressorSoc).expect("device");
        assert!(run(&device, Codec::Zstd, &corpus(), &h.tuning, &h.device).is_err());
    }
}
