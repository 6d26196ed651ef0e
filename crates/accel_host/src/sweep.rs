//! Every pipeline of several SoC builds, run side by side.

use crate::backend::{Backend, Device};
use crate::corpus::Corpus;
use crate::stats::RunTotals;
use crate::{Codec, DeviceArgs, TuningArgs, compress, decompress};
use accel_common::rocc::{Pipeline, SocProfile};
use anyhow::{Result, bail};
use rayon::prelude::*;
use tracing::info;

/// Runs each (build, pipeline) pair on its own simulated device.
///
/// Devices share nothing, so the pairs run in parallel. Results come back
/// in build order, then pipeline order.
pub fn run(
    corpus: &Corpus,
    profiles: &[SocProfile],
    tuning: &TuningArgs,
    args: &DeviceArgs,
) -> Result<Vec<RunTotals>> {
    if !matches!(args.backend, Backend::Sim | Backend::SimThreaded) {
        bail!("a sweep opens one device per pipeline and needs a simulated backend");
    }
    let plan: Vec<(SocProfile, Pipeline)> = profiles
        .iter()
        .flat_map(|&profile| profile.pipelines().map(move |pipeline| (profile, pipeline)))
        .collect();
    info!(runs = plan.len(), "starting sweep");

    plan.par_iter()
        .map(|&(profile, pipeline)| -> Result<RunTotals> {
            let device = Device::open(args.backend, profile)?;
            let codec = match pipeline {
                Pipeline::SnappyCompress | Pipeline::SnappyDecompress => Codec::Snappy,
                Pipeline::ZstdCompress | Pipeline::ZstdDecompress => Codec::Zstd,
            };
            let totals = if pipeline.is_compress() {
                compress::run(&device, codec, corpus, tuning, args)?
            } else {
                decompress::run(&device, codec, corpus, tuning, args)?
            };
            device.log_counters();
            Ok(totals)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusFile;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        device: DeviceArgs,
        #[command(flatten)]
        tuning: TuningArgs,
    }

    #[test]
    fn test_sweep_covers_every_pipeline() {
        let h = Harness::try_parse_from(["harness", "--hist", "64K,4K", "--level", "3"])
            .expect("arguments");
        let corpus = Corpus::from_files(vec![CorpusFile {
            name: "sample".into(),
            data: b"sweep sample ".iter().copied().cycle().take(4000).collect(),
        }]);
        let runs = run(&corpus, &SocProfile::ALL, &h.tuning, &h.device).expect("sweep");
        let expected: usize = SocProfile::ALL.iter().map(|p| p.pipelines().count()).sum();
        assert_eq!(runs.len(), expected);
        assert!(runs.iter().all(|totals| totals.failures() == 0));
        assert!(runs.iter().all(|totals| totals.count() == 2));
    }

    #[test]
    fn test_sweep_refuses_hardware_backends() {
        let h = Harness::try_parse_from(["harness", "--backend", "null"]).expect("arguments");
        let corpus = Corpus::from_files(vec![CorpusFile {
            name: "sample".into(),
            data: vec![1; 10],
        }]);
        assert!(run(&corpus, &SocProfile::ALL, &h.tuning, &h.device).is_err());
    }
}
