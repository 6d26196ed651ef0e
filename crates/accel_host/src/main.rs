mod backend;
mod compress;
mod corpus;
mod cycles;
mod decompress;
mod size;
mod stats;
mod sweep;

use accel_common::rocc::SocProfile;
use accel_core::{LatencyInjection, PollPolicy};
use anyhow::{Result, bail};
use backend::{Backend, Device};
use clap::{Args, Parser, Subcommand, ValueEnum};
use corpus::Corpus;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Drives the Snappy/Zstd accelerator over a corpus of files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress every input on the accelerator and verify with the software codec.
    Compress {
        #[arg(long, value_enum)]
        codec: Codec,
        #[command(flatten)]
        device: DeviceArgs,
        #[command(flatten)]
        tuning: TuningArgs,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Compress every input in software, then decompress it on the accelerator.
    Decompress {
        #[arg(long, value_enum)]
        codec: Codec,
        #[command(flatten)]
        device: DeviceArgs,
        #[command(flatten)]
        tuning: TuningArgs,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Run every pipeline of every listed build, one simulated device each.
    Sweep {
        #[arg(long, value_enum, value_delimiter = ',', default_values_t = [
            ProfileArg::SnappyStandalone,
            ProfileArg::CompressorSoc,
            ProfileArg::DecompressorSoc,
        ])]
        profiles: Vec<ProfileArg>,
        #[arg(long, value_enum, default_value_t = Backend::Sim)]
        backend: Backend,
        #[command(flatten)]
        tuning: TuningArgs,
        #[arg(long)]
        latency_cycles: Option<u64>,
        #[arg(long)]
        has_cache: bool,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Codec {
    Snappy,
    Zstd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProfileArg {
    SnappyStandalone,
    CompressorSoc,
    DecompressorSoc,
}

impl From<ProfileArg> for SocProfile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::SnappyStandalone => SocProfile::SnappyStandalone,
            ProfileArg::CompressorSoc => SocProfile::CompressorSoc,
            ProfileArg::DecompressorSoc => SocProfile::DecompressorSoc,
        }
    }
}

/// Which device to open and how to wait on it.
#[derive(Args, Clone)]
pub struct DeviceArgs {
    #[arg(long, value_enum, default_value_t = ProfileArg::CompressorSoc)]
    profile: ProfileArg,
    #[arg(long, value_enum, default_value_t = Backend::Sim)]
    backend: Backend,
    /// Memory latency injected on Zstd units, in cycles.
    #[arg(long)]
    latency_cycles: Option<u64>,
    /// Model an intermediate cache in front of the injected latency.
    #[arg(long)]
    has_cache: bool,
    /// Warn when a request has not completed after this many polls.
    #[arg(long)]
    spin_budget: Option<u64>,
}

impl DeviceArgs {
    pub fn latency(&self) -> Option<LatencyInjection> {
        self.latency_cycles.map(|cycles| LatencyInjection {
            cycles,
            has_cache: self.has_cache,
        })
    }

    pub fn poll_policy(&self) -> Option<PollPolicy> {
        self.spin_budget.map(PollPolicy::Bounded)
    }
}

/// Tuning grid swept for every input.
#[derive(Args, Clone)]
pub struct TuningArgs {
    /// History window sizes, e.g. `64K,32K`.
    #[arg(long, value_delimiter = ',', value_parser = size::parse_size, default_value = "64K")]
    hist: Vec<u64>,
    /// Hash table sizes as log2 of the entry count.
    #[arg(long = "ht-log2", value_delimiter = ',', default_value = "14")]
    ht_log2: Vec<u64>,
    /// Zstd compression level.
    #[arg(long, default_value_t = 16, allow_negative_numbers = true)]
    level: i32,
}

impl TuningArgs {
    /// Every (history, hash table) pair, history-major.
    pub fn grid(&self) -> Vec<(u64, u64)> {
        self.hist
            .iter()
            .flat_map(|&h| self.ht_log2.iter().map(move |&t| (h, t)))
            .collect()
    }

    pub fn first_history(&self) -> u64 {
        self.hist.first().copied().unwrap_or(64 << 10)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Compress {
            codec,
            device,
            tuning,
            files,
        } => {
            let corpus = Corpus::load(&files)?;
            let accel = Device::open(device.backend, device.profile.into())?;
            let totals = compress::run(&accel, codec, &corpus, &tuning, &device)?;
            accel.log_counters();
            totals.print_report();
            if totals.failures() > 0 {
                bail!("{} outputs failed verification", totals.failures());
            }
        }
        Commands::Decompress {
            codec,
            device,
            tuning,
            files,
        } => {
            let corpus = Corpus::load(&files)?;
            let accel = Device::open(device.backend, device.profile.into())?;
            let totals = decompress::run(&accel, codec, &corpus, &tuning, &device)?;
            accel.log_counters();
            totals.print_report();
            if totals.failures() > 0 {
                bail!("{} outputs failed verification", totals.failures());
            }
        }
        Commands::Sweep {
            profiles,
            backend,
            tuning,
            latency_cycles,
            has_cache,
            files,
        } => {
            let corpus = Corpus::load(&files)?;
            let device = DeviceArgs {
                profile: ProfileArg::CompressorSoc,
                backend,
                latency_cycles,
                has_cache,
                spin_budget: None,
            };
            let profiles: Vec<SocProfile> = profiles.into_iter().map(Into::into).collect();
            let runs = sweep::run(&corpus, &profiles, &tuning, &device)?;
            let mut failures = 0;
            for totals in &runs {
                totals.print_report();
                failures += totals.failures();
            }
            if failures > 0 {
                bail!("{failures} outputs failed verification");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_tuning_flags_parse() {
        let cli = Cli::try_parse_from([
            "accel_host",
            "compress",
            "--codec",
            "zstd",
            "--hist",
            "64K,2K",
            "--ht-log2",
            "14,9",
            "--level",
            "-3",
            "--latency-cycles",
            "400",
            "input.bin",
        ])
        .expect("parse");
        let Commands::Compress {
            codec,
            device,
            tuning,
            files,
        } = cli.command
        else {
            panic!("wrong subcommand");
        };
        assert_eq!(codec, Codec::Zstd);
        assert_eq!(device.profile, ProfileArg::CompressorSoc);
        assert_eq!(
            device.latency(),
            Some(LatencyInjection {
                cycles: 400,
                has_cache: false
            })
        );
        assert_eq!(device.poll_policy(), None);
        assert_eq!(tuning.level, -3);
        assert_eq!(
            tuning.grid(),
            vec![(64 << 10, 14), (64 << 10, 9), (2 << 10, 14), (2 << 10, 9)]
        );
        assert_eq!(files, vec![PathBuf::from("input.bin")]);
    }
}
