//! Behavioural model of the compression accelerator.
//!
//! Decodes RoCC commands exactly as a unit of the selected SoC build would,
//! stages request fields per pipeline, and on the start trigger runs the
//! request against host memory with the software Snappy and Zstd codecs. The
//! model exists so the driver protocol can be exercised on any host; it does
//! not model the accelerator's microarchitecture.

mod job;

use accel_common::rocc::{
    Algorithm, CommandKind, CustomOpcode, Pipeline, RoccCommand, SocProfile,
};
use accel_core::{CommandPort, LatencyInjection, PipelineConfig};
use anyhow::{Context, Result};
use crossbeam_channel::{Sender, unbounded};
use job::{Job, JobAux, completion_delay};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};

/// Where staged requests run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Inside the command that starts the request, before it returns.
    #[default]
    Inline,
    /// On a device worker thread, concurrently with the issuing thread.
    /// Latency injection delays completion in this mode.
    Threaded,
}

/// Configuration of a simulated accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    pub profile: SocProfile,
    pub mode: ExecMode,
}

impl SimConfig {
    pub fn new(profile: SocProfile) -> Self {
        Self {
            profile,
            mode: ExecMode::Inline,
        }
    }

    pub fn threaded(mut self) -> Self {
        self.mode = ExecMode::Threaded;
        self
    }
}

/// Request fields received so far on one pipeline.
#[derive(Debug, Clone, Copy, Default)]
struct Staging {
    src: Option<(u64, u64)>,
    literals: Option<(u64, u64)>,
    sequences: Option<(u64, u64)>,
    workspace: Option<u64>,
    dest: Option<(u64, u64)>,
    level: Option<i32>,
}

#[derive(Debug, Default)]
struct DeviceState {
    staging: HashMap<Pipeline, Staging>,
    tuning: HashMap<Pipeline, PipelineConfig>,
    /// Algorithm selected on units hosting more than one codec.
    selected: HashMap<CustomOpcode, Algorithm>,
}

/// Completion counters shared with the worker thread.
#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    stalled: AtomicU64,
}

impl Counters {
    fn record(&self, completed: bool) {
        let counter = if completed {
            &self.completed
        } else {
            &self.stalled
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Runs `job`, counts it, then signals the driver.
    ///
    /// Counting first means a driver that has seen the signal also sees the
    /// job in [`SimulatedAccelerator::jobs_completed`].
    ///
    /// # Safety
    ///
    /// Same contract as [`Job::run`].
    unsafe fn execute(&self, job: &Job) {
        // SAFETY: forwarded from the caller.
        let value = unsafe { job.run() };
        self.record(value.is_some());
        if let Some(value) = value {
            // SAFETY: the driver keeps the completion word alive until it is set.
            unsafe { job.publish(value) };
        }
    }
}

struct Shared {
    profile: SocProfile,
    state: Mutex<DeviceState>,
    counters: Arc<Counters>,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handles one command.
    ///
    /// # Safety
    ///
    /// Address operands follow [`CommandPort::issue`]'s contract.
    unsafe fn handle(&self, cmd: RoccCommand) -> u64 {
        let Some((pipeline, kind)) = self.profile.decode(cmd.opcode, cmd.funct) else {
            warn!(opcode = ?cmd.opcode, funct = cmd.funct, "unknown command ignored");
            return 0;
        };
        trace!(pipeline = pipeline.name(), ?kind, rs1 = cmd.rs1, rs2 = cmd.rs2, "command");

        let job = {
            let mut state = self.state();
            match kind {
                CommandKind::Sfence | CommandKind::CheckCompletion => return 0,
                CommandKind::SelectAlgorithm => {
                    match Algorithm::from_id(cmd.rs1) {
                        Some(algorithm) => {
                            state.selected.insert(cmd.opcode, algorithm);
                        }
                        None => warn!(id = cmd.rs1, "unknown algorithm selected"),
                    }
                    return 0;
                }
                CommandKind::History => {
                    state.tuning.entry(pipeline).or_default().history = Some(cmd.rs1);
                    return 0;
                }
                CommandKind::HashTableLog2 => {
                    state.tuning.entry(pipeline).or_default().hash_table_log2 = Some(cmd.rs1);
                    return 0;
                }
                CommandKind::LatencyInjection => {
                    let latency = LatencyInjection {
                        cycles: cmd.rs1,
                        has_cache: cmd.rs2 != 0,
                    };
                    state.tuning.entry(pipeline).or_default().latency = Some(latency);
                    return 0;
                }
                CommandKind::SrcInfo => {
                    state.staging.entry(pipeline).or_default().src = Some((cmd.rs1, cmd.rs2));
                    return 0;
                }
                CommandKind::LiteralsInfo => {
                    state.staging.entry(pipeline).or_default().literals =
                        Some((cmd.rs1, cmd.rs2));
                    return 0;
                }
                CommandKind::SequencesInfo => {
                    state.staging.entry(pipeline).or_default().sequences =
                        Some((cmd.rs1, cmd.rs2));
                    return 0;
                }
                CommandKind::WorkspaceInfo => {
                    state.staging.entry(pipeline).or_default().workspace = Some(cmd.rs1);
                    return 0;
                }
                CommandKind::DestInfo => {
                    state.staging.entry(pipeline).or_default().dest = Some((cmd.rs1, cmd.rs2));
                }
                CommandKind::Level => {
                    // Low 32 bits of the sign-extended C int.
                    state.staging.entry(pipeline).or_default().level = Some(cmd.rs1 as i32);
                }
            }

            // Only the pipeline's start trigger gets here without returning.
            let Some(table) = self.profile.table(pipeline) else {
                return 0;
            };
            if kind != table.start_trigger() {
                return 0;
            }
            let staging = state.staging.remove(&pipeline).unwrap_or_default();
            if table.select_algorithm.is_some()
                && state.selected.get(&cmd.opcode) != Some(&pipeline.algorithm())
            {
                warn!(
                    pipeline = pipeline.name(),
                    "start without matching algorithm select, never completing"
                );
                self.counters.record(false);
                return 0;
            }
            let tuning = state.tuning.get(&pipeline).copied().unwrap_or_default();
            match stage_job(pipeline, staging, tuning) {
                Some(job) => job,
                None => {
                    warn!(pipeline = pipeline.name(), "incomplete request, never completing");
                    self.counters.record(false);
                    return 0;
                }
            }
        };

        match &self.jobs {
            Some(jobs) => {
                if jobs.send(job).is_err() {
                    warn!("device worker gone, request dropped");
                    self.counters.record(false);
                }
            }
            None => {
                // SAFETY: forwarded from the caller.
                unsafe { self.counters.execute(&job) };
            }
        }
        0
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("device worker panicked");
            }
        }
    }
}

/// Builds a job from staged fields, if every required field arrived.
fn stage_job(pipeline: Pipeline, staging: Staging, tuning: PipelineConfig) -> Option<Job> {
    let (src, src_len) = staging.src?;
    let (dst, signal) = staging.dest?;
    let aux = match pipeline {
        Pipeline::SnappyCompress | Pipeline::SnappyDecompress => JobAux::None,
        Pipeline::ZstdCompress => JobAux::Scratch {
            literals: staging.literals?,
            sequences: staging.sequences?,
        },
        Pipeline::ZstdDecompress => JobAux::Workspace(staging.workspace?),
    };
    let level = match pipeline {
        Pipeline::ZstdCompress => staging.level?,
        _ => 0,
    };
    Some(Job {
        pipeline,
        src,
        src_len,
        aux,
        dst,
        signal,
        level,
        tuning,
    })
}

/// Simulated accelerator serving every unit of one SoC build.
///
/// Cloneable [`SimPort`]s share the device, so several pipelines (or
/// threads) can drive it at once.
#[derive(Clone)]
pub struct SimulatedAccelerator {
    shared: Arc<Shared>,
}

impl SimulatedAccelerator {
    /// Builds the device and, in threaded mode, starts its worker.
    pub fn new(config: SimConfig) -> Result<Self> {
        let counters = Arc::new(Counters::default());
        let (jobs, worker) = match config.mode {
            ExecMode::Inline => (None, None),
            ExecMode::Threaded => {
                let (tx, rx) = unbounded::<Job>();
                let worker_counters = Arc::clone(&counters);
                let handle = std::thread::Builder::new()
                    .name(format!("accel-sim-{}", config.profile.name()))
                    .spawn(move || {
                        for job in rx {
                            let delay = completion_delay(&job.tuning);
                            if !delay.is_zero() {
                                std::thread::sleep(delay);
                            }
                            // SAFETY: the driver keeps buffers alive until completion.
                            unsafe { worker_counters.execute(&job) };
                        }
                    })
                    .context("failed to spawn device worker")?;
                (Some(tx), Some(handle))
            }
        };
        debug!(profile = config.profile.name(), mode = ?config.mode, "simulated accelerator up");
        Ok(Self {
            shared: Arc::new(Shared {
                profile: config.profile,
                state: Mutex::new(DeviceState::default()),
                counters,
                jobs,
                worker,
            }),
        })
    }

    /// New command port attached to this device.
    pub fn port(&self) -> SimPort {
        SimPort {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn profile(&self) -> SocProfile {
        self.shared.profile
    }

    /// Requests that ran to completion.
    pub fn jobs_completed(&self) -> u64 {
        self.shared.counters.completed.load(Ordering::Relaxed)
    }

    /// Requests that started but will never signal.
    pub fn jobs_stalled(&self) -> u64 {
        self.shared.counters.stalled.load(Ordering::Relaxed)
    }

    /// Parameters the device latched for `pipeline`.
    pub fn latched(&self, pipeline: Pipeline) -> PipelineConfig {
        self.shared
            .state()
            .tuning
            .get(&pipeline)
            .copied()
            .unwrap_or_default()
    }
}

/// Command port feeding a [`SimulatedAccelerator`].
#[derive(Clone)]
pub struct SimPort {
    shared: Arc<Shared>,
}

impl CommandPort for SimPort {
    unsafe fn issue(&mut self, cmd: RoccCommand) -> u64 {
        // SAFETY: forwarded contract.
        unsafe { self.shared.handle(cmd) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_latch_per_pipeline() {
        let sim = SimulatedAccelerator::new(SimConfig::new(SocProfile::CompressorSoc))
            .expect("sim");
        let mut port = sim.port();
        // SAFETY: scalar commands only.
        unsafe {
            port.issue(RoccCommand::single(CustomOpcode::Custom2, 11, 4096));
            port.issue(RoccCommand::single(CustomOpcode::Custom2, 9, 12));
            port.issue(RoccCommand::pair(CustomOpcode::Custom2, 13, 7, 0));
        }
        let zstd = sim.latched(Pipeline::ZstdCompress);
        assert_eq!(zstd.history, Some(4096));
        assert_eq!(zstd.hash_table_log2, None);
        assert_eq!(
            zstd.latency,
            Some(LatencyInjection {
                cycles: 7,
                has_cache: false
            })
        );
        let snappy = sim.latched(Pipeline::SnappyCompress);
        assert_eq!(snappy.hash_table_log2, Some(12));
        assert_eq!(snappy.history, None);
    }

    #[test]
    fn test_start_without_source_never_completes() {
        let sim = SimulatedAccelerator::new(SimConfig::new(SocProfile::SnappyStandalone))
            .expect("sim");
        let mut port = sim.port();
        let signal = accel_core::CompletionSignal::new();
        // SAFETY: the job is rejected before any buffer is touched.
        unsafe { port.issue(RoccCommand::pair(CustomOpcode::Custom3, 2, 0x1000, signal.addr())) };
        assert_eq!(signal.load(), 0);
        assert_eq!(sim.jobs_stalled(), 1);
        assert_eq!(sim.jobs_completed(), 0);
    }
}
