//! Codec pipeline facades.
//!
//! Each facade owns one command channel and offers a blocking call plus a
//! scoped non-blocking call. The scoped call dispatches, hands an
//! [`InFlight`] handle to a closure for host-side work, and always waits for
//! the device before it returns. The handle only ever exists behind a
//! borrow, so it cannot be leaked or outlive the buffers of the request.

mod snappy;
mod zstd;

pub use snappy::{SnappyCompressor, SnappyDecompressor};
pub use zstd::{CompressScratch, ZstdCompressor, ZstdDecompressor};

use crate::channel::{CommandChannel, RoccChannel, ScalarParam};
use crate::completion::{Completion, CompletionMonitor, CompletionSignal};
use crate::config::PipelineConfig;
use crate::dispatch::{RawRequest, dispatch_nonblocking};
use crate::port::CommandPort;
use crate::region::DeviceRegion;
use crate::AccelError;
use accel_common::rocc::{Pipeline, SocProfile};

/// State shared by all facades: channel, parameter shadow and monitor.
#[derive(Debug)]
pub(crate) struct Engine<P> {
    channel: RoccChannel<P>,
    config: PipelineConfig,
    monitor: CompletionMonitor,
}

impl<P: CommandPort> Engine<P> {
    fn open(port: P, profile: SocProfile, pipeline: Pipeline) -> Result<Self, AccelError> {
        let channel = RoccChannel::new(port, profile, pipeline)?;
        let monitor = CompletionMonitor::new(channel.poll_policy());
        Ok(Self {
            channel,
            config: PipelineConfig::default(),
            monitor,
        })
    }

    fn push(&mut self, param: ScalarParam) -> Result<(), AccelError> {
        self.channel.scalar_param(param)?;
        self.config.record(param);
        Ok(())
    }

    fn sfence(&mut self) {
        self.channel.sfence();
    }

    /// Fences the unit, pushes the initial history size and allocates.
    fn setup_region(
        &mut self,
        capacity: usize,
        history: Option<u64>,
    ) -> Result<DeviceRegion, AccelError> {
        self.channel.sfence();
        if let Some(bytes) = history {
            self.push(ScalarParam::History(bytes))?;
        }
        DeviceRegion::allocate(capacity)
    }

    /// Dispatches and waits with a signal on the stack.
    ///
    /// # Safety
    ///
    /// Every buffer named by `request` must be borrowed by the caller for the
    /// duration of this call.
    unsafe fn run(&mut self, request: &RawRequest) -> Result<Completion, AccelError> {
        let signal = CompletionSignal::new();
        // SAFETY: this call does not return before the request settles.
        unsafe { dispatch_nonblocking(&mut self.channel, request, &signal)? };
        Ok(self.monitor.block_until_settled(&mut self.channel, &signal))
    }

    /// Dispatches, runs `host_work` against the handle, then waits.
    ///
    /// # Arguments
    ///
    /// * `request` - Request in device terms
    /// * `host_work` - Closure run while the device works on the request
    ///
    /// # Returns
    ///
    /// The closure's output and the settled completion, or the dispatch
    /// error if nothing was issued.
    ///
    /// # Safety
    ///
    /// Every buffer named by `request` must be borrowed by the caller for the
    /// duration of this call.
    unsafe fn scope<R>(
        &mut self,
        request: &RawRequest,
        host_work: impl FnOnce(&mut InFlight<'_, P>) -> R,
    ) -> Result<(R, Completion), AccelError> {
        let signal = CompletionSignal::new();
        // SAFETY: the handle settles before this call returns, or in its
        // drop if the closure unwinds.
        unsafe { dispatch_nonblocking(&mut self.channel, request, &signal)? };
        let mut in_flight = InFlight {
            engine: self,
            signal: &signal,
            completion: None,
        };
        let output = host_work(&mut in_flight);
        let completion = in_flight.wait();
        Ok((output, completion))
    }
}

/// A dispatched request, lent to host code while the device runs.
///
/// Only reachable as `&mut InFlight` inside a facade's `*_nonblocking`
/// closure. The facade waits once the closure returns, and the handle's drop
/// waits if the closure unwinds, so the device never writes to a buffer the
/// caller has got back.
pub struct InFlight<'a, P: CommandPort> {
    engine: &'a mut Engine<P>,
    signal: &'a CompletionSignal,
    completion: Option<Completion>,
}

impl<P: CommandPort> InFlight<'_, P> {
    pub fn pipeline(&self) -> Pipeline {
        self.engine.channel.pipeline()
    }

    /// Reads the signal once without issuing any command.
    ///
    /// # Returns
    ///
    /// `true` once the device has written a nonzero completion word.
    pub fn poll(&self) -> bool {
        self.completion.is_some() || self.signal.is_done(self.engine.channel.table().signal)
    }

    /// Blocks until the device reports completion.
    ///
    /// Later calls return the same completion without touching the unit.
    pub fn wait(&mut self) -> Completion {
        if let Some(completion) = self.completion {
            return completion;
        }
        let completion = self
            .engine
            .monitor
            .block_until_settled(&mut self.engine.channel, self.signal);
        self.completion = Some(completion);
        completion
    }
}

impl<P: CommandPort> Drop for InFlight<'_, P> {
    fn drop(&mut self) {
        if self.completion.is_none() {
            self.engine
                .monitor
                .block_until_settled(&mut self.engine.channel, self.signal);
        }
    }
}

/// Methods every facade forwards to its engine.
macro_rules! facade_common {
    ($pipeline:expr) => {
        /// Opens the pipeline on the given SoC build.
        ///
        /// # Returns
        ///
        /// The facade, or `AccelError::PipelineUnavailable` if the build does
        /// not include this pipeline.
        pub fn open(
            port: P,
            profile: accel_common::rocc::SocProfile,
        ) -> Result<Self, $crate::AccelError> {
            Ok(Self {
                engine: $crate::pipeline::Engine::open(port, profile, $pipeline)?,
            })
        }

        /// Fences the unit, optionally pushes an initial history size, and
        /// allocates a device region of `capacity` bytes.
        ///
        /// # Arguments
        ///
        /// * `capacity` - Region size in bytes, nonzero
        /// * `history` - History window to push before allocating, if any
        ///
        /// # Returns
        ///
        /// The zeroed, pre-faulted region.
        pub fn setup_region(
            &mut self,
            capacity: usize,
            history: Option<u64>,
        ) -> Result<$crate::region::DeviceRegion, $crate::AccelError> {
            self.engine.setup_region(capacity, history)
        }

        /// Flushes the unit's address translation state.
        pub fn sfence(&mut self) {
            self.engine.sfence();
        }

        /// Limits the history window to `bytes`.
        ///
        /// # Arguments
        ///
        /// * `bytes` - Largest match distance the unit may use
        ///
        /// # Returns
        ///
        /// `Ok(())` once pushed and shadowed in `config()`.
        pub fn set_history_size(&mut self, bytes: u64) -> Result<(), $crate::AccelError> {
            self.engine.push($crate::channel::ScalarParam::History(bytes))
        }

        /// Chooses how later waits on this pipeline poll.
        ///
        /// # Arguments
        ///
        /// * `policy` - Bounded budgets only warn here; facades never give
        ///   buffers back before the device is done
        pub fn set_poll_policy(&mut self, policy: $crate::completion::PollPolicy) {
            self.engine.monitor.set_policy(policy);
        }

        pub fn poll_policy(&self) -> $crate::completion::PollPolicy {
            self.engine.monitor.policy()
        }

        /// Values last pushed to the unit.
        pub fn config(&self) -> &$crate::config::PipelineConfig {
            &self.engine.config
        }

        pub fn profile(&self) -> accel_common::rocc::SocProfile {
            self.engine.channel.profile()
        }

        pub fn port(&self) -> &P {
            self.engine.channel.port()
        }

        pub fn port_mut(&mut self) -> &mut P {
            self.engine.channel.port_mut()
        }
    };
}

pub(crate) use facade_common;

#[cfg(test)]
pub(crate) mod testing {
    use crate::completion::PollPolicy;
    use crate::port::CommandPort;
    use accel_common::rocc::{CommandKind, RoccCommand, SocProfile};
    use alloc::vec::Vec;

    /// Port that completes every request with a fixed value.
    ///
    /// Writes `value` into the completion word as soon as the start trigger
    /// arrives, without touching the request buffers.
    pub struct InstantPort {
        pub profile: SocProfile,
        pub value: u64,
        pub commands: Vec<RoccCommand>,
        signal: u64,
    }

    impl InstantPort {
        pub fn new(profile: SocProfile, value: u64) -> Self {
            Self {
                profile,
                value,
                commands: Vec::new(),
                signal: 0,
            }
        }
    }

    impl CommandPort for InstantPort {
        unsafe fn issue(&mut self, cmd: RoccCommand) -> u64 {
            self.commands.push(cmd);
            let Some((pipeline, kind)) = self.profile.decode(cmd.opcode, cmd.funct) else {
                return 0;
            };
            let Some(table) = self.profile.table(pipeline) else {
                return 0;
            };
            if kind == CommandKind::DestInfo {
                self.signal = cmd.rs2;
            }
            if kind == table.start_trigger() && self.signal != 0 {
                // SAFETY: the driver passed an aligned, live completion word.
                unsafe { (self.signal as *mut u64).write_volatile(self.value) };
            }
            0
        }

        fn poll_policy(&self) -> PollPolicy {
            PollPolicy::Bounded(1_000)
        }
    }
}
