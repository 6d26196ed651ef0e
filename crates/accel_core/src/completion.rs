//! Completion signals and polling.
//!
//! Every request carries the address of a caller-owned word. The caller
//! clears it before dispatch and the device writes a nonzero value into it
//! exactly once when the request finishes. Compression units write the
//! number of bytes produced; decompression units write a success flag.

use crate::channel::CommandChannel;
use crate::AccelError;
use accel_common::rocc::SignalWidth;
use core::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Completion word shared with the device for one request.
///
/// Always a full, 8-byte aligned 64-bit word, whatever width the unit
/// writes. Narrower writes land in the low-order bytes; the upper bytes stay
/// zero from the reset before dispatch.
#[repr(C, align(8))]
#[derive(Debug, Default)]
pub struct CompletionSignal(AtomicU64);

impl CompletionSignal {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Restores the "not done" sentinel.
    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }

    /// Address handed to the device.
    pub fn addr(&self) -> u64 {
        self.0.as_ptr() as u64
    }

    /// Raw word as last written.
    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Whether the device has written a nonzero value of `width`.
    ///
    /// # Arguments
    ///
    /// * `width` - Width the unit writes, from its funct table
    pub fn is_done(&self, width: SignalWidth) -> bool {
        Completion::new(self.load(), width).is_done()
    }

    /// Snapshot of the word read as `width`.
    pub fn completion(&self, width: SignalWidth) -> Completion {
        Completion::new(self.load(), width)
    }
}

/// Final value of a completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    raw: u64,
    width: SignalWidth,
}

impl Completion {
    pub fn new(raw: u64, width: SignalWidth) -> Self {
        Self { raw, width }
    }

    /// Significant part of the word for this width.
    pub fn value(&self) -> u64 {
        match self.width {
            SignalWidth::U64 => self.raw,
            SignalWidth::I32 => self.raw & 0xFFFF_FFFF,
            SignalWidth::Bool => self.raw & 0xFF,
        }
    }

    pub fn is_done(&self) -> bool {
        self.value() != 0
    }

    /// Bytes produced by a compression request.
    ///
    /// Zero for units that only report a flag, and for requests whose
    /// completion was never observed.
    pub fn produced_bytes(&self) -> u64 {
        match self.width {
            SignalWidth::Bool => 0,
            _ => self.value(),
        }
    }

    /// Success flag of a decompression request.
    pub fn success(&self) -> bool {
        self.is_done()
    }

    pub fn width(&self) -> SignalWidth {
        self.width
    }
}

/// How completion polling behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollPolicy {
    /// Poll until the signal is set, however long that takes.
    #[default]
    Spin,
    /// Give up after this many fenced polls.
    ///
    /// Raw monitor calls return [`AccelError::Stalled`]. The safe facades
    /// only warn and keep polling, since the device may still write into
    /// the borrowed buffers.
    Bounded(u64),
    /// Read the signal once and return whatever it holds.
    Skip,
}

/// Full memory fence ordering host accesses against device accesses.
#[inline(always)]
pub fn device_fence() {
    #[cfg(target_arch = "riscv64")]
    // SAFETY: fence has no operands and no side effects beyond ordering.
    unsafe {
        core::arch::asm!("fence", options(nostack, preserves_flags));
    }
    #[cfg(not(target_arch = "riscv64"))]
    core::sync::atomic::fence(Ordering::SeqCst);
}

/// Waits for requests on a channel to complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionMonitor {
    policy: PollPolicy,
}

impl CompletionMonitor {
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Replaces the wait policy.
    ///
    /// # Arguments
    ///
    /// * `policy` - How later waits poll the completion word
    pub fn set_policy(&mut self, policy: PollPolicy) {
        self.policy = policy;
    }

    /// Blocks until `signal` reports completion.
    ///
    /// Issues the unit's completion check, fences, then polls the signal
    /// with a fence on every iteration. Neither sleeps nor yields.
    ///
    /// # Arguments
    ///
    /// * `channel` - Channel the request was dispatched on
    /// * `signal` - Completion word named in that dispatch
    ///
    /// # Returns
    ///
    /// The final signal value, or [`AccelError::Stalled`] when a bounded
    /// policy runs out of polls. After a stall the device may still write to
    /// the request's buffers, so the caller must keep them alive.
    pub fn block_until_complete<C>(
        &self,
        channel: &mut C,
        signal: &CompletionSignal,
    ) -> Result<Completion, AccelError>
    where
        C: CommandChannel + ?Sized,
    {
        let width = channel.table().signal;
        channel.check_completion();
        device_fence();

        match self.policy {
            PollPolicy::Skip => Ok(signal.completion(width)),
            PollPolicy::Spin => Ok(spin(signal, width, u64::MAX).unwrap_or_else(|c| c)),
            PollPolicy::Bounded(budget) => spin(signal, width, budget).map_err(|_| {
                warn!(
                    pipeline = channel.pipeline().name(),
                    spins = budget,
                    "request stalled"
                );
                AccelError::Stalled { spins: budget }
            }),
        }
    }

    /// Blocks until `signal` reports completion, never giving up.
    ///
    /// A bounded policy only logs once its budget is spent. Used wherever
    /// returning early would let the caller free memory the device still
    /// owns.
    ///
    /// # Returns
    ///
    /// The settled completion. Under [`PollPolicy::Skip`] this is whatever
    /// the word held after one read, possibly unset.
    pub fn block_until_settled<C>(&self, channel: &mut C, signal: &CompletionSignal) -> Completion
    where
        C: CommandChannel + ?Sized,
    {
        match self.block_until_complete(channel, signal) {
            Ok(completion) => completion,
            Err(_) => {
                let width = channel.table().signal;
                spin(signal, width, u64::MAX).unwrap_or_else(|c| c)
            }
        }
    }
}

/// Polls until the signal is set or `budget` polls have passed.
///
/// `Err` carries the unset value seen on the last poll.
fn spin(signal: &CompletionSignal, width: SignalWidth, budget: u64) -> Result<Completion, Completion> {
    let mut spins = 0u64;
    loop {
        let completion = signal.completion(width);
        if completion.is_done() {
            core::sync::atomic::fence(Ordering::Acquire);
            return Ok(completion);
        }
        if spins >= budget {
            return Err(completion);
        }
        spins += 1;
        device_fence();
        core::hint::spin_loop();
    }
}
