//! Transports for RoCC commands.

use crate::completion::PollPolicy;
use accel_common::rocc::RoccCommand;
use alloc::vec::Vec;

/// Carries single RoCC commands to an accelerator unit.
///
/// Implementations are picked at construction time: the custom-instruction
/// port on RISC-V hardware, [`NullPort`] for builds without an accelerator,
/// [`RecordingPort`] for inspecting protocol traffic, or a simulated device.
pub trait CommandPort {
    /// Issues one command and returns the value the unit wrote to `rd`.
    ///
    /// Commands without the `xd` bit return an unspecified value.
    ///
    /// # Safety
    ///
    /// Address operands must point to memory that stays valid, and is not
    /// otherwise accessed in conflicting ways, until the request they belong
    /// to has completed.
    unsafe fn issue(&mut self, cmd: RoccCommand) -> u64;

    /// Poll policy completions on this port default to.
    fn poll_policy(&self) -> PollPolicy {
        PollPolicy::Spin
    }
}

impl<P: CommandPort + ?Sized> CommandPort for &mut P {
    unsafe fn issue(&mut self, cmd: RoccCommand) -> u64 {
        // SAFETY: forwarded contract.
        unsafe { (**self).issue(cmd) }
    }

    fn poll_policy(&self) -> PollPolicy {
        (**self).poll_policy()
    }
}

/// Port that drops every command.
///
/// Stands in for the accelerator on debug builds without one: nothing is
/// issued and completion polling is skipped, so every request reports an
/// unset signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPort;

impl CommandPort for NullPort {
    unsafe fn issue(&mut self, _cmd: RoccCommand) -> u64 {
        0
    }

    fn poll_policy(&self) -> PollPolicy {
        PollPolicy::Skip
    }
}

/// Port that records every command in issue order.
#[derive(Debug, Clone)]
pub struct RecordingPort {
    pub commands: Vec<RoccCommand>,
    policy: PollPolicy,
}

impl RecordingPort {
    /// Creates a recorder whose completions are never polled.
    pub fn new() -> Self {
        Self::with_policy(PollPolicy::Skip)
    }

    pub fn with_policy(policy: PollPolicy) -> Self {
        Self {
            commands: Vec::new(),
            policy,
        }
    }

    /// Funct codes of the recorded commands, in order.
    pub fn functs(&self) -> Vec<u8> {
        self.commands.iter().map(|cmd| cmd.funct).collect()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl Default for RecordingPort {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandPort for RecordingPort {
    unsafe fn issue(&mut self, cmd: RoccCommand) -> u64 {
        self.commands.push(cmd);
        0
    }

    fn poll_policy(&self) -> PollPolicy {
        self.policy
    }
}

#[cfg(target_arch = "riscv64")]
pub use self::rocc::RoccPort;

#[cfg(target_arch = "riscv64")]
mod rocc {
    use super::CommandPort;
    use accel_common::rocc::{CustomOpcode, RoccCommand};

    /// Emits one `.insn r` custom instruction.
    ///
    /// Opcode, funct3 and funct7 are encoded in the instruction word, so they
    /// must be literals.
    macro_rules! insn {
        (rd, $op:literal, $f3:literal, $f7:literal, $rs1:expr, $rs2:expr) => {{
            let rd: u64;
            // SAFETY: the caller upholds CommandPort::issue's contract.
            unsafe {
                core::arch::asm!(
                    concat!(".insn r ", $op, ", ", $f3, ", ", $f7, ", {rd}, {rs1}, {rs2}"),
                    rd = lateout(reg) rd,
                    rs1 = in(reg) $rs1,
                    rs2 = in(reg) $rs2,
                    options(nostack),
                );
            }
            rd
        }};
        (x0, $op:literal, $f3:literal, $f7:literal, $rs1:expr, $rs2:expr) => {{
            // SAFETY: the caller upholds CommandPort::issue's contract.
            unsafe {
                core::arch::asm!(
                    concat!(".insn r ", $op, ", ", $f3, ", ", $f7, ", x0, {rs1}, {rs2}"),
                    rs1 = in(reg) $rs1,
                    rs2 = in(reg) $rs2,
                    options(nostack),
                );
            }
            0
        }};
    }

    /// Expands a runtime funct code into one instruction per possible value.
    macro_rules! by_funct {
        ($dst:tt, $op:literal, $f3:literal, $funct:expr, $rs1:expr, $rs2:expr) => {
            match $funct {
                0 => insn!($dst, $op, $f3, 0, $rs1, $rs2),
                1 => insn!($dst, $op, $f3, 1, $rs1, $rs2),
                2 => insn!($dst, $op, $f3, 2, $rs1, $rs2),
                3 => insn!($dst, $op, $f3, 3, $rs1, $rs2),
                4 => insn!($dst, $op, $f3, 4, $rs1, $rs2),
                5 => insn!($dst, $op, $f3, 5, $rs1, $rs2),
                6 => insn!($dst, $op, $f3, 6, $rs1, $rs2),
                7 => insn!($dst, $op, $f3, 7, $rs1, $rs2),
                8 => insn!($dst, $op, $f3, 8, $rs1, $rs2),
                9 => insn!($dst, $op, $f3, 9, $rs1, $rs2),
                10 => insn!($dst, $op, $f3, 10, $rs1, $rs2),
                11 => insn!($dst, $op, $f3, 11, $rs1, $rs2),
                12 => insn!($dst, $op, $f3, 12, $rs1, $rs2),
                13 => insn!($dst, $op, $f3, 13, $rs1, $rs2),
                other => unreachable!("funct {other} is not assigned on any unit"),
            }
        };
    }

    /// Expands the operand mode (funct3) for one opcode slot.
    macro_rules! by_mode {
        ($op:literal, $cmd:expr) => {
            match $cmd.funct3() {
                0b000 => by_funct!(x0, $op, 0, $cmd.funct, 0u64, 0u64),
                0b010 => by_funct!(x0, $op, 2, $cmd.funct, $cmd.rs1, 0u64),
                0b011 => by_funct!(x0, $op, 3, $cmd.funct, $cmd.rs1, $cmd.rs2),
                0b100 => by_funct!(rd, $op, 4, $cmd.funct, 0u64, 0u64),
                0b110 => by_funct!(rd, $op, 6, $cmd.funct, $cmd.rs1, 0u64),
                0b111 => by_funct!(rd, $op, 7, $cmd.funct, $cmd.rs1, $cmd.rs2),
                other => unreachable!("operand mode {other:#05b} is never issued"),
            }
        };
    }

    /// Issues commands as RoCC custom instructions on the current hart.
    ///
    /// Commands carrying `xd` stall the hart until the unit responds.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct RoccPort;

    impl CommandPort for RoccPort {
        unsafe fn issue(&mut self, cmd: RoccCommand) -> u64 {
            match cmd.opcode {
                CustomOpcode::Custom0 => by_mode!(0x0B, cmd),
                CustomOpcode::Custom1 => by_mode!(0x2B, cmd),
                CustomOpcode::Custom2 => by_mode!(0x5B, cmd),
                CustomOpcode::Custom3 => by_mode!(0x7B, cmd),
            }
        }
    }
}
