//! Per-pipeline command channels.
//!
//! A channel binds one codec pipeline on one SoC build to a port. Each
//! protocol field category gets its own method, and the channel translates
//! it to the funct code of that pipeline, so callers never handle raw funct
//! numbers.

use crate::completion::PollPolicy;
use crate::config::LatencyInjection;
use crate::port::CommandPort;
use crate::AccelError;
use accel_common::rocc::{Algorithm, CommandKind, FunctTable, Pipeline, RoccCommand, SocProfile};
use tracing::trace;

/// Scalar parameters pushed to a pipeline outside of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarParam {
    /// History window limit in bytes.
    History(u64),
    /// Hash table entries, as log2.
    HashTableLog2(u64),
    LatencyInjection(LatencyInjection),
    /// Codec selection on units hosting more than one.
    Algorithm(Algorithm),
}

impl ScalarParam {
    pub fn kind(&self) -> CommandKind {
        match self {
            ScalarParam::History(_) => CommandKind::History,
            ScalarParam::HashTableLog2(_) => CommandKind::HashTableLog2,
            ScalarParam::LatencyInjection(_) => CommandKind::LatencyInjection,
            ScalarParam::Algorithm(_) => CommandKind::SelectAlgorithm,
        }
    }
}

/// Auxiliary buffers some pipelines take besides source and destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxBuffer {
    /// Zstd-compress literal stream scratch.
    Literals,
    /// Zstd-compress sequence stream scratch.
    Sequences,
    /// Zstd-decompress workspace. Only the address is sent.
    Workspace,
}

impl AuxBuffer {
    pub fn kind(self) -> CommandKind {
        match self {
            AuxBuffer::Literals => CommandKind::LiteralsInfo,
            AuxBuffer::Sequences => CommandKind::SequencesInfo,
            AuxBuffer::Workspace => CommandKind::WorkspaceInfo,
        }
    }
}

/// Command interface of one codec pipeline.
///
/// Methods that hand addresses to the device are `unsafe`: the memory behind
/// them must outlive the request. Scalar pushes carry no addresses and are
/// safe, except the compression level, which starts the request on units
/// that latch it after the destination.
pub trait CommandChannel {
    fn pipeline(&self) -> Pipeline;

    /// Funct map of the pipeline on the current build.
    fn table(&self) -> &'static FunctTable;

    /// Poll policy of the transport behind the channel.
    ///
    /// # Returns
    ///
    /// The policy a freshly opened facade starts with. Ports that never
    /// signal on their own report [`PollPolicy::Skip`].
    fn poll_policy(&self) -> PollPolicy;

    /// Flushes the unit's address translation state.
    fn sfence(&mut self);

    /// Pushes a scalar parameter. Fire and forget.
    ///
    /// # Arguments
    ///
    /// * `param` - Value to latch into the unit until overwritten
    ///
    /// # Returns
    ///
    /// `Ok(())` once issued, or [`AccelError::Unsupported`] without issuing
    /// anything if the pipeline has no funct code for the parameter.
    fn scalar_param(&mut self, param: ScalarParam) -> Result<(), AccelError>;

    /// Sends the source address and length.
    ///
    /// # Arguments
    ///
    /// * `addr` - Virtual address of the first input byte
    /// * `len` - Input length in bytes, zero allowed
    ///
    /// # Safety
    ///
    /// `addr..addr + len` must stay readable until the request completes.
    unsafe fn src_info(&mut self, addr: u64, len: u64);

    /// Sends an auxiliary buffer.
    ///
    /// # Arguments
    ///
    /// * `buffer` - Which scratch slot the address fills
    /// * `addr` - Virtual address of the buffer
    /// * `len` - Buffer size, ignored for [`AuxBuffer::Workspace`]
    ///
    /// # Returns
    ///
    /// An error if the pipeline takes no buffer of that kind.
    ///
    /// # Safety
    ///
    /// The buffer must stay writable until the request completes.
    unsafe fn aux_info(&mut self, buffer: AuxBuffer, addr: u64, len: u64)
    -> Result<(), AccelError>;

    /// Sends the destination and the completion word address.
    ///
    /// Starts the device on units without a trailing per-request scalar.
    ///
    /// # Arguments
    ///
    /// * `dst` - Virtual address the output is written to
    /// * `signal` - Address of the word the device sets when done
    ///
    /// # Safety
    ///
    /// Both addresses must stay writable until the request completes, and
    /// `signal` must be an 8-byte aligned word.
    unsafe fn dest_info_and_start(&mut self, dst: u64, signal: u64);

    /// Sends the per-request compression level.
    ///
    /// # Arguments
    ///
    /// * `level` - Zstd level, sign-extended into the operand register
    ///
    /// # Returns
    ///
    /// [`AccelError::Unsupported`] on pipelines without a level command.
    ///
    /// # Safety
    ///
    /// Starts the device on units that latch the level last, so the buffers
    /// of the staged request must be valid.
    unsafe fn level(&mut self, level: i32) -> Result<(), AccelError>;

    /// Issues the blocking completion check.
    ///
    /// # Returns
    ///
    /// The unit's response register. Only the ordering matters; the result
    /// itself is read from the completion word.
    fn check_completion(&mut self) -> u64;
}

/// [`CommandChannel`] implemented over any [`CommandPort`].
#[derive(Debug)]
pub struct RoccChannel<P> {
    port: P,
    profile: SocProfile,
    pipeline: Pipeline,
    table: &'static FunctTable,
}

impl<P: CommandPort> RoccChannel<P> {
    /// Binds `pipeline` of the `profile` build to `port`.
    ///
    /// # Returns
    ///
    /// The channel, or [`AccelError::PipelineUnavailable`] if the build does
    /// not include the pipeline.
    pub fn new(port: P, profile: SocProfile, pipeline: Pipeline) -> Result<Self, AccelError> {
        let table = profile
            .table(pipeline)
            .ok_or(AccelError::PipelineUnavailable { pipeline, profile })?;
        Ok(Self {
            port,
            profile,
            pipeline,
            table,
        })
    }

    pub fn profile(&self) -> SocProfile {
        self.profile
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Releases the channel and gives back its port.
    ///
    /// Scalars the unit latched stay latched; reopening a channel on the
    /// returned port continues from that state.
    pub fn into_port(self) -> P {
        self.port
    }

    fn funct(&self, command: CommandKind) -> Result<u8, AccelError> {
        self.table.funct(command).ok_or(AccelError::Unsupported {
            pipeline: self.pipeline,
            command,
        })
    }
}

impl<P: CommandPort> CommandChannel for RoccChannel<P> {
    fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    fn table(&self) -> &'static FunctTable {
        self.table
    }

    fn poll_policy(&self) -> PollPolicy {
        self.port.poll_policy()
    }

    fn sfence(&mut self) {
        let cmd = RoccCommand::bare(self.table.opcode, self.table.sfence);
        // SAFETY: no address operands.
        unsafe { self.port.issue(cmd) };
    }

    fn scalar_param(&mut self, param: ScalarParam) -> Result<(), AccelError> {
        let funct = self.funct(param.kind())?;
        let opcode = self.table.opcode;
        let cmd = match param {
            ScalarParam::History(bytes) => RoccCommand::single(opcode, funct, bytes),
            ScalarParam::HashTableLog2(log2) => RoccCommand::single(opcode, funct, log2),
            ScalarParam::LatencyInjection(latency) => {
                RoccCommand::pair(opcode, funct, latency.cycles, latency.has_cache as u64)
            }
            ScalarParam::Algorithm(algorithm) => RoccCommand::single(opcode, funct, algorithm.id()),
        };
        trace!(pipeline = self.pipeline.name(), ?param, "push");
        // SAFETY: scalar operands only.
        unsafe { self.port.issue(cmd) };
        Ok(())
    }

    unsafe fn src_info(&mut self, addr: u64, len: u64) {
        let cmd = RoccCommand::pair(self.table.opcode, self.table.src_info, addr, len);
        // SAFETY: forwarded contract.
        unsafe { self.port.issue(cmd) };
    }

    unsafe fn aux_info(
        &mut self,
        buffer: AuxBuffer,
        addr: u64,
        len: u64,
    ) -> Result<(), AccelError> {
        let funct = self.funct(buffer.kind())?;
        let cmd = match buffer {
            AuxBuffer::Workspace => RoccCommand::single(self.table.opcode, funct, addr),
            AuxBuffer::Literals | AuxBuffer::Sequences => {
                RoccCommand::pair(self.table.opcode, funct, addr, len)
            }
        };
        // SAFETY: forwarded contract.
        unsafe { self.port.issue(cmd) };
        Ok(())
    }

    unsafe fn dest_info_and_start(&mut self, dst: u64, signal: u64) {
        let cmd = RoccCommand::pair(self.table.opcode, self.table.dest_info, dst, signal);
        // SAFETY: forwarded contract.
        unsafe { self.port.issue(cmd) };
    }

    unsafe fn level(&mut self, level: i32) -> Result<(), AccelError> {
        let funct = self.funct(CommandKind::Level)?;
        // Sign-extended, as a C int passed in a 64-bit register.
        let cmd = RoccCommand::single(self.table.opcode, funct, level as i64 as u64);
        // SAFETY: forwarded contract.
        unsafe { self.port.issue(cmd) };
        Ok(())
    }

    fn check_completion(&mut self) -> u64 {
        let cmd = RoccCommand::response(self.table.opcode, self.table.check_completion);
        // SAFETY: no address operands.
        unsafe { self.port.issue(cmd) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::RecordingPort;
    use accel_common::rocc::CustomOpcode;

    #[test]
    fn test_channel_rejects_missing_pipeline() {
        let err = RoccChannel::new(
            RecordingPort::new(),
            SocProfile::SnappyStandalone,
            Pipeline::ZstdCompress,
        )
        .unwrap_err();
        assert_eq!(
            err,
            AccelError::PipelineUnavailable {
                pipeline: Pipeline::ZstdCompress,
                profile: SocProfile::SnappyStandalone
            }
        );
    }

    #[test]
    fn test_unsupported_scalar_issues_nothing() {
        let mut channel = RoccChannel::new(
            RecordingPort::new(),
            SocProfile::SnappyStandalone,
            Pipeline::SnappyDecompress,
        )
        .expect("channel");
        let err = channel
            .scalar_param(ScalarParam::HashTableLog2(12))
            .unwrap_err();
        assert!(matches!(err, AccelError::Unsupported { .. }));
        assert!(channel.port().commands.is_empty());
    }

    #[test]
    fn test_latency_injection_uses_both_operands() {
        let mut channel = RoccChannel::new(
            RecordingPort::new(),
            SocProfile::DecompressorSoc,
            Pipeline::ZstdDecompress,
        )
        .expect("channel");
        channel
            .scalar_param(ScalarParam::LatencyInjection(LatencyInjection {
                cycles: 120,
                has_cache: true,
            }))
            .expect("push");
        let cmd = channel.port().commands[0];
        assert_eq!(cmd.opcode, CustomOpcode::Custom2);
        assert_eq!(cmd.funct, 11);
        assert_eq!((cmd.rs1, cmd.rs2), (120, 1));
        assert_eq!(cmd.funct3(), 0b011);
    }

    #[test]
    fn test_negative_level_is_sign_extended() {
        let mut channel = RoccChannel::new(
            RecordingPort::new(),
            SocProfile::CompressorSoc,
            Pipeline::ZstdCompress,
        )
        .expect("channel");
        // SAFETY: recording port never touches memory.
        unsafe { channel.level(-5).expect("level") };
        assert_eq!(channel.port().commands[0].rs1, (-5i64) as u64);
        assert_eq!(channel.port().commands[0].funct, 5);
    }

    #[test]
    fn test_completion_check_expects_response() {
        let mut channel = RoccChannel::new(
            RecordingPort::new(),
            SocProfile::SnappyStandalone,
            Pipeline::SnappyCompress,
        )
        .expect("channel");
        channel.check_completion();
        let cmd = channel.port().commands[0];
        assert!(cmd.xd && !cmd.xs1 && !cmd.xs2);
        assert_eq!(cmd.funct, 3);
        assert_eq!(cmd.opcode, CustomOpcode::Custom3);
    }

    #[test]
    fn test_into_port_keeps_issued_commands() {
        let mut channel = RoccChannel::new(
            RecordingPort::new(),
            SocProfile::CompressorSoc,
            Pipeline::SnappyCompress,
        )
        .expect("channel");
        channel
            .scalar_param(ScalarParam::History(1 << 16))
            .expect("history");
        channel.sfence();
        let port = channel.into_port();
        assert_eq!(port.commands.len(), 2);
        assert_eq!(port.commands[0].rs1, 1 << 16);

        let mut reopened = RoccChannel::new(port, SocProfile::CompressorSoc, Pipeline::ZstdCompress)
            .expect("reopen");
        reopened.check_completion();
        assert_eq!(reopened.port().commands.len(), 3);
        assert_eq!(reopened.pipeline(), Pipeline::ZstdCompress);
    }
}
