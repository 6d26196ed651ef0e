//! Common definitions shared by the accelerator driver, the device model and
//! the host tools.
//!
//! This crate holds the memory constants the driver relies on and the RoCC
//! command set of the compression accelerator: custom opcode slots, funct
//! codes for every codec pipeline on every SoC build, and the binary encoding
//! of a single coprocessor instruction.

#![no_std]

// Memory layout constants for device-visible buffers.
//
// The accelerator walks caller memory through the core's page tables, so every
// buffer handed to it is page aligned and pre-faulted. These constants must
// agree with the page size of the kernel the driver runs under.
pub mod memory {
    /// Page size the driver aligns and pre-touches device regions with.
    pub const PAGE_SIZE: usize = 4096;

    /// Minimum alignment asserted on every region base address.
    ///
    /// Stronger alignment (a full page) is requested from the allocator; this
    /// is the invariant the driver actually checks after allocation.
    pub const MIN_REGION_ALIGN: usize = 8;

    /// Granularity used when laying several outputs into one region.
    ///
    /// Each window is rounded up to the next multiple of this value, with at
    /// least one full granule of padding after the payload.
    pub const WINDOW_GRANULE: usize = 32;
}

/// RoCC command set for the Snappy/Zstd compression accelerator.
///
/// A command is a single R-type custom instruction: the opcode picks the
/// accelerator unit, the funct7 field picks the operation, and up to two
/// 64-bit register operands carry addresses, lengths or scalar values. Units
/// that return a value (completion checks) set the `xd` bit and block the
/// issuing core until the accelerator responds.
pub mod rocc {
    /// RISC-V custom opcode slots a RoCC unit can be attached to.
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum CustomOpcode {
        Custom0 = 0x0B,
        Custom1 = 0x2B,
        Custom2 = 0x5B,
        Custom3 = 0x7B,
    }

    impl CustomOpcode {
        /// Returns the slot for a raw 7-bit opcode, if it is a custom slot.
        pub fn from_bits(bits: u8) -> Option<Self> {
            match bits {
                0x0B => Some(Self::Custom0),
                0x2B => Some(Self::Custom1),
                0x5B => Some(Self::Custom2),
                0x7B => Some(Self::Custom3),
                _ => None,
            }
        }

        /// Raw 7-bit opcode value.
        pub fn bits(self) -> u8 {
            self as u8
        }
    }

    /// One codec direction with its own command channel and configuration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Pipeline {
        SnappyCompress,
        SnappyDecompress,
        ZstdCompress,
        ZstdDecompress,
    }

    impl Pipeline {
        pub const ALL: [Pipeline; 4] = [
            Pipeline::SnappyCompress,
            Pipeline::SnappyDecompress,
            Pipeline::ZstdCompress,
            Pipeline::ZstdDecompress,
        ];

        pub fn name(self) -> &'static str {
            match self {
                Pipeline::SnappyCompress => "snappy-compress",
                Pipeline::SnappyDecompress => "snappy-decompress",
                Pipeline::ZstdCompress => "zstd-compress",
                Pipeline::ZstdDecompress => "zstd-decompress",
            }
        }

        pub fn algorithm(self) -> Algorithm {
            match self {
                Pipeline::SnappyCompress | Pipeline::SnappyDecompress => Algorithm::Snappy,
                Pipeline::ZstdCompress | Pipeline::ZstdDecompress => Algorithm::Zstd,
            }
        }

        pub fn is_compress(self) -> bool {
            matches!(self, Pipeline::SnappyCompress | Pipeline::ZstdCompress)
        }
    }

    /// Algorithm identifiers understood by units that host more than one codec.
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Algorithm {
        Zstd = 0,
        Snappy = 1,
    }

    impl Algorithm {
        pub fn from_id(id: u64) -> Option<Self> {
            match id {
                0 => Some(Algorithm::Zstd),
                1 => Some(Algorithm::Snappy),
                _ => None,
            }
        }

        pub fn id(self) -> u64 {
            self as u64
        }
    }

    /// How the accelerator writes the completion slot of a pipeline.
    ///
    /// The slot is always an 8-byte aligned, zeroed 64-bit word on the driver
    /// side; the width tells which low-order bytes the device fills in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SignalWidth {
        /// Full 64-bit produced-byte count.
        U64,
        /// C `int`: produced-byte count or nonzero success.
        I32,
        /// C `bool`: success flag in the lowest byte.
        Bool,
    }

    /// Operation selected by a funct code.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum CommandKind {
        /// Flush the unit's address translation state.
        Sfence,
        /// Pick the codec on a unit that hosts several.
        SelectAlgorithm,
        /// Source address and length.
        SrcInfo,
        /// Literal-stream scratch buffer address and size.
        LiteralsInfo,
        /// Sequence-stream scratch buffer address and size.
        SequencesInfo,
        /// Decompression workspace address.
        WorkspaceInfo,
        /// Destination address and completion-slot address.
        DestInfo,
        /// Per-request compression level.
        Level,
        /// Blocking completion check (returns a value in `rd`).
        CheckCompletion,
        /// History window size limit in bytes.
        History,
        /// Hash table entry count, as log2.
        HashTableLog2,
        /// Simulated memory latency (cycles) and intermediate-cache flag.
        LatencyInjection,
    }

    /// Funct code assignment for one pipeline on one SoC build.
    ///
    /// `None` means the pipeline does not expose that command on this build.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FunctTable {
        pub opcode: CustomOpcode,
        pub signal: SignalWidth,
        pub sfence: u8,
        pub select_algorithm: Option<u8>,
        pub src_info: u8,
        pub literals_info: Option<u8>,
        pub sequences_info: Option<u8>,
        pub workspace_info: Option<u8>,
        pub dest_info: u8,
        pub level: Option<u8>,
        pub check_completion: u8,
        pub history: u8,
        pub hash_table_log2: Option<u8>,
        pub latency_injection: Option<u8>,
    }

    impl FunctTable {
        /// Returns the funct code used for `kind`, if the pipeline has it.
        pub fn funct(&self, kind: CommandKind) -> Option<u8> {
            match kind {
                CommandKind::Sfence => Some(self.sfence),
                CommandKind::SelectAlgorithm => self.select_algorithm,
                CommandKind::SrcInfo => Some(self.src_info),
                CommandKind::LiteralsInfo => self.literals_info,
                CommandKind::SequencesInfo => self.sequences_info,
                CommandKind::WorkspaceInfo => self.workspace_info,
                CommandKind::DestInfo => Some(self.dest_info),
                CommandKind::Level => self.level,
                CommandKind::CheckCompletion => Some(self.check_completion),
                CommandKind::History => Some(self.history),
                CommandKind::HashTableLog2 => self.hash_table_log2,
                CommandKind::LatencyInjection => self.latency_injection,
            }
        }

        /// Reverse lookup of a funct code on this pipeline.
        pub fn kind_of(&self, funct: u8) -> Option<CommandKind> {
            const KINDS: [CommandKind; 12] = [
                CommandKind::Sfence,
                CommandKind::SelectAlgorithm,
                CommandKind::SrcInfo,
                CommandKind::LiteralsInfo,
                CommandKind::SequencesInfo,
                CommandKind::WorkspaceInfo,
                CommandKind::DestInfo,
                CommandKind::Level,
                CommandKind::CheckCompletion,
                CommandKind::History,
                CommandKind::HashTableLog2,
                CommandKind::LatencyInjection,
            ];
            KINDS
                .into_iter()
                .find(|&kind| self.funct(kind) == Some(funct))
        }

        /// The command whose arrival starts the device on a request.
        ///
        /// Units that latch a per-request scalar after the destination write
        /// start on that scalar; every other unit starts on the destination.
        pub fn start_trigger(&self) -> CommandKind {
            if self.level.is_some() {
                CommandKind::Level
            } else {
                CommandKind::DestInfo
            }
        }
    }

    /// SoC builds the driver knows the command map of.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum SocProfile {
        /// Stand-alone Snappy compressor (custom3) and decompressor (custom2).
        SnappyStandalone,
        /// Combined Zstd/Snappy compressor (custom2) plus a Snappy
        /// decompressor (custom3) for checking its output.
        CompressorSoc,
        /// Combined Zstd/Snappy decompressor (custom2) with an algorithm
        /// select command.
        DecompressorSoc,
    }

    const STANDALONE_SNAPPY_COMPRESS: FunctTable = FunctTable {
        opcode: CustomOpcode::Custom3,
        signal: SignalWidth::U64,
        sfence: 0,
        select_algorithm: None,
        src_info: 1,
        literals_info: None,
        sequences_info: None,
        workspace_info: None,
        dest_info: 2,
        level: None,
        check_completion: 3,
        history: 4,
        hash_table_log2: Some(5),
        latency_injection: None,
    };

    const STANDALONE_SNAPPY_DECOMPRESS: FunctTable = FunctTable {
        opcode: CustomOpcode::Custom2,
        signal: SignalWidth::Bool,
        sfence: 0,
        select_algorithm: None,
        src_info: 1,
        literals_info: None,
        sequences_info: None,
        workspace_info: None,
        dest_info: 2,
        level: None,
        check_completion: 3,
        history: 4,
        hash_table_log2: None,
        latency_injection: None,
    };

    const COMPRESSOR_ZSTD: FunctTable = FunctTable {
        opcode: CustomOpcode::Custom2,
        signal: SignalWidth::I32,
        sfence: 0,
        select_algorithm: None,
        src_info: 1,
        literals_info: Some(2),
        sequences_info: Some(3),
        workspace_info: None,
        dest_info: 4,
        level: Some(5),
        check_completion: 10,
        history: 11,
        hash_table_log2: Some(12),
        latency_injection: Some(13),
    };

    const COMPRESSOR_SNAPPY: FunctTable = FunctTable {
        opcode: CustomOpcode::Custom2,
        signal: SignalWidth::I32,
        sfence: 0,
        select_algorithm: None,
        src_info: 6,
        literals_info: None,
        sequences_info: None,
        workspace_info: None,
        dest_info: 7,
        level: None,
        check_completion: 10,
        history: 8,
        hash_table_log2: Some(9),
        latency_injection: None,
    };

    const COMPRESSOR_SNAPPY_CHECKER: FunctTable = FunctTable {
        opcode: CustomOpcode::Custom3,
        ..STANDALONE_SNAPPY_DECOMPRESS
    };

    const DECOMPRESSOR_ZSTD: FunctTable = FunctTable {
        opcode: CustomOpcode::Custom2,
        signal: SignalWidth::I32,
        sfence: 0,
        select_algorithm: Some(1),
        src_info: 2,
        literals_info: None,
        sequences_info: None,
        workspace_info: Some(3),
        dest_info: 4,
        level: None,
        check_completion: 5,
        history: 6,
        hash_table_log2: None,
        latency_injection: Some(11),
    };

    const DECOMPRESSOR_SNAPPY: FunctTable = FunctTable {
        opcode: CustomOpcode::Custom2,
        signal: SignalWidth::Bool,
        sfence: 0,
        select_algorithm: Some(1),
        src_info: 7,
        literals_info: None,
        sequences_info: None,
        workspace_info: None,
        dest_info: 8,
        level: None,
        check_completion: 9,
        history: 10,
        hash_table_log2: None,
        latency_injection: None,
    };

    impl SocProfile {
        pub const ALL: [SocProfile; 3] = [
            SocProfile::SnappyStandalone,
            SocProfile::CompressorSoc,
            SocProfile::DecompressorSoc,
        ];

        pub fn name(self) -> &'static str {
            match self {
                SocProfile::SnappyStandalone => "snappy-standalone",
                SocProfile::CompressorSoc => "compressor",
                SocProfile::DecompressorSoc => "decompressor",
            }
        }

        /// Command map of `pipeline` on this build, if the build has it.
        pub fn table(self, pipeline: Pipeline) -> Option<&'static FunctTable> {
            match (self, pipeline) {
                (SocProfile::SnappyStandalone, Pipeline::SnappyCompress) => {
                    Some(&STANDALONE_SNAPPY_COMPRESS)
                }
                (SocProfile::SnappyStandalone, Pipeline::SnappyDecompress) => {
                    Some(&STANDALONE_SNAPPY_DECOMPRESS)
                }
                (SocProfile::CompressorSoc, Pipeline::ZstdCompress) => Some(&COMPRESSOR_ZSTD),
                (SocProfile::CompressorSoc, Pipeline::SnappyCompress) => Some(&COMPRESSOR_SNAPPY),
                (SocProfile::CompressorSoc, Pipeline::SnappyDecompress) => {
                    Some(&COMPRESSOR_SNAPPY_CHECKER)
                }
                (SocProfile::DecompressorSoc, Pipeline::ZstdDecompress) => {
                    Some(&DECOMPRESSOR_ZSTD)
                }
                (SocProfile::DecompressorSoc, Pipeline::SnappyDecompress) => {
                    Some(&DECOMPRESSOR_SNAPPY)
                }
                _ => None,
            }
        }

        /// Pipelines present on this build.
        pub fn pipelines(self) -> impl Iterator<Item = Pipeline> {
            Pipeline::ALL
                .into_iter()
                .filter(move |&pipeline| self.table(pipeline).is_some())
        }

        /// Decodes a command arriving on `opcode` with `funct`.
        ///
        /// Commands shared by every pipeline of a unit (sfence, completion
        /// check, algorithm select) resolve to the first pipeline on that
        /// opcode; callers treat those as unit-wide.
        pub fn decode(self, opcode: CustomOpcode, funct: u8) -> Option<(Pipeline, CommandKind)> {
            self.pipelines().find_map(|pipeline| {
                let table = self.table(pipeline)?;
                if table.opcode != opcode {
                    return None;
                }
                table.kind_of(funct).map(|kind| (pipeline, kind))
            })
        }
    }

    /// A single RoCC instruction as issued by the driver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RoccCommand {
        pub opcode: CustomOpcode,
        pub funct: u8,
        /// Unit expects a response in `rd`.
        pub xd: bool,
        /// `rs1` carries a value.
        pub xs1: bool,
        /// `rs2` carries a value.
        pub xs2: bool,
        pub rs1: u64,
        pub rs2: u64,
    }

    impl RoccCommand {
        /// Command with no operands and no response.
        pub fn bare(opcode: CustomOpcode, funct: u8) -> Self {
            Self {
                opcode,
                funct,
                xd: false,
                xs1: false,
                xs2: false,
                rs1: 0,
                rs2: 0,
            }
        }

        /// Command carrying one operand in `rs1`.
        pub fn single(opcode: CustomOpcode, funct: u8, rs1: u64) -> Self {
            Self {
                xs1: true,
                rs1,
                ..Self::bare(opcode, funct)
            }
        }

        /// Command carrying two operands.
        pub fn pair(opcode: CustomOpcode, funct: u8, rs1: u64, rs2: u64) -> Self {
            Self {
                xs1: true,
                xs2: true,
                rs1,
                rs2,
                ..Self::bare(opcode, funct)
            }
        }

        /// Command with no operands that waits for a response in `rd`.
        pub fn response(opcode: CustomOpcode, funct: u8) -> Self {
            Self {
                xd: true,
                ..Self::bare(opcode, funct)
            }
        }

        /// The funct3 field: `xd`, `xs1`, `xs2` from high to low bit.
        pub fn funct3(&self) -> u8 {
            ((self.xd as u8) << 2) | ((self.xs1 as u8) << 1) | (self.xs2 as u8)
        }

        /// Encodes the instruction word for the given register numbers.
        pub fn encode(&self, rd: u8, rs1: u8, rs2: u8) -> u32 {
            ((self.funct as u32 & 0x7F) << 25)
                | ((rs2 as u32 & 0x1F) << 20)
                | ((rs1 as u32 & 0x1F) << 15)
                | ((self.funct3() as u32) << 12)
                | ((rd as u32 & 0x1F) << 7)
                | self.opcode.bits() as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::rocc::*;

    #[test]
    fn test_encode_matches_custom3_pair_layout() {
        // custom3, funct 2, x0 <- a0, a1 with xs1/xs2 set.
        let cmd = RoccCommand::pair(CustomOpcode::Custom3, 2, 0x1000, 0x2000);
        assert_eq!(cmd.funct3(), 0b011);
        assert_eq!(cmd.encode(0, 10, 11), 0x04B5_307B);
    }

    #[test]
    fn test_response_command_sets_xd_only() {
        let cmd = RoccCommand::response(CustomOpcode::Custom2, 10);
        assert_eq!(cmd.funct3(), 0b100);
        let word = cmd.encode(5, 0, 0);
        assert_eq!(word & 0x7F, 0x5B);
        assert_eq!((word >> 7) & 0x1F, 5);
        assert_eq!(word >> 25, 10);
    }

    #[test]
    fn test_every_table_has_distinct_functs() {
        for profile in SocProfile::ALL {
            for pipeline in profile.pipelines() {
                let table = profile.table(pipeline).unwrap();
                let mut seen = [false; 128];
                for funct in 0..128u8 {
                    if table.kind_of(funct).is_some() {
                        assert!(!seen[funct as usize]);
                        seen[funct as usize] = true;
                    }
                }
                assert_eq!(table.kind_of(table.dest_info), Some(CommandKind::DestInfo));
                assert_eq!(table.kind_of(table.src_info), Some(CommandKind::SrcInfo));
            }
        }
    }

    #[test]
    fn test_units_sharing_an_opcode_do_not_collide() {
        for profile in SocProfile::ALL {
            for a in profile.pipelines() {
                for b in profile.pipelines() {
                    if a == b {
                        continue;
                    }
                    let (ta, tb) = (profile.table(a).unwrap(), profile.table(b).unwrap());
                    if ta.opcode != tb.opcode {
                        continue;
                    }
                    // Only unit-wide commands may share a code.
                    assert_ne!(ta.src_info, tb.src_info);
                    assert_ne!(ta.dest_info, tb.dest_info);
                    assert_ne!(ta.history, tb.history);
                    assert_eq!(ta.sfence, tb.sfence);
                }
            }
        }
    }

    #[test]
    fn test_zstd_compress_starts_on_level() {
        let table = SocProfile::CompressorSoc
            .table(Pipeline::ZstdCompress)
            .unwrap();
        assert_eq!(table.start_trigger(), CommandKind::Level);
        let snappy = SocProfile::SnappyStandalone
            .table(Pipeline::SnappyCompress)
            .unwrap();
        assert_eq!(snappy.start_trigger(), CommandKind::DestInfo);
    }

    #[test]
    fn test_decode_resolves_pipeline_by_funct() {
        let decoded = SocProfile::DecompressorSoc.decode(CustomOpcode::Custom2, 7);
        assert_eq!(
            decoded,
            Some((Pipeline::SnappyDecompress, CommandKind::SrcInfo))
        );
        let decoded = SocProfile::DecompressorSoc.decode(CustomOpcode::Custom2, 3);
        assert_eq!(
            decoded,
            Some((Pipeline::ZstdDecompress, CommandKind::WorkspaceInfo))
        );
        assert_eq!(SocProfile::DecompressorSoc.decode(CustomOpcode::Custom3, 1), None);
    }

    #[test]
    fn test_profiles_expose_expected_pipelines() {
        assert!(SocProfile::SnappyStandalone.table(Pipeline::ZstdCompress).is_none());
        assert!(SocProfile::CompressorSoc.table(Pipeline::ZstdDecompress).is_none());
        assert!(SocProfile::DecompressorSoc.table(Pipeline::SnappyCompress).is_none());
        assert_eq!(SocProfile::CompressorSoc.pipelines().count(), 3);
    }
}
