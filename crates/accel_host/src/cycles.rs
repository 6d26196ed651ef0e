//! Timestamps for per-request measurements.
//!
//! On RISC-V hardware this is the `cycle` CSR, matching what the benchmark
//! drivers report. Elsewhere it is nanoseconds since the first call.

#[cfg(target_arch = "riscv64")]
pub const UNIT: &str = "cycles";
#[cfg(not(target_arch = "riscv64"))]
pub const UNIT: &str = "ns";

#[cfg(target_arch = "riscv64")]
#[inline(always)]
pub fn now() -> u64 {
    riscv::register::cycle::read() as u64
}

#[cfg(not(target_arch = "riscv64"))]
pub fn now() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}
