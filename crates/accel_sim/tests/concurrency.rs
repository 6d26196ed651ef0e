//! Scoped non-blocking dispatch, concurrent pipelines and stalled requests.

use accel_common::rocc::{Pipeline, SocProfile};
use accel_core::dispatch::dispatch_nonblocking;
use accel_core::{
    AccelError, AuxSet, CompletionMonitor, CompletionSignal, CompressScratch, LatencyInjection,
    PollPolicy, RawRequest, RoccChannel, SnappyCompressor, ZstdCompressor, ZstdDecompressor,
};
use accel_sim::{SimConfig, SimPort, SimulatedAccelerator};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

fn threaded(profile: SocProfile) -> SimulatedAccelerator {
    SimulatedAccelerator::new(SimConfig::new(profile).threaded()).expect("simulated accelerator")
}

fn corpus(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ (i / 4096) as u8).collect()
}

/// Dispatch, unrelated host work, then wait gives the blocking call's result.
#[test]
fn test_nonblocking_matches_blocking() {
    let device = threaded(SocProfile::CompressorSoc);
    let mut compressor =
        ZstdCompressor::open(device.port(), SocProfile::CompressorSoc).expect("compressor");
    compressor
        .set_latency_injection(LatencyInjection {
            cycles: 200_000,
            has_cache: false,
        })
        .expect("latency");

    let input = corpus(64 << 10);
    let bound = ZstdCompressor::<SimPort>::max_compressed_len(input.len());
    let mut literals = vec![0u8; input.len()];
    let mut sequences = vec![0u8; input.len()];
    let mut scratch = CompressScratch::new(&mut literals, &mut sequences);

    let mut blocking_out = vec![0u8; bound];
    let blocking = compressor
        .compress(&input, &mut scratch, &mut blocking_out, 5)
        .expect("blocking compress") as usize;

    let mut async_out = vec![0u8; bound];
    let (checksum, completion) = compressor
        .compress_nonblocking(&input, &mut scratch, &mut async_out, 5, |_| {
            (0..100_000u64).fold(0u64, |acc, x| acc.wrapping_mul(31).wrapping_add(x))
        })
        .expect("dispatch");
    assert_ne!(checksum, 0);
    let produced = completion.produced_bytes() as usize;

    assert_eq!(produced, blocking);
    assert_eq!(async_out[..produced], blocking_out[..blocking]);
    assert_eq!(device.jobs_completed(), 2);
}

fn slow_decompressor(device: &SimulatedAccelerator, cycles: u64) -> ZstdDecompressor<SimPort> {
    let mut decompressor =
        ZstdDecompressor::open(device.port(), SocProfile::DecompressorSoc).expect("decompressor");
    decompressor
        .set_latency_injection(LatencyInjection {
            cycles,
            has_cache: true,
        })
        .expect("latency");
    decompressor
}

/// Host work that never waits still gets its buffers back only once done.
#[test]
fn test_scope_waits_without_explicit_wait() {
    let device = threaded(SocProfile::DecompressorSoc);
    let mut decompressor = slow_decompressor(&device, 1_000_000);

    let input = corpus(10_000);
    let frame = zstd::bulk::compress(&input, 3).expect("reference compress");
    let mut workspace = vec![0u8; input.len()];
    let mut out = vec![0u8; input.len()];
    let ((), completion) = decompressor
        .decompress_nonblocking(&frame, &mut workspace, &mut out, |_| ())
        .expect("dispatch");
    assert!(completion.success());
    assert_eq!(out, input);
    assert_eq!(device.jobs_completed(), 1);
}

/// Forgetting the lent handle cannot hand the buffers back early.
#[test]
#[allow(forgetting_references)]
fn test_forgotten_handle_cannot_release_buffers() {
    let device = threaded(SocProfile::DecompressorSoc);
    let mut decompressor = slow_decompressor(&device, 100_000_000);

    let input = vec![0xABu8; 4096];
    let frame = zstd::bulk::compress(&input, 3).expect("reference compress");
    let mut workspace = vec![0u8; input.len()];
    let mut out = vec![0u8; input.len()];
    let (done_early, completion) = decompressor
        .decompress_nonblocking(&frame, &mut workspace, &mut out, |in_flight| {
            let done = in_flight.poll();
            std::mem::forget(in_flight);
            done
        })
        .expect("dispatch");

    assert!(!done_early);
    assert!(completion.success());
    assert_eq!(out[0], 0xAB);
    let settled = out.clone();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(out, settled);
    assert_eq!(settled, input);
    assert_eq!(device.jobs_completed(), 1);
}

/// A panic in host work unwinds only after the device is done.
#[test]
fn test_unwinding_host_work_waits_for_device() {
    let device = threaded(SocProfile::DecompressorSoc);
    let mut decompressor = slow_decompressor(&device, 20_000_000);

    let input = corpus(8192);
    let frame = zstd::bulk::compress(&input, 3).expect("reference compress");
    let mut workspace = vec![0u8; input.len()];
    let mut out = vec![0u8; input.len()];
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        decompressor.decompress_nonblocking(&frame, &mut workspace, &mut out, |_| -> u8 {
            panic!("host work failed")
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(device.jobs_completed(), 1);
    assert_eq!(out, input);
}

/// Two pipelines of one unit, each driven by its own thread.
#[test]
fn test_independent_pipelines_run_concurrently() {
    let device = threaded(SocProfile::CompressorSoc);
    let inputs: Vec<Vec<u8>> = (0..8).map(|i| corpus(4096 + i * 1000)).collect();

    std::thread::scope(|scope| {
        let snappy_port = device.port();
        let snappy_inputs = &inputs;
        scope.spawn(move || {
            let mut compressor = SnappyCompressor::open(snappy_port, SocProfile::CompressorSoc)
                .expect("snappy compressor");
            for input in snappy_inputs {
                let mut out =
                    vec![0u8; SnappyCompressor::<SimPort>::max_compressed_len(input.len())];
                let produced = compressor.compress(input, &mut out).expect("compress") as usize;
                let decoded = snap::raw::Decoder::new()
                    .decompress_vec(&out[..produced])
                    .expect("reference decode");
                assert_eq!(&decoded, input);
            }
        });

        let zstd_port = device.port();
        let zstd_inputs = &inputs;
        scope.spawn(move || {
            let mut compressor = ZstdCompressor::open(zstd_port, SocProfile::CompressorSoc)
                .expect("zstd compressor");
            for input in zstd_inputs {
                let mut literals = vec![0u8; input.len()];
                let mut sequences = vec![0u8; input.len()];
                let mut scratch = CompressScratch::new(&mut literals, &mut sequences);
                let mut out = vec![0u8; ZstdCompressor::<SimPort>::max_compressed_len(input.len())];
                let produced = compressor
                    .compress(input, &mut scratch, &mut out, 3)
                    .expect("compress") as usize;
                let decoded =
                    zstd::stream::decode_all(&out[..produced]).expect("reference decode");
                assert_eq!(&decoded, input);
            }
        });
    });

    assert_eq!(device.jobs_completed(), 16);
}

/// Requests on different pipelines may be outstanding at the same time.
#[test]
fn test_two_requests_in_flight() {
    let device = threaded(SocProfile::CompressorSoc);
    let mut snappy =
        SnappyCompressor::open(device.port(), SocProfile::CompressorSoc).expect("snappy");
    let mut zstd = ZstdCompressor::open(device.port(), SocProfile::CompressorSoc).expect("zstd");

    let input = corpus(20_000);
    let mut snappy_out = vec![0u8; SnappyCompressor::<SimPort>::max_compressed_len(input.len())];
    let mut zstd_out = vec![0u8; ZstdCompressor::<SimPort>::max_compressed_len(input.len())];
    let mut literals = vec![0u8; input.len()];
    let mut sequences = vec![0u8; input.len()];
    let mut scratch = CompressScratch::new(&mut literals, &mut sequences);

    let ((zstd_len, zstd_pipeline, snappy_pipeline), snappy_completion) = snappy
        .compress_nonblocking(&input, &mut snappy_out, |a| {
            let (b_pipeline, zstd_completion) = zstd
                .compress_nonblocking(&input, &mut scratch, &mut zstd_out, 3, |b| b.pipeline())
                .expect("zstd dispatch");
            let zstd_len = zstd_completion.produced_bytes() as usize;
            (zstd_len, b_pipeline, a.pipeline())
        })
        .expect("snappy dispatch");
    assert_eq!(snappy_pipeline, Pipeline::SnappyCompress);
    assert_eq!(zstd_pipeline, Pipeline::ZstdCompress);
    let snappy_len = snappy_completion.produced_bytes() as usize;

    let decoded = snap::raw::Decoder::new()
        .decompress_vec(&snappy_out[..snappy_len])
        .expect("snappy reference");
    assert_eq!(decoded, input);
    let decoded = zstd::stream::decode_all(&zstd_out[..zstd_len]).expect("zstd reference");
    assert_eq!(decoded, input);
}

/// A malformed frame never signals; a bounded raw wait reports the stall.
#[test]
fn test_malformed_frame_stalls_raw_wait() {
    let device =
        SimulatedAccelerator::new(SimConfig::new(SocProfile::DecompressorSoc)).expect("sim");
    let mut channel = RoccChannel::new(
        device.port(),
        SocProfile::DecompressorSoc,
        Pipeline::ZstdDecompress,
    )
    .expect("channel");

    // Valid header declaring 64 bytes, followed by garbage blocks.
    let mut src = vec![0x28, 0xB5, 0x2F, 0xFD, 0x20, 0x40];
    src.extend_from_slice(&[0xFF; 32]);
    let mut workspace = vec![0u8; 64];
    let mut dst = vec![0u8; 64];
    let signal = CompletionSignal::new();
    let request = RawRequest {
        src: src.as_ptr() as u64,
        src_len: src.len() as u64,
        aux: AuxSet::Workspace(workspace.as_mut_ptr() as u64),
        dst: dst.as_mut_ptr() as u64,
        dst_capacity: dst.len() as u64,
        level: None,
    };
    // SAFETY: every buffer outlives the request and is untouched until the
    // end of the test.
    unsafe { dispatch_nonblocking(&mut channel, &request, &signal).expect("dispatch") };

    let monitor = CompletionMonitor::new(PollPolicy::Bounded(10_000));
    assert_eq!(
        monitor.block_until_complete(&mut channel, &signal),
        Err(AccelError::Stalled { spins: 10_000 })
    );
    assert_eq!(device.jobs_stalled(), 1);
    assert!(dst.iter().all(|&b| b == 0));
}
