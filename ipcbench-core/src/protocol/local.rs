// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! In-process copy benchmarks: the baseline every IPC figure is compared to.

use std::ops::Range;
use std::thread;
use std::time::{Duration, Instant};

use crate::bandwidth::{aggregate, format_gib_per_sec, IterationRecord};
use crate::error::{BenchError, BenchResult, HardValidationError};
use crate::payload;
use crate::protocol::{Phase, RunOutcome, RunParams};
use crate::types::TransportKind;

/// Upper bound on copy threads.
pub const MAX_THREADS: usize = 1024;

/// Split `data_size` into `n` contiguous ranges. The last range absorbs the
/// remainder, so only it can be longer than `data_size / n`.
pub fn partition(data_size: usize, n: usize) -> Vec<Range<usize>> {
    if n == 0 {
        return Vec::new();
    }
    let chunk = data_size / n;
    (0..n)
        .map(|i| {
            let start = i * chunk;
            let end = if i == n - 1 { data_size } else { start + chunk };
            start..end
        })
        .collect()
}

/// Single-threaded copy of the payload into a private buffer.
pub fn run_memcpy(params: &RunParams) -> BenchResult<RunOutcome> {
    run_local(TransportKind::Memcpy, params, 1, |src, dst| {
        dst.copy_from_slice(src);
        Ok(())
    })
}

/// Copy fanned out over `threads` scoped threads. Spawn and join are inside
/// the timed window.
pub fn run_memcpy_mt(params: &RunParams, threads: usize) -> BenchResult<RunOutcome> {
    if threads == 0 || threads > MAX_THREADS {
        return Err(HardValidationError::InvalidFieldValue {
            field: "threads",
            value: threads.to_string(),
            reason: format!("Thread count must be in 1..={}", MAX_THREADS),
        }
        .into());
    }

    let ranges = partition(params.data_size, threads);
    run_local(TransportKind::MemcpyMt, params, threads, |src, dst| {
        parallel_copy(src, dst, &ranges)
    })
}

fn parallel_copy(src: &[u8], dst: &mut [u8], ranges: &[Range<usize>]) -> BenchResult<()> {
    thread::scope(|scope| {
        let mut rest = dst;
        let mut handles = Vec::with_capacity(ranges.len());
        for (id, range) in ranges.iter().enumerate() {
            let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(range.len());
            rest = tail;
            let source = &src[range.clone()];
            let handle = thread::Builder::new()
                .name(format!("memcpy-{}", id))
                .spawn_scoped(scope, move || chunk.copy_from_slice(source))
                .map_err(|e| BenchError::Io {
                    context: "spawning copy thread",
                    source: e,
                })?;
            handles.push(handle);
        }

        for handle in handles {
            handle
                .join()
                .map_err(|_| BenchError::syscall("pthread_join", "copy thread panicked"))?;
        }
        Ok(())
    })
}

fn run_local<F>(
    kind: TransportKind,
    params: &RunParams,
    threads: usize,
    mut copy: F,
) -> BenchResult<RunOutcome>
where
    F: FnMut(&[u8], &mut [u8]) -> BenchResult<()>,
{
    params.validate()?;

    let src = payload::generate(params.data_size);
    let mut dst = vec![0u8; params.data_size];
    let mut record = IterationRecord::with_capacity(params.measured_iterations);

    for iteration in 0..params.total_iterations() {
        let phase = params.phase(iteration);
        dst.fill(0);

        let start = Instant::now();
        copy(&src, &mut dst)?;
        let elapsed: Duration = start.elapsed();
        std::hint::black_box(&dst);

        if phase == Phase::Measure {
            record.push(elapsed);
            payload::check(&dst, params.data_size)
                .map_err(|source| BenchError::CopyIntegrity { iteration, source })?;
        }

        tracing::debug!(
            transport = %kind,
            iteration = iteration,
            phase = phase.as_str(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Copy complete"
        );
    }

    let bandwidth = aggregate(record.samples(), params.measured_iterations, params.data_size)?;
    tracing::info!(
        transport = %kind,
        threads = threads,
        bandwidth = %format_gib_per_sec(bandwidth),
        "Run complete"
    );

    Ok(RunOutcome {
        kind,
        params: *params,
        bandwidth,
        record,
        threads,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IntegrityError;

    #[test]
    fn test_partition_even() {
        assert_eq!(
            partition(10_000, 4),
            vec![0..2500, 2500..5000, 5000..7500, 7500..10_000]
        );
    }

    #[test]
    fn test_partition_remainder_goes_last() {
        assert_eq!(partition(10, 3), vec![0..3, 3..6, 6..10]);
    }

    #[test]
    fn test_partition_more_threads_than_bytes() {
        let ranges = partition(3, 5);
        assert_eq!(ranges.len(), 5);
        assert_eq!(ranges[4], 0..3);
        assert!(ranges[..4].iter().all(|r| r.is_empty()));
    }

    #[test]
    fn test_partition_covers_everything() {
        for (size, n) in [(1usize, 1usize), (1 << 20, 7), (999, 10), (64, 64)] {
            let ranges = partition(size, n);
            assert_eq!(ranges.first().map(|r| r.start), Some(0));
            assert_eq!(ranges.last().map(|r| r.end), Some(size));
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
        }
    }

    #[test]
    fn test_parallel_copy_matches_source() {
        let src = payload::generate(10_007);
        let mut dst = vec![0u8; src.len()];
        parallel_copy(&src, &mut dst, &partition(src.len(), 4)).unwrap();
        assert_eq!(src, dst);
    }

    #[test]
    fn test_run_memcpy() {
        let params = RunParams::new(5, 2, 1 << 20, 1 << 16).unwrap();
        let outcome = run_memcpy(&params).unwrap();
        assert_eq!(outcome.kind, TransportKind::Memcpy);
        assert_eq!(outcome.record.len(), 5);
        assert!(outcome.bandwidth.is_finite() && outcome.bandwidth > 0.0);
    }

    #[test]
    fn test_run_memcpy_mt() {
        let params = RunParams::new(3, 1, 10_000, 10_000).unwrap();
        let outcome = run_memcpy_mt(&params, 4).unwrap();
        assert_eq!(outcome.threads, 4);
        assert_eq!(outcome.record.len(), 3);
        assert!(outcome.bandwidth > 0.0);
    }

    #[test]
    fn test_faulty_copy_is_reported_without_role() {
        let params = RunParams::new(2, 1, 256, 256).unwrap();
        let result = run_local(TransportKind::Memcpy, &params, 1, |src, dst| {
            dst[..src.len() - 1].copy_from_slice(&src[..src.len() - 1]);
            Ok(())
        });
        match result {
            Err(BenchError::CopyIntegrity {
                iteration: 1,
                source: IntegrityError::ContentMismatch { offset: 255, .. },
            }) => {}
            other => panic!("expected copy integrity failure, got {:?}", other),
        }
    }

    #[test]
    fn test_memcpy_mt_rejects_bad_thread_counts() {
        let params = RunParams::new(1, 0, 64, 64).unwrap();
        assert!(run_memcpy_mt(&params, 0).is_err());
        assert!(run_memcpy_mt(&params, MAX_THREADS + 1).is_err());
    }
}
