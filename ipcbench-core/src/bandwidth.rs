// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Bandwidth aggregation.
//!
//! Sustained throughput is total bytes moved over total time spent moving
//! them: `(data_size * iterations) / sum(durations)`. Averaging per-iteration
//! ratios instead would over-weight the shortest iterations.

use std::time::Duration;

use crate::error::AggregationError;

/// Bytes in one GiB, the unit bandwidth is reported in.
pub const BYTES_PER_GIB: f64 = (1u64 << 30) as f64;

/// Aggregate measured durations into bytes per second.
///
/// # Errors
/// Fails instead of producing `inf` or `NaN` when there are no samples, when
/// the sample count differs from `measured_iterations`, when the total
/// duration is zero, or when the payload is empty.
pub fn aggregate(
    durations: &[Duration],
    measured_iterations: u32,
    data_size: usize,
) -> Result<f64, AggregationError> {
    if durations.is_empty() {
        return Err(AggregationError::Empty);
    }
    if durations.len() != measured_iterations as usize {
        return Err(AggregationError::SampleCountMismatch {
            expected: measured_iterations,
            actual: durations.len(),
        });
    }
    if data_size == 0 {
        return Err(AggregationError::ZeroPayload);
    }

    let total: Duration = durations.iter().sum();
    if total.is_zero() {
        return Err(AggregationError::ZeroDuration);
    }

    let total_bytes = data_size as f64 * f64::from(measured_iterations);
    Ok(total_bytes / total.as_secs_f64())
}

/// Render bytes per second as GiB/s.
pub fn format_gib_per_sec(bytes_per_sec: f64) -> String {
    format!("{:.3} GiB/s", bytes_per_sec / BYTES_PER_GIB)
}

/// Elapsed-time samples of the measured iterations of one run, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationRecord {
    samples: Vec<Duration>,
}

impl IterationRecord {
    pub fn with_capacity(iterations: u32) -> Self {
        Self {
            samples: Vec::with_capacity(iterations as usize),
        }
    }

    pub fn push(&mut self, elapsed: Duration) {
        self.samples.push(elapsed);
    }

    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn total(&self) -> Duration {
        self.samples.iter().sum()
    }

    /// Aggregate the record for a payload of `data_size` bytes.
    pub fn bandwidth(&self, data_size: usize) -> Result<f64, AggregationError> {
        let iterations =
            u32::try_from(self.samples.len()).map_err(|_| AggregationError::SampleCountMismatch {
                expected: u32::MAX,
                actual: self.samples.len(),
            })?;
        aggregate(&self.samples, iterations, data_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sample() {
        let bw = aggregate(&[Duration::from_millis(500)], 1, 1000).unwrap();
        assert!((bw - 2000.0).abs() < 1e-9);

        let bw = aggregate(&[Duration::from_nanos(3)], 1, 12).unwrap();
        assert!((bw - 4e9).abs() < 1.0);
    }

    #[test]
    fn test_sum_then_divide() {
        // 1s + 3s for 2 x 100 bytes is 50 B/s, not the 66.7 B/s mean of ratios.
        let bw = aggregate(&[Duration::from_secs(1), Duration::from_secs(3)], 2, 100).unwrap();
        assert!((bw - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_strictly_decreasing_in_total() {
        let mut last = f64::INFINITY;
        for ms in [1u64, 2, 5, 10, 100, 1000] {
            let durations = [Duration::from_millis(ms), Duration::from_millis(ms)];
            let bw = aggregate(&durations, 2, 1 << 20).unwrap();
            assert!(bw < last);
            last = bw;
        }
    }

    #[test]
    fn test_degenerate_inputs_fail() {
        assert_eq!(aggregate(&[], 0, 10), Err(AggregationError::Empty));
        assert_eq!(aggregate(&[], 3, 10), Err(AggregationError::Empty));
        assert_eq!(
            aggregate(&[Duration::from_secs(1)], 2, 10),
            Err(AggregationError::SampleCountMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            aggregate(&[Duration::ZERO, Duration::ZERO], 2, 10),
            Err(AggregationError::ZeroDuration)
        );
        assert_eq!(
            aggregate(&[Duration::from_secs(1)], 1, 0),
            Err(AggregationError::ZeroPayload)
        );
    }

    #[test]
    fn test_iteration_record() {
        let mut record = IterationRecord::with_capacity(2);
        assert!(record.is_empty());
        assert!(record.bandwidth(100).is_err());

        record.push(Duration::from_millis(250));
        record.push(Duration::from_millis(750));
        assert_eq!(record.len(), 2);
        assert_eq!(record.total(), Duration::from_secs(1));
        assert!((record.bandwidth(100).unwrap() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_format_gib() {
        assert_eq!(format_gib_per_sec(BYTES_PER_GIB * 2.5), "2.500 GiB/s");
    }
}
