// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Measurement protocol shared by every benchmark.
//!
//! A run goes `INIT -> WARMUP* -> MEASURE* -> TEARDOWN`. Warmup iterations
//! execute exactly like measured ones but are neither recorded nor verified.
//! Two-process transports are driven by [`two_process`], in-process copies by
//! [`local`].

pub mod local;
pub mod two_process;

use serde::{Deserialize, Serialize};

use crate::bandwidth::IterationRecord;
use crate::error::HardValidationError;
use crate::types::TransportKind;

/// Iteration counts and sizes for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParams {
    /// Iterations that contribute to the reported bandwidth.
    pub measured_iterations: u32,
    /// Iterations executed first and discarded.
    pub warmup_iterations: u32,
    /// Payload bytes moved per iteration.
    pub data_size: usize,
    /// Largest chunk handed to a single send or receive. May exceed
    /// `data_size`; see [`RunParams::chunk_size`].
    pub buffer_size: usize,
}

impl RunParams {
    /// Validated parameters.
    ///
    /// # Errors
    /// Rejects zero measured iterations, an empty payload and a zero chunk
    /// size.
    pub fn new(
        measured_iterations: u32,
        warmup_iterations: u32,
        data_size: usize,
        buffer_size: usize,
    ) -> Result<Self, HardValidationError> {
        let params = Self {
            measured_iterations,
            warmup_iterations,
            data_size,
            buffer_size,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), HardValidationError> {
        if self.measured_iterations == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "iterations",
                value: "0".to_string(),
                reason: "At least one measured iteration is required".to_string(),
            });
        }

        if self.data_size == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "data_size",
                value: "0".to_string(),
                reason: "Payload cannot be empty".to_string(),
            });
        }

        if self.buffer_size == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "buffer_size",
                value: "0".to_string(),
                reason: "Chunk size must be at least 1 byte".to_string(),
            });
        }

        Ok(())
    }

    /// Largest chunk actually moved: `buffer_size` clamped to the payload.
    pub fn chunk_size(&self) -> usize {
        self.buffer_size.min(self.data_size)
    }

    /// Warmups plus measured iterations.
    pub fn total_iterations(&self) -> u32 {
        self.warmup_iterations.saturating_add(self.measured_iterations)
    }

    /// Phase of the zero-based `iteration`.
    pub fn phase(&self, iteration: u32) -> Phase {
        if iteration < self.warmup_iterations {
            Phase::Warmup
        } else {
            Phase::Measure
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Warmup,
    Measure,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Warmup => "warmup",
            Phase::Measure => "measure",
        }
    }
}

/// Result of one completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub kind: TransportKind,
    pub params: RunParams,
    /// Bytes per second as seen by the receiver (or the copy itself).
    pub bandwidth: f64,
    /// Measured samples, warmups excluded.
    pub record: IterationRecord,
    /// Worker threads used by the multi-threaded copy, 1 otherwise.
    pub threads: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_validation() {
        assert!(RunParams::new(5, 2, 1 << 20, 1 << 16).is_ok());
        assert!(RunParams::new(1, 0, 1, 1).is_ok());
        assert!(RunParams::new(0, 2, 1024, 64).is_err());
        assert!(RunParams::new(5, 2, 0, 0).is_err());
        assert!(RunParams::new(5, 2, 1024, 0).is_err());
    }

    #[test]
    fn test_chunk_larger_than_payload_is_clamped() {
        let params = RunParams::new(5, 2, 4096, 1 << 20).unwrap();
        assert_eq!(params.chunk_size(), 4096);

        let params = RunParams::new(5, 2, 4096, 1000).unwrap();
        assert_eq!(params.chunk_size(), 1000);
    }

    #[test]
    fn test_phases() {
        let params = RunParams::new(3, 2, 16, 4).unwrap();
        assert_eq!(params.total_iterations(), 5);
        let phases: Vec<_> = (0..params.total_iterations())
            .map(|i| params.phase(i))
            .collect();
        assert_eq!(
            phases,
            vec![
                Phase::Warmup,
                Phase::Warmup,
                Phase::Measure,
                Phase::Measure,
                Phase::Measure
            ]
        );
    }

    #[test]
    fn test_no_warmups() {
        let params = RunParams::new(2, 0, 16, 4).unwrap();
        assert_eq!(params.phase(0), Phase::Measure);
    }
}
