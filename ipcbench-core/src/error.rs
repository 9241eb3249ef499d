//! Custom error types for ipcbench.
//!
//! Every failure is fatal for the run that produced it. A benchmark never
//! retries an iteration, so errors carry enough context (role, iteration,
//! resource name) to reproduce the failure instead.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::Role;

/// Top-level error type for a benchmark run.
#[derive(Debug, Error)]
pub enum BenchError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Plans
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Benchmark plan not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Benchmark plan parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Setup Errors - No Meaningful Measurement Possible
    // =========================================================================
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    #[error("Barrier error: {0}")]
    Barrier(#[from] BarrierError),

    #[error("{role}: rendezvous failed at iteration {iteration}: {source}")]
    Rendezvous {
        role: Role,
        iteration: u32,
        #[source]
        source: BarrierError,
    },

    #[error("Setup failed for {transport}: {reason}")]
    Setup {
        transport: &'static str,
        reason: String,
    },

    // =========================================================================
    // Transfer Errors - Partial Iterations Are Not Salvageable
    // =========================================================================
    #[error("{role}: transfer failed at iteration {iteration}: {source}")]
    Transfer {
        role: Role,
        iteration: u32,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Integrity Errors - Always A Transport Defect
    // =========================================================================
    #[error("{role}: data verification failed at iteration {iteration}: {source}")]
    Integrity {
        role: Role,
        iteration: u32,
        #[source]
        source: IntegrityError,
    },

    /// The in-process copy produced a wrong destination buffer.
    #[error("copy: data verification failed at iteration {iteration}: {source}")]
    CopyIntegrity {
        iteration: u32,
        #[source]
        source: IntegrityError,
    },

    // =========================================================================
    // Aggregation Errors - Never Report A Bogus Figure
    // =========================================================================
    #[error("Bandwidth aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("{role} process failed: {status}")]
    PeerFailed { role: Role, status: String },

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("System call failed: {syscall} - {message}")]
    Syscall {
        syscall: &'static str,
        message: String,
    },
}

/// Invalid benchmark parameters. Rejected before anything is forked.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid byte size '{value}': {reason}")]
    InvalidByteSize { value: String, reason: String },

    #[error("Unknown benchmark kind: {kind}")]
    UnknownKind { kind: String },

    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },
}

/// Shared memory errors - critical failures with no fallback.
#[derive(Debug, Error)]
pub enum SharedMemoryError {
    #[error("Failed to create shared memory region: {name} - {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Failed to open shared memory region: {name} - {reason}")]
    OpenFailed { name: String, reason: String },

    #[error("Failed to map shared memory: {reason}")]
    MapFailed { reason: String },

    #[error("Shared memory region {name} never reached {expected} bytes (found {actual})")]
    Undersized {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// Errors raised by the process-shared barrier.
#[derive(Debug, Error)]
pub enum BarrierError {
    #[error("Barrier {name}: participant count must be positive")]
    ZeroParticipants { name: String },

    #[error("Barrier {name} already exists with {found} participants, requested {requested}")]
    ParticipantMismatch {
        name: String,
        requested: u32,
        found: u32,
    },

    #[error("Barrier {name} was abandoned by a participant that will never arrive")]
    Abandoned { name: String },

    #[error("Barrier {name} was not initialised within {waited:?}")]
    InitTimeout { name: String, waited: Duration },

    #[error("Barrier {name}: {operation} failed: {source}")]
    Sync {
        name: String,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Barrier region: {0}")]
    Region(#[from] SharedMemoryError),
}

/// A received payload that does not match the generated one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("length mismatch: expected {expected} bytes, received {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error(
        "content mismatch at offset {offset}: expected crc {expected_crc:#010x}, got {actual_crc:#010x}"
    )]
    ContentMismatch {
        offset: usize,
        expected_crc: u32,
        actual_crc: u32,
    },
}

/// Degenerate sample sets that cannot produce a bandwidth figure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("no duration samples")]
    Empty,

    #[error("expected {expected} duration samples, got {actual}")]
    SampleCountMismatch { expected: u32, actual: usize },

    #[error("total duration is zero")]
    ZeroDuration,

    #[error("payload size is zero")]
    ZeroPayload,
}

/// Result type alias using BenchError.
pub type BenchResult<T> = Result<T, BenchError>;

impl BenchError {
    /// Wrap an io error from a named system call.
    pub fn syscall(syscall: &'static str, err: impl std::fmt::Display) -> Self {
        BenchError::Syscall {
            syscall,
            message: err.to_string(),
        }
    }

    /// Setup failure for the given transport.
    pub fn setup(transport: &'static str, reason: impl Into<String>) -> Self {
        BenchError::Setup {
            transport,
            reason: reason.into(),
        }
    }
}
