//! ipcbench Core Library
//!
//! Bandwidth measurement of inter-process communication mechanisms under one
//! common protocol. Provides the process-shared barrier, the deterministic
//! payload, the warmup/measure driver, the transports and plan parsing.

pub mod bandwidth;
pub mod config;
pub mod error;
pub mod payload;
pub mod protocol;
pub mod runner;
pub mod shm;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use bandwidth::{aggregate, format_gib_per_sec, IterationRecord, BYTES_PER_GIB};
pub use config::{BenchPlan, BenchmarkSpec, ConfigLoader};
pub use error::{
    AggregationError, BarrierError, BenchError, BenchResult, HardValidationError, IntegrityError,
    SharedMemoryError,
};
pub use protocol::{Phase, RunOutcome, RunParams};
pub use runner::{run_benchmark, run_memcpy, run_memcpy_mt, run_mmap, run_mq, run_pipe, run_uds};
pub use shm::{ProcessBarrier, SharedMemoryRegion};
pub use types::{ByteSize, ResourceName, Role, TransportKind};
